// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resource objects (PWG 5100.22): uploaded payloads a printer can use
// (ICC profiles, firmware strings) and template attribute sets merged
// into Create-Printer / job-creation requests.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use platen_core::config::ServerConfig;
use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_core::types::{ResourceState, spool_extension};
use platen_ipp::attr::{Attribute, AttributeGroup};
use platen_ipp::model::DelimiterTag;
use platen_ipp::value::Value;

/// Resource type keywords accepted by Create-Resource.
pub const RESOURCE_TYPES: &[&str] = &[
    "static-font",
    "static-form",
    "static-icc-profile",
    "static-image",
    "static-logo",
    "static-other",
    "static-strings",
    "template-document",
    "template-job",
    "template-printer",
];

/// Formats accepted by Send-Resource-Data.
pub const RESOURCE_FORMATS: &[&str] = &[
    "application/ipp",
    "application/pdf",
    "application/vnd.iccprofile",
    "image/jpeg",
    "image/png",
    "text/strings",
];

pub struct ResourceInner {
    pub state: ResourceState,
    pub rtype: String,
    pub name: String,
    pub format: Option<String>,
    pub filename: Option<PathBuf>,
    /// True while Send-Resource-Data is streaming the payload.
    pub spooling: bool,
    /// Number of printers currently holding an allocation.
    pub use_count: u32,
    pub cancel_requested: bool,
    /// Stored attribute set for template-* resources.
    pub attrs: AttributeGroup,
    pub state_time: DateTime<Utc>,
}

pub struct Resource {
    pub id: i32,
    pub uuid: Uuid,
    pub created: DateTime<Utc>,
    pub inner: RwLock<ResourceInner>,
}

impl Resource {
    pub fn create(id: i32, rtype: &str, name: &str) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            id,
            uuid: Uuid::new_v4(),
            created: now,
            inner: RwLock::new(ResourceInner {
                state: ResourceState::Pending,
                rtype: rtype.to_string(),
                name: name.to_string(),
                format: None,
                filename: None,
                spooling: false,
                use_count: 0,
                cancel_requested: false,
                attrs: AttributeGroup::new(DelimiterTag::ResourceAttributes),
                state_time: now,
            }),
        })
    }

    pub fn state(&self) -> ResourceState {
        self.inner.read_lock().state
    }

    pub fn is_template(&self) -> bool {
        self.inner
            .read_lock()
            .rtype
            .starts_with("template-")
    }

    pub fn set_state(&self, state: ResourceState) {
        let mut inner = self.inner.write_lock();
        inner.state = state;
        inner.state_time = Utc::now();
    }

    /// Payload path under the spool directory.
    pub fn payload_path(&self, config: &ServerConfig, format: &str) -> PathBuf {
        config
            .spool_dir
            .join(format!("resource-{}.{}", self.id, spool_extension(format)))
    }

    /// A printer takes an allocation; only installed non-template
    /// resources can be allocated.
    pub fn allocate(&self) -> Result<()> {
        let mut inner = self.inner.write_lock();
        if inner.state != ResourceState::Installed {
            return Err(PlatenError::NotPossible(format!(
                "resource {} is not installed",
                self.id
            )));
        }
        if inner.rtype.starts_with("template-") {
            return Err(PlatenError::NotPossible(format!(
                "template resource {} cannot be allocated",
                self.id
            )));
        }
        inner.use_count += 1;
        Ok(())
    }

    /// Release an allocation. A deferred cancel lands once the use count
    /// reaches zero.
    pub fn deallocate(&self) -> Result<ResourceState> {
        let mut inner = self.inner.write_lock();
        if inner.use_count == 0 {
            return Err(PlatenError::NotPossible(format!(
                "resource {} is not allocated",
                self.id
            )));
        }
        inner.use_count -= 1;
        if inner.use_count == 0 && inner.cancel_requested {
            inner.state = ResourceState::Canceled;
            inner.state_time = Utc::now();
        }
        Ok(inner.state)
    }

    /// Cancel now, or defer until allocations drain.
    pub fn cancel(&self) -> ResourceState {
        let mut inner = self.inner.write_lock();
        if inner.use_count > 0 {
            inner.cancel_requested = true;
        } else {
            inner.state = ResourceState::Canceled;
            inner.state_time = Utc::now();
        }
        inner.state
    }

    /// Description attributes for Get-Resource-Attributes.
    pub fn status_attributes(&self) -> AttributeGroup {
        let inner = self.inner.read_lock();
        let mut g = AttributeGroup::new(DelimiterTag::ResourceAttributes);
        g.add(Attribute::integer("resource-id", self.id));
        g.add(Attribute::new(
            "resource-uuid",
            Value::Uri(format!("urn:uuid:{}", self.uuid)),
        ));
        g.add(Attribute::keyword("resource-type", &inner.rtype));
        g.add(Attribute::name_value("resource-name", &inner.name));
        g.add(Attribute::enum_value("resource-state", inner.state.ipp_enum()));
        g.add(Attribute::keywords("resource-state-reasons", &["none"]));
        match &inner.format {
            Some(format) => g.add(Attribute::mime_type("resource-format", format)),
            None => g.add(Attribute::new("resource-format", Value::Unknown)),
        }
        g.add(Attribute::integer("resource-use-count", inner.use_count as i32));
        g.add(Attribute::integer(
            "time-at-creation",
            self.created.timestamp() as i32,
        ));
        g
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_pending_to_installed() {
        let r = Resource::create(1, "static-icc-profile", "srgb");
        assert_eq!(r.state(), ResourceState::Pending);
        r.set_state(ResourceState::Available);
        r.set_state(ResourceState::Installed);
        assert_eq!(r.state(), ResourceState::Installed);
    }

    #[test]
    fn allocation_requires_installed_state() {
        let r = Resource::create(1, "static-icc-profile", "srgb");
        assert!(r.allocate().is_err());
        r.set_state(ResourceState::Installed);
        assert!(r.allocate().is_ok());
        assert_eq!(r.inner.read().unwrap().use_count, 1);
    }

    #[test]
    fn templates_cannot_be_allocated() {
        let r = Resource::create(1, "template-printer", "defaults");
        r.set_state(ResourceState::Installed);
        assert!(r.allocate().is_err());
    }

    #[test]
    fn cancel_defers_while_in_use() {
        let r = Resource::create(1, "static-image", "logo");
        r.set_state(ResourceState::Installed);
        r.allocate().unwrap();

        assert_eq!(r.cancel(), ResourceState::Installed);
        assert!(r.inner.read().unwrap().cancel_requested);

        // Dropping the last use completes the deferred cancel.
        assert_eq!(r.deallocate().unwrap(), ResourceState::Canceled);
    }

    #[test]
    fn cancel_without_use_is_immediate() {
        let r = Resource::create(1, "static-image", "logo");
        assert_eq!(r.cancel(), ResourceState::Canceled);
    }
}
