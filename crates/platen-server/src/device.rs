// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output devices: remote printer agents (proxies) registered against a
// logical printer. A device supplies a capability snapshot which is
// merged into the printer's device attributes, either as whole
// attributes or as sparse indexed value updates (`name.N`, `name.N-M`).

use std::sync::{Arc, RwLock};

use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_ipp::attr::{Attribute, AttributeGroup};
use platen_ipp::model::DelimiterTag;

pub struct DeviceInner {
    /// Capability snapshot claimed by the proxy.
    pub attrs: AttributeGroup,
}

pub struct OutputDevice {
    /// The proxy-chosen `output-device-uuid` (URN form).
    pub uuid: String,
    pub inner: RwLock<DeviceInner>,
}

impl OutputDevice {
    pub fn new(uuid: &str) -> Arc<Self> {
        Arc::new(Self {
            uuid: uuid.to_string(),
            inner: RwLock::new(DeviceInner {
                attrs: AttributeGroup::new(DelimiterTag::PrinterAttributes),
            }),
        })
    }

    /// Merge an update from the proxy. Plain names replace the whole
    /// attribute; `name.N` replaces value N (1-based) and `name.N-M`
    /// replaces the run N..=M, extending the value list by at most one
    /// slot at the tail.
    pub fn merge(&self, updates: &AttributeGroup) -> Result<()> {
        let mut inner = self.inner.write_lock();
        for attr in &updates.attrs {
            match parse_indexed_name(&attr.name) {
                None => inner.attrs.replace(attr.clone()),
                Some((base, first, last)) => {
                    let target = inner.attrs.find_mut(base).ok_or_else(|| {
                        PlatenError::NotPossible(format!(
                            "sparse update for absent attribute '{base}'"
                        ))
                    })?;
                    let span = (last - first + 1) as usize;
                    if attr.values.len() != span {
                        return Err(PlatenError::BadRequest(format!(
                            "sparse update '{}' carries {} values for a span of {span}",
                            attr.name,
                            attr.values.len()
                        )));
                    }
                    for (offset, value) in attr.values.iter().enumerate() {
                        let index = (first - 1) as usize + offset;
                        target.set_value(index, value.clone())?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> AttributeGroup {
        self.inner.read_lock().attrs.clone()
    }
}

/// Split `name.N` / `name.N-M` into (base, first, last). Plain names
/// yield `None`.
fn parse_indexed_name(name: &str) -> Option<(&str, u32, u32)> {
    let (base, suffix) = name.rsplit_once('.')?;
    if base.is_empty() || suffix.is_empty() {
        return None;
    }
    let (first, last) = match suffix.split_once('-') {
        Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
        None => {
            let n: u32 = suffix.parse().ok()?;
            (n, n)
        }
    };
    if first == 0 || last < first {
        return None;
    }
    Some((base, first, last))
}

/// Merge device attributes over printer defaults for responses: the
/// device's values win on duplicates.
pub fn overlay(base: &AttributeGroup, device: &AttributeGroup) -> AttributeGroup {
    let mut out = base.clone();
    for attr in &device.attrs {
        out.replace(attr.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use platen_ipp::value::Value;

    fn updates(attrs: Vec<Attribute>) -> AttributeGroup {
        AttributeGroup {
            tag: DelimiterTag::PrinterAttributes,
            attrs,
        }
    }

    #[test]
    fn parse_indexed_names() {
        assert_eq!(parse_indexed_name("media-supported.3"), Some(("media-supported", 3, 3)));
        assert_eq!(
            parse_indexed_name("media-supported.2-4"),
            Some(("media-supported", 2, 4))
        );
        assert_eq!(parse_indexed_name("media-supported"), None);
        assert_eq!(parse_indexed_name("media-supported.0"), None);
        assert_eq!(parse_indexed_name("media-supported.4-2"), None);
    }

    #[test]
    fn full_replacement() {
        let dev = OutputDevice::new("urn:uuid:1234");
        dev.merge(&updates(vec![Attribute::keyword("media-default", "na_letter_8.5x11in")]))
            .unwrap();
        dev.merge(&updates(vec![Attribute::keyword("media-default", "iso_a4_210x297mm")]))
            .unwrap();
        let snap = dev.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.find("media-default").unwrap().as_str(), Some("iso_a4_210x297mm"));
    }

    #[test]
    fn sparse_single_index_update() {
        let dev = OutputDevice::new("urn:uuid:1234");
        dev.merge(&updates(vec![Attribute::keywords(
            "media-supported",
            &["a", "b", "c"],
        )]))
        .unwrap();
        dev.merge(&updates(vec![Attribute::keyword("media-supported.2", "z")]))
            .unwrap();
        let snap = dev.snapshot();
        assert_eq!(snap.find("media-supported").unwrap().strings(), vec!["a", "z", "c"]);
    }

    #[test]
    fn sparse_range_update_must_match_span() {
        let dev = OutputDevice::new("urn:uuid:1234");
        dev.merge(&updates(vec![Attribute::keywords(
            "media-supported",
            &["a", "b", "c"],
        )]))
        .unwrap();
        let bad = updates(vec![Attribute::keyword("media-supported.1-2", "only-one")]);
        assert!(dev.merge(&bad).is_err());

        let good = updates(vec![Attribute::with_values(
            "media-supported.1-2",
            vec![Value::Keyword("x".into()), Value::Keyword("y".into())],
        )]);
        dev.merge(&good).unwrap();
        assert_eq!(
            dev.snapshot().find("media-supported").unwrap().strings(),
            vec!["x", "y", "c"]
        );
    }

    #[test]
    fn sparse_update_for_missing_attribute_fails() {
        let dev = OutputDevice::new("urn:uuid:1234");
        let result = dev.merge(&updates(vec![Attribute::keyword("absent.1", "v")]));
        assert!(result.is_err());
    }

    #[test]
    fn overlay_prefers_device_values() {
        let mut base = AttributeGroup::new(DelimiterTag::PrinterAttributes);
        base.add(Attribute::keyword("media-default", "iso_a4_210x297mm"));
        base.add(Attribute::boolean("color-supported", false));
        let mut dev = AttributeGroup::new(DelimiterTag::PrinterAttributes);
        dev.add(Attribute::boolean("color-supported", true));
        let merged = overlay(&base, &dev);
        assert_eq!(merged.find("color-supported").unwrap().as_bool(), Some(true));
        assert_eq!(
            merged.find("media-default").unwrap().as_str(),
            Some("iso_a4_210x297mm")
        );
    }
}
