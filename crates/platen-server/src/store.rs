// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Process-wide object store: the registries of Printers, Subscriptions,
// and Resources, plus id allocation and the event wake-up channel.
//
// # Locking order
//
// Outermost to innermost, never taken in any other order:
//
//   System registry lock (printers / subscriptions / resources / info)
//     -> Printer lock
//       -> Job lock
//   Subscription locks are taken alone, or after the printer/job lock of
//   their back-referenced owner.
//
// A read lock is never upgraded in place: release, then reacquire as
// write. Registry locks are dropped before object locks wherever a
// handler only needs the Arc.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use platen_core::config::ServerConfig;
use platen_core::sync::LockExt;
use platen_core::types::{PrinterReasons, SystemState};
use platen_ipp::attr::AttributeGroup;
use platen_ipp::model::DelimiterTag;

use crate::events::Subscription;
use crate::printer::Printer;
use crate::resource::Resource;

/// Mutable system-service attributes.
#[derive(Debug)]
pub struct SystemInfo {
    pub state: SystemState,
    pub reasons: PrinterReasons,
    pub name: String,
    pub location: Option<String>,
    pub info: Option<String>,
    pub make_and_model: Option<String>,
    pub geo_location: Option<String>,
    pub default_printer_id: Option<i32>,
    /// Settable system attributes with no dedicated field.
    pub attrs: AttributeGroup,
    pub state_time: DateTime<Utc>,
    pub config_time: DateTime<Utc>,
}

/// The process-wide object store and service identity.
pub struct System {
    pub config: ServerConfig,
    pub uuid: Uuid,
    pub start_time: DateTime<Utc>,
    pub info: RwLock<SystemInfo>,
    pub printers: RwLock<Vec<Arc<Printer>>>,
    pub subscriptions: RwLock<Vec<Arc<Subscription>>>,
    pub resources: RwLock<Vec<Arc<Resource>>>,
    next_printer_id: AtomicI32,
    next_job_id: AtomicI32,
    next_subscription_id: AtomicI32,
    next_resource_id: AtomicI32,
    /// Broadcast point for Get-Notifications waiters; notified on every
    /// enqueued event.
    pub event_ping: Notify,
}

impl System {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            config,
            uuid: Uuid::new_v4(),
            start_time: now,
            info: RwLock::new(SystemInfo {
                state: SystemState::Idle,
                reasons: 0,
                name: "platen".into(),
                location: None,
                info: None,
                make_and_model: Some("Platen IPP Server".into()),
                geo_location: None,
                default_printer_id: None,
                attrs: AttributeGroup::new(DelimiterTag::SystemAttributes),
                state_time: now,
                config_time: now,
            }),
            printers: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
            next_printer_id: AtomicI32::new(1),
            next_job_id: AtomicI32::new(1),
            next_subscription_id: AtomicI32::new(1),
            next_resource_id: AtomicI32::new(1),
            event_ping: Notify::new(),
        })
    }

    // -- Id allocation ------------------------------------------------------
    //
    // Ids are monotonic for the life of the process and never reused.

    pub fn next_printer_id(&self) -> i32 {
        self.next_printer_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_job_id(&self) -> i32 {
        self.next_job_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_subscription_id(&self) -> i32 {
        self.next_subscription_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_resource_id(&self) -> i32 {
        self.next_resource_id.fetch_add(1, Ordering::Relaxed)
    }

    // -- Printer registry ---------------------------------------------------

    pub fn add_printer(&self, printer: Arc<Printer>) {
        self.printers
            .write_lock()
            .push(printer);
    }

    /// Look up a printer by its resource path (e.g. `/ipp/print/name`).
    pub fn printer_by_path(&self, path: &str) -> Option<Arc<Printer>> {
        self.printers
            .read_lock()
            .iter()
            .find(|p| p.inner.read_lock().path == path)
            .cloned()
    }

    pub fn printer_by_id(&self, id: i32) -> Option<Arc<Printer>> {
        self.printers
            .read_lock()
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn printer_by_name(&self, name: &str) -> Option<Arc<Printer>> {
        self.printers
            .read_lock()
            .iter()
            .find(|p| p.inner.read_lock().name == name)
            .cloned()
    }

    /// Snapshot of the printer list, for iteration without holding the
    /// registry lock across per-printer work.
    pub fn all_printers(&self) -> Vec<Arc<Printer>> {
        self.printers.read_lock().clone()
    }

    pub fn remove_printer(&self, id: i32) -> Option<Arc<Printer>> {
        let mut printers = self.printers.write_lock();
        let index = printers.iter().position(|p| p.id == id)?;
        Some(printers.remove(index))
    }

    // -- Subscription registry ----------------------------------------------

    pub fn add_subscription(&self, sub: Arc<Subscription>) {
        self.subscriptions
            .write_lock()
            .push(sub);
    }

    pub fn subscription_by_id(&self, id: i32) -> Option<Arc<Subscription>> {
        self.subscriptions
            .read_lock()
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub fn all_subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read_lock()
            .clone()
    }

    pub fn remove_subscription(&self, id: i32) -> Option<Arc<Subscription>> {
        let mut subs = self.subscriptions.write_lock();
        let index = subs.iter().position(|s| s.id == id)?;
        Some(subs.remove(index))
    }

    // -- Resource registry --------------------------------------------------

    pub fn add_resource(&self, resource: Arc<Resource>) {
        self.resources
            .write_lock()
            .push(resource);
    }

    pub fn resource_by_id(&self, id: i32) -> Option<Arc<Resource>> {
        self.resources
            .read_lock()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn all_resources(&self) -> Vec<Arc<Resource>> {
        self.resources.read_lock().clone()
    }

    pub fn remove_resource(&self, id: i32) -> Option<Arc<Resource>> {
        let mut resources = self.resources.write_lock();
        let index = resources.iter().position(|r| r.id == id)?;
        Some(resources.remove(index))
    }

    /// Bump system-config-time after a configuration mutation.
    pub fn touch_config(&self) {
        self.info.write_lock().config_time = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let system = System::new(ServerConfig::default());
        let a = system.next_job_id();
        let b = system.next_job_id();
        let c = system.next_job_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn registry_lookup_misses_return_none() {
        let system = System::new(ServerConfig::default());
        assert!(system.printer_by_path("/ipp/print/absent").is_none());
        assert!(system.subscription_by_id(7).is_none());
        assert!(system.resource_by_id(7).is_none());
    }
}
