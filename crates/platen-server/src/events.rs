// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pull-mode event subscriptions (`ippget`).
//
// Each subscription owns a bounded ring of rendered event groups.
// Sequence numbers are the public contract: they are assigned at enqueue,
// increase monotonically, and are never reused within a subscription; the
// ring index is private. When the ring is full the oldest event is
// evicted and `first_sequence` advances.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, Weak};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use platen_core::sync::LockExt;
use platen_core::types::{
    EVENT_JOB_PROGRESS, EventMask, event_keywords, job_reason_keywords, printer_reason_keywords,
};
use platen_ipp::attr::{Attribute, AttributeGroup};
use platen_ipp::model::DelimiterTag;
use platen_ipp::value::Value;

use crate::job::Job;
use crate::printer::Printer;
use crate::resource::Resource;
use crate::store::System;

/// What a subscription is attached to. Back-references are weak so a
/// deleted owner never keeps its subscriptions alive (or vice versa).
pub enum SubscriptionOwner {
    System,
    Printer(Weak<Printer>),
    Job(Weak<Printer>, Weak<Job>),
    Resource(i32),
}

/// One rendered event, ready for a Get-Notifications response.
#[derive(Clone)]
pub struct Event {
    pub sequence: u32,
    pub group: AttributeGroup,
}

pub struct SubscriptionInner {
    pub owner: SubscriptionOwner,
    pub username: String,
    pub events: EventMask,
    pub notify_attributes: Vec<String>,
    pub user_data: Vec<u8>,
    pub charset: String,
    pub language: String,
    /// Lease in seconds; 0 means no expiry.
    pub lease_secs: u32,
    pub expire: Option<DateTime<Utc>>,
    pub time_interval: u32,
    ring: VecDeque<Event>,
    pub first_sequence: u32,
    pub last_sequence: u32,
    pub last_event_at: Option<DateTime<Utc>>,
    pub canceled: bool,
}

pub struct Subscription {
    pub id: i32,
    pub uuid: Uuid,
    pub depth: usize,
    pub inner: RwLock<SubscriptionInner>,
}

impl Subscription {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i32,
        owner: SubscriptionOwner,
        username: &str,
        events: EventMask,
        lease_secs: u32,
        time_interval: u32,
        depth: usize,
    ) -> Arc<Self> {
        let expire = if lease_secs == 0 {
            None
        } else {
            Some(Utc::now() + Duration::seconds(lease_secs as i64))
        };
        Arc::new(Self {
            id,
            uuid: Uuid::new_v4(),
            depth,
            inner: RwLock::new(SubscriptionInner {
                owner,
                username: username.to_string(),
                events,
                notify_attributes: Vec::new(),
                user_data: Vec::new(),
                charset: "utf-8".into(),
                language: "en".into(),
                lease_secs,
                expire,
                time_interval,
                ring: VecDeque::new(),
                first_sequence: 1,
                last_sequence: 0,
                last_event_at: None,
                canceled: false,
            }),
        })
    }

    /// Renew the lease; returns the granted duration.
    pub fn renew(&self, lease_secs: u32, max_lease_secs: u32) -> u32 {
        let granted = if lease_secs == 0 {
            0
        } else {
            lease_secs.min(max_lease_secs)
        };
        let mut inner = self.inner.write_lock();
        inner.lease_secs = granted;
        inner.expire = if granted == 0 {
            None
        } else {
            Some(Utc::now() + Duration::seconds(granted as i64))
        };
        granted
    }

    /// Truncate the lease so the sweeper drops the subscription; used
    /// when the back-referenced owner goes away.
    pub fn truncate(&self) {
        let mut inner = self.inner.write_lock();
        inner.owner = SubscriptionOwner::System;
        inner.canceled = true;
        inner.expire = Some(Utc::now());
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.read_lock();
        inner.canceled || inner.expire.map(|t| t <= now).unwrap_or(false)
    }

    /// Events with sequence >= `since`, in order.
    pub fn events_since(&self, since: u32) -> Vec<Event> {
        self.inner
            .read_lock()
            .ring
            .iter()
            .filter(|e| e.sequence >= since)
            .cloned()
            .collect()
    }

    /// Description attributes for Get-Subscription-Attributes.
    pub fn status_attributes(&self) -> AttributeGroup {
        let inner = self.inner.read_lock();
        let mut g = AttributeGroup::new(DelimiterTag::SubscriptionAttributes);
        g.add(Attribute::integer("notify-subscription-id", self.id));
        g.add(Attribute::new(
            "notify-subscription-uuid",
            Value::Uri(format!("urn:uuid:{}", self.uuid)),
        ));
        g.add(Attribute::keywords(
            "notify-events",
            &event_keywords(inner.events),
        ));
        g.add(Attribute::keyword("notify-pull-method", "ippget"));
        g.add(Attribute::integer(
            "notify-lease-duration",
            inner.lease_secs as i32,
        ));
        if inner.time_interval > 0 {
            g.add(Attribute::integer(
                "notify-time-interval",
                inner.time_interval as i32,
            ));
        }
        if !inner.user_data.is_empty() {
            g.add(Attribute::new(
                "notify-user-data",
                Value::OctetString(inner.user_data.clone()),
            ));
        }
        g.add(Attribute::charset("notify-charset", &inner.charset));
        g.add(Attribute::language("notify-natural-language", &inner.language));
        g.add(Attribute::name_value(
            "notify-subscriber-user-name",
            &inner.username,
        ));
        match &inner.owner {
            SubscriptionOwner::Job(_, job) => {
                if let Some(job) = job.upgrade() {
                    g.add(Attribute::integer("notify-job-id", job.id));
                }
            }
            SubscriptionOwner::Resource(id) => {
                g.add(Attribute::integer("resource-id", *id));
            }
            _ => {}
        }
        g
    }

    fn matches(&self, bit: EventMask, printer: Option<&Arc<Printer>>, job: Option<&Arc<Job>>) -> bool {
        let inner = self.inner.read_lock();
        if inner.canceled || inner.events & bit == 0 {
            return false;
        }
        match &inner.owner {
            SubscriptionOwner::System => true,
            SubscriptionOwner::Printer(weak) => match (weak.upgrade(), printer) {
                (Some(owner), Some(p)) => owner.id == p.id,
                _ => false,
            },
            SubscriptionOwner::Job(_, weak) => match (weak.upgrade(), job) {
                (Some(owner), Some(j)) => owner.id == j.id,
                _ => false,
            },
            SubscriptionOwner::Resource(_) => false,
        }
    }

    fn enqueue(&self, group_template: &AttributeGroup, bit: EventMask, now: DateTime<Utc>) {
        let mut inner = self.inner.write_lock();

        // job-progress events honour the minimum inter-event spacing.
        if bit == EVENT_JOB_PROGRESS && inner.time_interval > 0 {
            if let Some(last) = inner.last_event_at {
                if now - last < Duration::seconds(inner.time_interval as i64) {
                    return;
                }
            }
        }

        inner.last_sequence += 1;
        let sequence = inner.last_sequence;

        let mut group = AttributeGroup::new(DelimiterTag::EventNotificationAttributes);
        group.add(Attribute::charset("notify-charset", &inner.charset));
        group.add(Attribute::language("notify-natural-language", &inner.language));
        group.add(Attribute::integer("notify-subscription-id", self.id));
        group.add(Attribute::integer("notify-sequence-number", sequence as i32));
        if !inner.user_data.is_empty() {
            group.add(Attribute::new(
                "notify-user-data",
                Value::OctetString(inner.user_data.clone()),
            ));
        }
        for attr in &group_template.attrs {
            // An explicit notify-attributes list filters the object
            // snapshot; the notify-* bookkeeping always goes through.
            if !inner.notify_attributes.is_empty()
                && !attr.name.starts_with("notify-")
                && !inner.notify_attributes.iter().any(|n| n == &attr.name)
            {
                continue;
            }
            group.add(attr.clone());
        }

        inner.ring.push_back(Event { sequence, group });
        if inner.ring.len() > self.depth {
            inner.ring.pop_front();
            inner.first_sequence += 1;
        }
        inner.last_event_at = Some(now);
    }

    #[cfg(test)]
    pub fn ring_len(&self) -> usize {
        self.inner.read_lock().ring.len()
    }
}

// ---------------------------------------------------------------------------
// Event fan-out
// ---------------------------------------------------------------------------

/// Enqueue an event into every subscription whose mask and owner match,
/// then wake any Get-Notifications waiters.
pub fn add_event(
    system: &System,
    printer: Option<&Arc<Printer>>,
    job: Option<&Arc<Job>>,
    mask: EventMask,
    text: &str,
) {
    add_event_full(system, printer, job, None, mask, text);
}

pub fn add_event_full(
    system: &System,
    printer: Option<&Arc<Printer>>,
    job: Option<&Arc<Job>>,
    resource: Option<&Arc<Resource>>,
    mask: EventMask,
    text: &str,
) {
    let now = Utc::now();
    let template = event_template(system, printer, job, resource, text);
    let subscriptions = system.all_subscriptions();

    for (bit, keyword) in platen_core::types::EVENT_KEYWORDS {
        if mask & bit == 0 {
            continue;
        }
        let mut template = template.clone();
        template.attrs.insert(
            0,
            Attribute::keyword("notify-subscribed-event", keyword),
        );
        for sub in &subscriptions {
            let matches = sub.matches(*bit, printer, job)
                || matches_resource(sub, resource);
            if matches {
                sub.enqueue(&template, *bit, now);
                debug!(subscription = sub.id, event = keyword, "event enqueued");
            }
        }
    }

    system.event_ping.notify_waiters();
}

fn matches_resource(sub: &Arc<Subscription>, resource: Option<&Arc<Resource>>) -> bool {
    let inner = sub.inner.read_lock();
    if inner.canceled {
        return false;
    }
    match (&inner.owner, resource) {
        (SubscriptionOwner::Resource(id), Some(r)) => *id == r.id,
        _ => false,
    }
}

/// The object-snapshot attributes shared by every subscription's copy of
/// one event.
fn event_template(
    system: &System,
    printer: Option<&Arc<Printer>>,
    job: Option<&Arc<Job>>,
    resource: Option<&Arc<Resource>>,
    text: &str,
) -> AttributeGroup {
    let mut g = AttributeGroup::new(DelimiterTag::EventNotificationAttributes);
    g.add(Attribute::text("notify-text", text));
    g.add(Attribute::integer(
        "printer-up-time",
        (Utc::now() - system.start_time).num_seconds() as i32,
    ));
    if let Some(printer) = printer {
        let inner = printer.inner.read_lock();
        g.add(Attribute::name_value("printer-name", &inner.name));
        g.add(Attribute::enum_value("printer-state", inner.state.ipp_enum()));
        g.add(Attribute::keywords(
            "printer-state-reasons",
            &printer_reason_keywords(inner.reasons),
        ));
        g.add(Attribute::boolean(
            "printer-is-accepting-jobs",
            inner.is_accepting,
        ));
    }
    if let Some(job) = job {
        let inner = job.inner.read_lock();
        g.add(Attribute::integer("job-id", job.id));
        g.add(Attribute::enum_value("job-state", inner.state.ipp_enum()));
        g.add(Attribute::keywords(
            "job-state-reasons",
            &job_reason_keywords(inner.reasons),
        ));
        g.add(Attribute::integer(
            "job-impressions-completed",
            inner.impcompleted,
        ));
    }
    if let Some(resource) = resource {
        let inner = resource.inner.read_lock();
        g.add(Attribute::integer("resource-id", resource.id));
        g.add(Attribute::enum_value("resource-state", inner.state.ipp_enum()));
    }
    g
}

// ---------------------------------------------------------------------------
// Lease expiry
// ---------------------------------------------------------------------------

/// Background sweep: drop expired subscriptions and truncate those whose
/// owner has been deleted.
pub async fn lease_sweeper(system: Arc<System>) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(10));
    loop {
        tick.tick().await;
        sweep_once(&system);
    }
}

/// One sweep pass, separated for tests.
pub fn sweep_once(system: &System) {
    let now = Utc::now();
    let mut drop_ids = Vec::new();
    for sub in system.all_subscriptions() {
        let owner_gone = {
            let inner = sub.inner.read_lock();
            match &inner.owner {
                SubscriptionOwner::Printer(weak) => weak.upgrade().is_none(),
                SubscriptionOwner::Job(_, weak) => weak.upgrade().is_none(),
                _ => false,
            }
        };
        if owner_gone {
            sub.truncate();
        }
        if sub.is_expired(now) {
            drop_ids.push(sub.id);
        }
    }
    for id in drop_ids {
        if system.remove_subscription(id).is_some() {
            info!(subscription = id, "subscription expired");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platen_core::config::ServerConfig;
    use platen_core::types::{EVENT_JOB_CREATED, EVENT_JOB_STATE_CHANGED, EVENT_PRINTER_STATE_CHANGED};

    fn fixture() -> (Arc<System>, Arc<Printer>) {
        let system = System::new(ServerConfig::default());
        let printer = Printer::create(1, "p", "/ipp/print/p", &system.config);
        system.add_printer(Arc::clone(&printer));
        (system, printer)
    }

    fn printer_subscription(
        system: &System,
        printer: &Arc<Printer>,
        events: EventMask,
        depth: usize,
    ) -> Arc<Subscription> {
        let sub = Subscription::new(
            system.next_subscription_id(),
            SubscriptionOwner::Printer(Arc::downgrade(printer)),
            "alice",
            events,
            60,
            0,
            depth,
        );
        system.add_subscription(Arc::clone(&sub));
        sub
    }

    #[test]
    fn sequence_numbers_track_ring_length() {
        let (system, printer) = fixture();
        let sub = printer_subscription(&system, &printer, EVENT_JOB_STATE_CHANGED, 100);

        for i in 0..5 {
            add_event(
                &system,
                Some(&printer),
                None,
                EVENT_JOB_STATE_CHANGED,
                &format!("event {i}"),
            );
        }
        let inner = sub.inner.read().unwrap();
        assert_eq!(inner.first_sequence, 1);
        assert_eq!(inner.last_sequence, 5);
        assert_eq!(
            inner.last_sequence - inner.first_sequence + 1,
            sub.ring_len() as u32
        );
    }

    #[test]
    fn ring_eviction_advances_first_sequence() {
        let (system, printer) = fixture();
        let sub = printer_subscription(&system, &printer, EVENT_JOB_STATE_CHANGED, 3);

        for i in 0..5 {
            add_event(
                &system,
                Some(&printer),
                None,
                EVENT_JOB_STATE_CHANGED,
                &format!("event {i}"),
            );
        }
        let inner = sub.inner.read().unwrap();
        assert_eq!(inner.last_sequence, 5);
        assert_eq!(inner.first_sequence, 3);
        drop(inner);
        assert_eq!(sub.ring_len(), 3);
        // Only the surviving tail is returned.
        let events = sub.events_since(1);
        assert_eq!(events.first().map(|e| e.sequence), Some(3));
    }

    #[test]
    fn events_filtered_by_mask_and_owner() {
        let (system, printer) = fixture();
        let sub = printer_subscription(&system, &printer, EVENT_JOB_CREATED, 100);

        add_event(
            &system,
            Some(&printer),
            None,
            EVENT_PRINTER_STATE_CHANGED,
            "not subscribed",
        );
        assert_eq!(sub.ring_len(), 0);

        let other = Printer::create(2, "q", "/ipp/print/q", &system.config);
        add_event(&system, Some(&other), None, EVENT_JOB_CREATED, "other printer");
        assert_eq!(sub.ring_len(), 0);

        add_event(&system, Some(&printer), None, EVENT_JOB_CREATED, "mine");
        assert_eq!(sub.ring_len(), 1);
        let event = &sub.events_since(1)[0];
        assert_eq!(
            event.group.find("notify-subscribed-event").unwrap().as_str(),
            Some("job-created")
        );
        assert_eq!(
            event.group.find("notify-sequence-number").unwrap().as_i32(),
            Some(1)
        );
    }

    #[test]
    fn sweeper_drops_expired_and_orphaned() {
        let (system, printer) = fixture();
        let sub = printer_subscription(&system, &printer, EVENT_JOB_CREATED, 100);
        // Force expiry in the past.
        sub.inner.write().unwrap().expire = Some(Utc::now() - Duration::seconds(1));
        sweep_once(&system);
        assert!(system.subscription_by_id(sub.id).is_none());

        let sub2 = printer_subscription(&system, &printer, EVENT_JOB_CREATED, 100);
        system.remove_printer(printer.id);
        drop(printer);
        sweep_once(&system);
        assert!(system.subscription_by_id(sub2.id).is_none());
    }
}
