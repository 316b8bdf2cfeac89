// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer objects: static description attributes, live state, and the
// per-printer job lists.
//
// Lock order: a printer's lock is always taken after the registry lock
// and before any of its jobs' locks.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use platen_core::config::ServerConfig;
use platen_core::sync::LockExt;
use platen_core::types::{
    PrinterReasons, PrinterState, printer_reason_keywords,
};
use platen_ipp::attr::{Attribute, AttributeGroup};
use platen_ipp::model::{DelimiterTag, Operation};
use platen_ipp::value::Value;

use crate::device::OutputDevice;
use crate::job::Job;

/// Operations advertised in `operations-supported`.
pub const SUPPORTED_OPERATIONS: &[Operation] = &[
    Operation::PrintJob,
    Operation::PrintUri,
    Operation::ValidateJob,
    Operation::CreateJob,
    Operation::SendDocument,
    Operation::SendUri,
    Operation::CancelJob,
    Operation::GetJobAttributes,
    Operation::GetJobs,
    Operation::GetPrinterAttributes,
    Operation::HoldJob,
    Operation::ReleaseJob,
    Operation::PausePrinter,
    Operation::ResumePrinter,
    Operation::SetPrinterAttributes,
    Operation::SetJobAttributes,
    Operation::GetPrinterSupportedValues,
    Operation::CreatePrinterSubscriptions,
    Operation::CreateJobSubscriptions,
    Operation::GetSubscriptionAttributes,
    Operation::GetSubscriptions,
    Operation::RenewSubscription,
    Operation::CancelSubscription,
    Operation::GetNotifications,
    Operation::EnablePrinter,
    Operation::DisablePrinter,
    Operation::PausePrinterAfterCurrentJob,
    Operation::HoldNewJobs,
    Operation::ReleaseHeldNewJobs,
    Operation::RestartPrinter,
    Operation::ShutdownPrinter,
    Operation::StartupPrinter,
    Operation::CancelCurrentJob,
    Operation::CancelDocument,
    Operation::GetDocumentAttributes,
    Operation::GetDocuments,
    Operation::SetDocumentAttributes,
    Operation::CancelJobs,
    Operation::CancelMyJobs,
    Operation::CloseJob,
    Operation::IdentifyPrinter,
    Operation::ValidateDocument,
    Operation::AcknowledgeDocument,
    Operation::AcknowledgeIdentifyPrinter,
    Operation::AcknowledgeJob,
    Operation::FetchDocument,
    Operation::FetchJob,
    Operation::GetOutputDeviceAttributes,
    Operation::UpdateActiveJobs,
    Operation::DeregisterOutputDevice,
    Operation::UpdateDocumentStatus,
    Operation::UpdateJobStatus,
    Operation::UpdateOutputDeviceAttributes,
    Operation::AllocatePrinterResources,
    Operation::CreatePrinter,
    Operation::DeallocatePrinterResources,
    Operation::DeletePrinter,
    Operation::GetPrinters,
    Operation::ShutdownOnePrinter,
    Operation::StartupOnePrinter,
    Operation::CancelResource,
    Operation::CreateResource,
    Operation::InstallResource,
    Operation::SendResourceData,
    Operation::SetResourceAttributes,
    Operation::GetResourceAttributes,
    Operation::GetResources,
    Operation::CreateResourceSubscriptions,
    Operation::CreateSystemSubscriptions,
    Operation::DisableAllPrinters,
    Operation::EnableAllPrinters,
    Operation::GetSystemAttributes,
    Operation::GetSystemSupportedValues,
    Operation::PauseAllPrinters,
    Operation::PauseAllPrintersAfterCurrentJob,
    Operation::RegisterOutputDevice,
    Operation::RestartSystem,
    Operation::ResumeAllPrinters,
    Operation::SetSystemAttributes,
    Operation::ShutdownAllPrinters,
    Operation::StartupAllPrinters,
];

/// Mutable printer fields, guarded by the printer lock.
pub struct PrinterInner {
    pub name: String,
    /// Resource path under which the printer is addressed.
    pub path: String,
    pub state: PrinterState,
    pub reasons: PrinterReasons,
    pub is_accepting: bool,
    pub is_shutdown: bool,
    /// Static description/capability attributes.
    pub pinfo: AttributeGroup,
    /// Capability snapshot supplied by a registered output device.
    pub dev_attrs: AttributeGroup,
    /// Every job ever created on this printer (terminal jobs retained
    /// read-only until printer deletion).
    pub jobs: Vec<Arc<Job>>,
    /// Non-terminal jobs ordered by (priority desc, id asc).
    pub active_jobs: Vec<Arc<Job>>,
    pub processing_job: Option<Arc<Job>>,
    pub devices: Vec<Arc<OutputDevice>>,
    /// Ids of resources allocated to this printer.
    pub resources: Vec<i32>,
    pub identify_actions: Vec<String>,
    pub identify_message: Option<String>,
    pub device_uri: String,
    pub print_group: Option<String>,
    pub proxy_group: Option<String>,
    pub state_time: DateTime<Utc>,
    pub config_time: DateTime<Utc>,
}

/// A logical printer.
pub struct Printer {
    pub id: i32,
    pub uuid: Uuid,
    pub start_time: DateTime<Utc>,
    /// Wakes the printer's scheduler task.
    pub sched: Notify,
    pub inner: RwLock<PrinterInner>,
}

impl Printer {
    /// Create a printer with the default capability set.
    pub fn create(id: i32, name: &str, path: &str, config: &ServerConfig) -> Arc<Self> {
        let uuid = Uuid::new_v4();
        let now = Utc::now();
        let uri = format!("ipp://{}:{}{}", config.hostname, config.bind_port, path);
        let pinfo = default_printer_attributes(name, &uri, uuid);
        Arc::new(Self {
            id,
            uuid,
            start_time: now,
            sched: Notify::new(),
            inner: RwLock::new(PrinterInner {
                name: name.to_string(),
                path: path.to_string(),
                state: PrinterState::Idle,
                reasons: 0,
                is_accepting: true,
                is_shutdown: false,
                pinfo,
                dev_attrs: AttributeGroup::new(DelimiterTag::PrinterAttributes),
                jobs: Vec::new(),
                active_jobs: Vec::new(),
                processing_job: None,
                devices: Vec::new(),
                resources: Vec::new(),
                identify_actions: Vec::new(),
                identify_message: None,
                device_uri: "file:///dev/null".into(),
                print_group: config.print_group.clone(),
                proxy_group: config.proxy_group.clone(),
                state_time: now,
                config_time: now,
            }),
        })
    }

    pub fn uri(&self, config: &ServerConfig) -> String {
        let inner = self.inner.read_lock();
        format!("ipp://{}:{}{}", config.hostname, config.bind_port, inner.path)
    }

    pub fn job_by_id(&self, id: i32) -> Option<Arc<Job>> {
        self.inner
            .read_lock()
            .jobs
            .iter()
            .find(|j| j.id == id)
            .cloned()
    }

    /// Snapshot of all jobs, newest first by id.
    pub fn all_jobs(&self) -> Vec<Arc<Job>> {
        self.inner.read_lock().jobs.clone()
    }

    pub fn active_jobs(&self) -> Vec<Arc<Job>> {
        self.inner.read_lock().active_jobs.clone()
    }

    /// Queue a new job: appended to `jobs`, inserted into `active_jobs`
    /// keeping (priority desc, id asc) order, scheduler woken.
    pub fn enqueue_job(&self, job: Arc<Job>) {
        {
            let mut inner = self.inner.write_lock();
            inner.jobs.push(Arc::clone(&job));
            insert_active(&mut inner.active_jobs, job);
        }
        self.sched.notify_one();
    }

    /// Number of jobs not yet in a terminal state.
    pub fn active_job_count(&self) -> usize {
        self.inner.read_lock().active_jobs.len()
    }

    /// Set printer state, stamping state_time.
    pub fn set_state(&self, state: PrinterState) {
        let mut inner = self.inner.write_lock();
        if inner.state != state {
            inner.state = state;
            inner.state_time = Utc::now();
        }
    }

    pub fn state(&self) -> PrinterState {
        self.inner.read_lock().state
    }

    /// Add and remove reason bits in one step.
    pub fn update_reasons(&self, add: PrinterReasons, remove: PrinterReasons) {
        let mut inner = self.inner.write_lock();
        inner.reasons = (inner.reasons & !remove) | add;
        inner.state_time = Utc::now();
    }

    /// Replace the whole reason set (no-prefix STATE: message semantics).
    pub fn replace_reasons(&self, reasons: PrinterReasons) {
        let mut inner = self.inner.write_lock();
        inner.reasons = reasons;
        inner.state_time = Utc::now();
    }

    /// Live state attributes joined with `pinfo` for responses.
    pub fn status_attributes(&self, config: &ServerConfig) -> AttributeGroup {
        let inner = self.inner.read_lock();
        let mut group = AttributeGroup::new(DelimiterTag::PrinterAttributes);
        group.add(Attribute::integer("printer-id", self.id));
        group.add(Attribute::new(
            "printer-uuid",
            Value::Uri(format!("urn:uuid:{}", self.uuid)),
        ));
        group.add(Attribute::enum_value("printer-state", inner.state.ipp_enum()));
        group.add(Attribute::keywords(
            "printer-state-reasons",
            &printer_reason_keywords(inner.reasons),
        ));
        group.add(Attribute::boolean("printer-is-accepting-jobs", inner.is_accepting));
        group.add(Attribute::integer(
            "queued-job-count",
            inner.active_jobs.len() as i32,
        ));
        group.add(Attribute::integer(
            "printer-up-time",
            (Utc::now() - self.start_time).num_seconds() as i32,
        ));
        group.add(Attribute::integer(
            "printer-state-change-time",
            (inner.state_time - self.start_time).num_seconds() as i32,
        ));
        group.add(Attribute::integer(
            "printer-config-change-time",
            (inner.config_time - self.start_time).num_seconds() as i32,
        ));
        group.add(Attribute::uri(
            "printer-uri-supported",
            &format!("ipp://{}:{}{}", config.hostname, config.bind_port, inner.path),
        ));
        group
    }
}

/// Insert keeping (job-priority desc, job-id asc) order.
fn insert_active(active: &mut Vec<Arc<Job>>, job: Arc<Job>) {
    let priority = job.priority();
    let pos = active
        .iter()
        .position(|j| {
            let p = j.priority();
            p < priority || (p == priority && j.id > job.id)
        })
        .unwrap_or(active.len());
    active.insert(pos, job);
}

/// The static capability/description set every new printer starts with.
fn default_printer_attributes(name: &str, uri: &str, uuid: Uuid) -> AttributeGroup {
    let mut g = AttributeGroup::new(DelimiterTag::PrinterAttributes);

    g.add(Attribute::name_value("printer-name", name));
    g.add(Attribute::uri("printer-uri-supported", uri));
    g.add(Attribute::new(
        "printer-uuid",
        Value::Uri(format!("urn:uuid:{uuid}")),
    ));
    g.add(Attribute::keyword("uri-authentication-supported", "none"));
    g.add(Attribute::keyword("uri-security-supported", "none"));
    g.add(Attribute::text("printer-info", name));
    g.add(Attribute::text("printer-make-and-model", "Platen IPP Server"));
    g.add(Attribute::keywords("ipp-versions-supported", &["1.1", "2.0"]));
    g.add(Attribute::with_values(
        "operations-supported",
        SUPPORTED_OPERATIONS
            .iter()
            .map(|op| Value::Enum(op.code() as i32))
            .collect(),
    ));
    g.add(Attribute::boolean("multiple-document-jobs-supported", false));
    g.add(Attribute::charset("charset-configured", "utf-8"));
    g.add(Attribute::with_values(
        "charset-supported",
        vec![
            Value::Charset("us-ascii".into()),
            Value::Charset("utf-8".into()),
        ],
    ));
    g.add(Attribute::language("natural-language-configured", "en"));
    g.add(Attribute::language("generated-natural-language-supported", "en"));
    g.add(Attribute::mime_type("document-format-default", "application/octet-stream"));
    g.add(Attribute::with_values(
        "document-format-supported",
        [
            "application/octet-stream",
            "application/pdf",
            "application/postscript",
            "image/jpeg",
            "image/png",
            "image/pwg-raster",
            "image/urf",
            "text/plain",
        ]
        .iter()
        .map(|m| Value::MimeType((*m).into()))
        .collect(),
    ));
    g.add(Attribute::keywords("compression-supported", &["none"]));
    g.add(Attribute::keyword("media-default", "iso_a4_210x297mm"));
    g.add(Attribute::keywords(
        "media-supported",
        &[
            "iso_a4_210x297mm",
            "iso_a5_148x210mm",
            "iso_b5_176x250mm",
            "na_letter_8.5x11in",
            "na_legal_8.5x14in",
            "na_executive_7.25x10.5in",
        ],
    ));
    g.add(Attribute::keyword("sides-default", "one-sided"));
    g.add(Attribute::keywords(
        "sides-supported",
        &["one-sided", "two-sided-long-edge", "two-sided-short-edge"],
    ));
    g.add(Attribute::boolean("color-supported", true));
    g.add(Attribute::keyword("print-color-mode-default", "auto"));
    g.add(Attribute::keywords(
        "print-color-mode-supported",
        &["auto", "color", "monochrome"],
    ));
    g.add(Attribute::integer("copies-default", 1));
    g.add(Attribute::new(
        "copies-supported",
        Value::RangeOfInteger { lower: 1, upper: 999 },
    ));
    g.add(Attribute::enum_value("orientation-requested-default", 3));
    g.add(Attribute::with_values(
        "orientation-requested-supported",
        vec![Value::Enum(3), Value::Enum(4), Value::Enum(5), Value::Enum(6)],
    ));
    g.add(Attribute::enum_value("print-quality-default", 4));
    g.add(Attribute::with_values(
        "print-quality-supported",
        vec![Value::Enum(3), Value::Enum(4), Value::Enum(5)],
    ));
    g.add(Attribute::new(
        "printer-resolution-default",
        Value::Resolution { xres: 600, yres: 600, units: 3 },
    ));
    g.add(Attribute::new(
        "printer-resolution-supported",
        Value::Resolution { xres: 600, yres: 600, units: 3 },
    ));
    g.add(Attribute::keyword("pdl-override-supported", "attempted"));
    g.add(Attribute::integer("job-priority-default", 50));
    g.add(Attribute::integer("job-priority-supported", 100));
    g.add(Attribute::keyword("job-hold-until-default", "no-hold"));
    g.add(Attribute::keywords(
        "job-hold-until-supported",
        &["no-hold", "indefinite", "day-time", "evening", "night", "weekend"],
    ));
    g.add(Attribute::keywords(
        "job-creation-attributes-supported",
        &[
            "copies",
            "finishings",
            "ipp-attribute-fidelity",
            "job-hold-until",
            "job-hold-until-time",
            "job-name",
            "job-priority",
            "job-sheets",
            "media",
            "media-col",
            "multiple-document-handling",
            "number-up",
            "orientation-requested",
            "output-bin",
            "page-ranges",
            "print-color-mode",
            "print-content-optimize",
            "print-quality",
            "print-scaling",
            "printer-resolution",
            "sides",
        ],
    ));
    g.add(Attribute::keywords(
        "identify-actions-supported",
        &["display", "sound"],
    ));
    g.add(Attribute::keyword("identify-actions-default", "sound"));
    g.add(Attribute::keywords(
        "notify-events-supported",
        &[
            "job-completed",
            "job-config-changed",
            "job-created",
            "job-progress",
            "job-state-changed",
            "printer-config-changed",
            "printer-state-changed",
        ],
    ));
    g.add(Attribute::keyword("notify-events-default", "job-completed"));
    g.add(Attribute::keywords("notify-pull-method-supported", &["ippget"]));
    g.add(Attribute::integer("notify-lease-duration-default", 86400));
    g.add(Attribute::keywords(
        "which-jobs-supported",
        &["completed", "not-completed", "all"],
    ));

    g
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    fn test_printer() -> Arc<Printer> {
        Printer::create(1, "test", "/ipp/print/test", &ServerConfig::default())
    }

    #[test]
    fn new_printer_is_idle_and_accepting() {
        let p = test_printer();
        let inner = p.inner.read().unwrap();
        assert_eq!(inner.state, PrinterState::Idle);
        assert!(inner.is_accepting);
        assert!(!inner.is_shutdown);
        assert!(inner.pinfo.find("printer-name").is_some());
        assert!(inner.pinfo.find("operations-supported").is_some());
    }

    #[test]
    fn active_jobs_order_by_priority_then_id() {
        let p = test_printer();
        let a = Job::create(1, p.id, "alice", "job-a", 50);
        let b = Job::create(2, p.id, "bob", "job-b", 80);
        let c = Job::create(3, p.id, "carol", "job-c", 50);
        p.enqueue_job(a);
        p.enqueue_job(b);
        p.enqueue_job(c);
        let order: Vec<i32> = p.active_jobs().iter().map(|j| j.id).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn reason_updates_and_replacement() {
        use platen_core::types::{PREASON_MEDIA_EMPTY, PREASON_PAUSED, PREASON_TONER_LOW};
        let p = test_printer();
        p.update_reasons(PREASON_MEDIA_EMPTY | PREASON_TONER_LOW, 0);
        p.update_reasons(0, PREASON_TONER_LOW);
        assert_eq!(p.inner.read().unwrap().reasons, PREASON_MEDIA_EMPTY);
        p.replace_reasons(PREASON_PAUSED);
        assert_eq!(p.inner.read().unwrap().reasons, PREASON_PAUSED);
    }

    #[test]
    fn status_attributes_reflect_state() {
        let p = test_printer();
        let g = p.status_attributes(&ServerConfig::default());
        assert_eq!(g.find("printer-state").unwrap().as_i32(), Some(3));
        assert_eq!(
            g.find("printer-state-reasons").unwrap().strings(),
            vec!["none"]
        );
        assert_eq!(g.find("queued-job-count").unwrap().as_i32(), Some(0));
    }
}
