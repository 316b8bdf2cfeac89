// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job objects and the job state machine.
//
// Every state change funnels through `transition`, which takes the
// printer lock before the job lock and runs the single post-transition
// hook: terminal jobs leave `active_jobs`, `processing_job` is cleared,
// and the matching events are emitted. Terminal jobs accept no further
// mutation.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::debug;
use uuid::Uuid;

use platen_core::config::ServerConfig;
use platen_core::sync::LockExt;
use platen_core::types::{
    EVENT_JOB_COMPLETED, EVENT_JOB_CREATED, EVENT_JOB_STATE_CHANGED, JREASON_JOB_HOLD_UNTIL_SPECIFIED,
    JREASON_PROCESSING_TO_STOP_POINT, JobReasons, JobState, PrinterState, job_reason_keywords,
    spool_extension,
};
use platen_ipp::attr::{Attribute, AttributeGroup};
use platen_ipp::model::DelimiterTag;
use platen_ipp::value::{DateTimeValue, Value};

use crate::events;
use crate::printer::Printer;
use crate::store::System;

/// Mutable job fields, guarded by the job lock.
pub struct JobInner {
    pub state: JobState,
    pub reasons: JobReasons,
    /// Job-level IPP attributes approved at creation.
    pub attrs: AttributeGroup,
    /// Document-level attributes (single document per job).
    pub doc_attrs: AttributeGroup,
    pub format: String,
    pub filename: Option<PathBuf>,
    /// True while the spool file is still receiving bytes.
    pub spooling: bool,
    pub priority: i32,
    pub username: String,
    pub name: String,
    pub hold_until: Option<DateTime<Utc>>,
    /// Output device the job is assigned to, once fetched by a proxy.
    pub dev_uuid: Option<String>,
    pub dev_state: Option<JobState>,
    pub dev_reasons: JobReasons,
    pub dev_state_message: Option<String>,
    pub impressions: Option<i32>,
    pub impcompleted: i32,
    pub processing_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub stop_requested: bool,
    pub transform_pid: Option<u32>,
}

/// One print job. A single document only; the Document object is
/// synthesized from the job with document-number 1.
pub struct Job {
    pub id: i32,
    pub uuid: Uuid,
    pub printer_id: i32,
    pub created: DateTime<Utc>,
    pub inner: RwLock<JobInner>,
}

impl Job {
    pub fn create(id: i32, printer_id: i32, username: &str, name: &str, priority: i32) -> Arc<Self> {
        Arc::new(Self {
            id,
            uuid: Uuid::new_v4(),
            printer_id,
            created: Utc::now(),
            inner: RwLock::new(JobInner {
                state: JobState::Pending,
                reasons: 0,
                attrs: AttributeGroup::new(DelimiterTag::JobAttributes),
                doc_attrs: AttributeGroup::new(DelimiterTag::DocumentAttributes),
                format: "application/octet-stream".into(),
                filename: None,
                spooling: false,
                priority,
                username: username.to_string(),
                name: name.to_string(),
                hold_until: None,
                dev_uuid: None,
                dev_state: None,
                dev_reasons: 0,
                dev_state_message: None,
                impressions: None,
                impcompleted: 0,
                processing_at: None,
                completed_at: None,
                cancel_requested: false,
                stop_requested: false,
                transform_pid: None,
            }),
        })
    }

    pub fn state(&self) -> JobState {
        self.inner.read_lock().state
    }

    pub fn priority(&self) -> i32 {
        self.inner.read_lock().priority
    }

    pub fn username(&self) -> String {
        self.inner.read_lock().username.clone()
    }

    /// True when the scheduler may pick this job now.
    pub fn is_schedulable(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.read_lock();
        inner.state == JobState::Pending
            && !inner.spooling
            && inner.hold_until.map(|t| t <= now).unwrap_or(true)
    }

    /// Spool path for this job's document: `{printer}-{jobid}-{extension}`
    /// (resource payloads use the dotted form instead).
    pub fn spool_path(&self, config: &ServerConfig, printer_name: &str, mime: &str) -> PathBuf {
        config.spool_dir.join(format!(
            "{}-{}-{}",
            printer_name,
            self.id,
            spool_extension(mime)
        ))
    }

    /// Live job attributes for responses, joined with the stored
    /// creation attributes.
    pub fn status_attributes(&self, printer_uri: &str) -> AttributeGroup {
        let inner = self.inner.read_lock();
        let mut g = AttributeGroup::new(DelimiterTag::JobAttributes);
        g.add(Attribute::integer("job-id", self.id));
        g.add(Attribute::uri("job-uri", &format!("{}/{}", printer_uri, self.id)));
        g.add(Attribute::new(
            "job-uuid",
            Value::Uri(format!("urn:uuid:{}", self.uuid)),
        ));
        g.add(Attribute::uri("job-printer-uri", printer_uri));
        g.add(Attribute::enum_value("job-state", inner.state.ipp_enum()));
        g.add(Attribute::keywords(
            "job-state-reasons",
            &job_reason_keywords(inner.reasons),
        ));
        g.add(Attribute::name_value("job-name", &inner.name));
        g.add(Attribute::name_value("job-originating-user-name", &inner.username));
        g.add(Attribute::integer("job-priority", inner.priority));
        g.add(Attribute::mime_type("document-format", &inner.format));
        g.add(Attribute::new(
            "date-time-at-creation",
            Value::DateTime(DateTimeValue::from_utc(self.created)),
        ));
        g.add(Attribute::integer(
            "time-at-creation",
            self.created.timestamp() as i32,
        ));
        g.add(match inner.processing_at {
            Some(t) => Attribute::integer("time-at-processing", t.timestamp() as i32),
            None => Attribute::new("time-at-processing", Value::NoValue),
        });
        g.add(match inner.completed_at {
            Some(t) => Attribute::integer("time-at-completed", t.timestamp() as i32),
            None => Attribute::new("time-at-completed", Value::NoValue),
        });
        if let Some(impressions) = inner.impressions {
            g.add(Attribute::integer("job-impressions", impressions));
        }
        g.add(Attribute::integer(
            "job-impressions-completed",
            inner.impcompleted,
        ));
        for attr in &inner.attrs.attrs {
            if g.find(&attr.name).is_none() {
                g.add(attr.clone());
            }
        }
        g
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Move a job to a new state, maintaining the printer's bookkeeping and
/// emitting events. No-op if the job is already terminal.
pub fn transition(
    system: &System,
    printer: &Arc<Printer>,
    job: &Arc<Job>,
    new_state: JobState,
    add_reasons: JobReasons,
    remove_reasons: JobReasons,
) {
    let event_mask;
    {
        // Printer before job, per the locking order.
        let mut pinner = printer.inner.write_lock();
        let mut jinner = job.inner.write_lock();

        if jinner.state.is_terminal() {
            return;
        }
        let old_state = jinner.state;
        jinner.state = new_state;
        jinner.reasons = (jinner.reasons & !remove_reasons) | add_reasons;

        if new_state == JobState::Processing && jinner.processing_at.is_none() {
            jinner.processing_at = Some(Utc::now());
        }

        if new_state.is_terminal() {
            jinner.completed_at = Some(Utc::now());
            // Post-transition hook: a terminal job leaves the active list
            // and releases the processing slot.
            pinner.active_jobs.retain(|j| j.id != job.id);
            if pinner
                .processing_job
                .as_ref()
                .map(|j| j.id == job.id)
                .unwrap_or(false)
            {
                pinner.processing_job = None;
                if pinner.reasons & platen_core::types::PREASON_MOVING_TO_PAUSED != 0 {
                    // Pause-After-Current-Job lands once the slot frees.
                    pinner.reasons &= !platen_core::types::PREASON_MOVING_TO_PAUSED;
                    pinner.reasons |= platen_core::types::PREASON_PAUSED;
                    pinner.state = PrinterState::Stopped;
                    pinner.state_time = Utc::now();
                } else if pinner.state == PrinterState::Processing {
                    pinner.state = PrinterState::Idle;
                    pinner.state_time = Utc::now();
                }
            }
            event_mask = EVENT_JOB_STATE_CHANGED | EVENT_JOB_COMPLETED;
        } else {
            if new_state == JobState::Processing {
                pinner.processing_job = Some(Arc::clone(job));
                pinner.state = PrinterState::Processing;
                pinner.state_time = Utc::now();
            }
            event_mask = EVENT_JOB_STATE_CHANGED;
        }

        debug!(
            job_id = job.id,
            from = ?old_state,
            to = ?new_state,
            "job state transition"
        );
    }

    events::add_event(
        system,
        Some(printer),
        Some(job),
        event_mask,
        &format!("Job {} is now {:?}.", job.id, new_state),
    );
    printer.sched.notify_one();
}

/// Emit the job-created event after a job has been enqueued.
pub fn announce_created(system: &System, printer: &Arc<Printer>, job: &Arc<Job>) {
    events::add_event(
        system,
        Some(printer),
        Some(job),
        EVENT_JOB_CREATED,
        &format!("Job {} created.", job.id),
    );
}

// ---------------------------------------------------------------------------
// Format detection
// ---------------------------------------------------------------------------

/// Identify a document format from its first bytes. Deterministic: the
/// same prefix always yields the same answer.
pub fn detect_format(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"%PDF") {
        Some("application/pdf")
    } else if data.starts_with(b"%!") {
        Some("application/postscript")
    } else if data.len() >= 4
        && data[0] == 0xFF
        && data[1] == 0xD8
        && data[2] == 0xFF
        && (0xE0..=0xEF).contains(&data[3])
    {
        Some("image/jpeg")
    } else if data.starts_with(b"\x89PNG") {
        Some("image/png")
    } else if data.starts_with(b"RaS2") || data.starts_with(b"RAS2") {
        Some("image/pwg-raster")
    } else if data.starts_with(b"UNIRAST") {
        Some("image/urf")
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// job-hold-until
// ---------------------------------------------------------------------------

/// Resolve a `job-hold-until` keyword to the release instant.
/// `indefinite` holds until an explicit Release-Job.
pub fn hold_until_time(keyword: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let today = |h: u32| {
        Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), h, 0, 0)
            .single()
            .unwrap_or(now)
    };
    let next = |t: DateTime<Utc>| if t <= now { t + Duration::days(1) } else { t };
    match keyword {
        "no-hold" => None,
        "indefinite" => Some(DateTime::<Utc>::MAX_UTC),
        "day-time" => Some(next(today(6))),
        "evening" => Some(next(today(18))),
        "night" => Some(next(today(22))),
        "second-shift" => Some(next(today(16))),
        "third-shift" => Some(next(today(0))),
        "weekend" => {
            let days_ahead = (6 - now.weekday().num_days_from_sunday() as i64).rem_euclid(7);
            Some(today(0) + Duration::days(if days_ahead == 0 { 7 } else { days_ahead }))
        }
        _ => Some(DateTime::<Utc>::MAX_UTC),
    }
}

/// Reason bits for a held job.
pub const HOLD_REASON: JobReasons = JREASON_JOB_HOLD_UNTIL_SPECIFIED;

/// Reason bit applied while stopping a processing job.
pub const STOPPING_REASON: JobReasons = JREASON_PROCESSING_TO_STOP_POINT;

#[cfg(test)]
mod tests {
    use super::*;
    use platen_core::config::ServerConfig;
    use platen_core::types::JREASON_JOB_CANCELED_BY_USER;

    fn system_and_printer() -> (Arc<System>, Arc<Printer>) {
        let system = System::new(ServerConfig::default());
        let printer = Printer::create(1, "p", "/ipp/print/p", &system.config);
        system.add_printer(Arc::clone(&printer));
        (system, printer)
    }

    #[test]
    fn detect_format_magic_table() {
        assert_eq!(detect_format(b"%PDF-1.7 ..."), Some("application/pdf"));
        assert_eq!(detect_format(b"%!PS-Adobe"), Some("application/postscript"));
        assert_eq!(
            detect_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0]),
            Some("image/jpeg")
        );
        assert_eq!(
            detect_format(&[0xFF, 0xD8, 0xFF, 0xEF, 0, 0, 0, 0]),
            Some("image/jpeg")
        );
        assert_eq!(detect_format(&[0xFF, 0xD8, 0xFF, 0xD0]), None);
        assert_eq!(detect_format(b"\x89PNG\r\n\x1a\n"), Some("image/png"));
        assert_eq!(detect_format(b"RaS2xxxx"), Some("image/pwg-raster"));
        assert_eq!(detect_format(b"UNIRAST\0"), Some("image/urf"));
        assert_eq!(detect_format(b"hello"), None);
    }

    #[test]
    fn detect_format_is_idempotent() {
        let inputs: [&[u8]; 3] = [b"%PDF-1.4", b"%!PS", b"plain text"];
        for data in inputs {
            assert_eq!(detect_format(data), detect_format(data));
        }
    }

    #[test]
    fn transition_to_terminal_removes_from_active() {
        let (system, printer) = system_and_printer();
        let job = Job::create(1, printer.id, "alice", "doc", 50);
        printer.enqueue_job(Arc::clone(&job));
        assert_eq!(printer.active_job_count(), 1);

        transition(
            &system,
            &printer,
            &job,
            JobState::Canceled,
            JREASON_JOB_CANCELED_BY_USER,
            0,
        );
        assert_eq!(job.state(), JobState::Canceled);
        assert_eq!(printer.active_job_count(), 0);
        assert!(job.inner.read().unwrap().completed_at.is_some());
    }

    #[test]
    fn terminal_jobs_do_not_mutate_further() {
        let (system, printer) = system_and_printer();
        let job = Job::create(1, printer.id, "alice", "doc", 50);
        printer.enqueue_job(Arc::clone(&job));
        transition(&system, &printer, &job, JobState::Completed, 0, 0);
        let completed_at = job.inner.read().unwrap().completed_at;

        transition(&system, &printer, &job, JobState::Canceled, 0, 0);
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.inner.read().unwrap().completed_at, completed_at);
    }

    #[test]
    fn processing_sets_slot_and_printer_state() {
        let (system, printer) = system_and_printer();
        let job = Job::create(1, printer.id, "alice", "doc", 50);
        printer.enqueue_job(Arc::clone(&job));
        transition(&system, &printer, &job, JobState::Processing, 0, 0);
        {
            let pinner = printer.inner.read().unwrap();
            assert_eq!(pinner.processing_job.as_ref().map(|j| j.id), Some(1));
            assert_eq!(pinner.state, PrinterState::Processing);
        }
        transition(&system, &printer, &job, JobState::Completed, 0, 0);
        let pinner = printer.inner.read().unwrap();
        assert!(pinner.processing_job.is_none());
        assert_eq!(pinner.state, PrinterState::Idle);
    }

    #[test]
    fn hold_until_keywords() {
        let now = Utc::now();
        assert_eq!(hold_until_time("no-hold", now), None);
        assert_eq!(hold_until_time("indefinite", now), Some(DateTime::<Utc>::MAX_UTC));
        let day = hold_until_time("day-time", now).unwrap();
        assert!(day > now);
    }

    #[test]
    fn schedulable_respects_hold_and_spooling() {
        let job = Job::create(1, 1, "alice", "doc", 50);
        let now = Utc::now();
        assert!(job.is_schedulable(now));
        job.inner.write().unwrap().hold_until = Some(DateTime::<Utc>::MAX_UTC);
        assert!(!job.is_schedulable(now));
        job.inner.write().unwrap().hold_until = None;
        job.inner.write().unwrap().spooling = true;
        assert!(!job.is_schedulable(now));
    }

    #[test]
    fn spool_path_uses_printer_and_extension() {
        let job = Job::create(7, 1, "alice", "doc", 50);
        let config = ServerConfig::default();
        let path = job.spool_path(&config, "office", "application/pdf");
        assert!(path.ends_with("office-7-pdf"));
    }
}
