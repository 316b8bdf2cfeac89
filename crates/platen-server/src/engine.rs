// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The job engine: per-printer scheduling and execution of the external
// transform command.
//
// One scheduler task runs per printer. It picks the highest-priority
// schedulable job, moves it to `processing`, and runs the transform with
// the document spool file as its single argument. The transform's stderr
// is a line-oriented sideband: `STATE:` lines edit the job/printer
// state-reason bitsets, `ATTR:` lines update job counters and printer
// supply attributes, anything else is logged.
//
// Signaling a subprocess happens while holding no job lock beyond the
// pid read; the reaper (the same task, after `wait`) takes the locks
// again only to finalise state.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_core::types::{
    EVENT_JOB_PROGRESS, EVENT_PRINTER_CONFIG_CHANGED, EVENT_PRINTER_STATE_CHANGED,
    JREASON_ABORTED_BY_SYSTEM, JREASON_JOB_CANCELED_BY_USER, JREASON_JOB_PRINTING,
    JREASON_PROCESSING_TO_STOP_POINT, JobReasons, JobState, OutputMode, PrinterState,
    job_reason_bit, printer_reason_bit,
};
use platen_ipp::attr::Attribute;
use platen_ipp::value::Value;

use crate::events;
use crate::job::{self, Job};
use crate::printer::Printer;
use crate::store::System;

/// Longest sideband line accepted; longer lines are discarded whole.
const MAX_LINE: usize = 2048;

/// Upper bounds for the transform environment.
const MAX_ENV_ENTRIES: usize = 1000;
const MAX_ENV_VALUE: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Per-printer scheduler loop. Spawned on printer creation; exits when
/// the printer has been removed from the registry and drained.
pub async fn printer_loop(system: Arc<System>, printer: Arc<Printer>) {
    info!(printer = printer.id, "scheduler started");
    loop {
        while let Some(next) = pick_next(&printer) {
            run_job(&system, &printer, &next).await;
        }

        if system.printer_by_id(printer.id).is_none() && printer.active_job_count() == 0 {
            info!(printer = printer.id, "scheduler exiting");
            return;
        }

        // Wake on explicit kicks, or poll for hold-until release.
        tokio::select! {
            _ = printer.sched.notified() => {}
            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
        }
    }
}

/// The scheduling rule: accepting, not stopped, nothing processing, and
/// the best pending job whose hold time has passed. `active_jobs` is
/// already ordered by (priority desc, id asc).
fn pick_next(printer: &Arc<Printer>) -> Option<Arc<Job>> {
    let now = Utc::now();
    let inner = printer.inner.read_lock();
    if !inner.is_accepting
        || inner.is_shutdown
        || inner.state == PrinterState::Stopped
        || inner.processing_job.is_some()
    {
        return None;
    }
    inner
        .active_jobs
        .iter()
        .find(|job| {
            job.is_schedulable(now)
                // Jobs marked fetchable wait for a proxy Fetch-Job.
                && job.inner.read_lock().reasons
                    & platen_core::types::JREASON_JOB_FETCHABLE
                    == 0
        })
        .cloned()
}

/// Process one job to a terminal (or stopped) state.
async fn run_job(system: &Arc<System>, printer: &Arc<Printer>, job: &Arc<Job>) {
    // A printer with registered output devices and no local transform
    // publishes the job for Fetch-Job instead of processing it here.
    let has_devices = !printer.inner.read_lock().devices.is_empty();
    if system.config.transform_command.is_none() && has_devices {
        mark_fetchable(system, printer, job);
        return;
    }

    job::transition(
        system,
        printer,
        job,
        JobState::Processing,
        JREASON_JOB_PRINTING,
        0,
    );

    let outcome = match &system.config.transform_command {
        Some(command) => {
            let command = command.clone();
            run_transform(system, printer, job, &command, system.config.output_mode).await
        }
        None => finish_without_transform(system, job).await,
    };

    finalize(system, printer, job, outcome);
}

/// Flag a job as ready for a proxy to fetch.
pub fn mark_fetchable(system: &Arc<System>, printer: &Arc<Printer>, job: &Arc<Job>) {
    use platen_core::types::{EVENT_JOB_FETCHABLE, JREASON_JOB_FETCHABLE};
    {
        let mut inner = job.inner.write_lock();
        if inner.reasons & JREASON_JOB_FETCHABLE != 0 {
            return;
        }
        inner.reasons |= JREASON_JOB_FETCHABLE;
    }
    events::add_event(
        system,
        Some(printer),
        Some(job),
        EVENT_JOB_FETCHABLE,
        &format!("Job {} fetchable.", job.id),
    );
}

/// With no transform configured the document is already printer-ready;
/// the spool file simply counts as delivered.
async fn finish_without_transform(_system: &Arc<System>, job: &Arc<Job>) -> TransformOutcome {
    let impressions = job.inner.read_lock().impressions.unwrap_or(1);
    job.inner.write_lock().impcompleted = impressions;
    TransformOutcome::Success
}

enum TransformOutcome {
    Success,
    Canceled,
    Stopped,
    Failed(String),
}

/// Map the transform outcome onto the job state machine.
fn finalize(system: &Arc<System>, printer: &Arc<Printer>, job: &Arc<Job>, outcome: TransformOutcome) {
    match outcome {
        TransformOutcome::Success => {
            job::transition(
                system,
                printer,
                job,
                JobState::Completed,
                platen_core::types::JREASON_JOB_COMPLETED_SUCCESSFULLY,
                JREASON_JOB_PRINTING,
            );
        }
        TransformOutcome::Canceled => {
            job::transition(
                system,
                printer,
                job,
                JobState::Canceled,
                JREASON_JOB_CANCELED_BY_USER,
                JREASON_JOB_PRINTING | JREASON_PROCESSING_TO_STOP_POINT,
            );
        }
        TransformOutcome::Stopped => {
            // Stop-Job pause: the job returns to pending for a retry.
            job::transition(
                system,
                printer,
                job,
                JobState::Pending,
                0,
                JREASON_JOB_PRINTING | JREASON_PROCESSING_TO_STOP_POINT,
            );
            let mut pinner = printer.inner.write_lock();
            if pinner
                .processing_job
                .as_ref()
                .map(|j| j.id == job.id)
                .unwrap_or(false)
            {
                pinner.processing_job = None;
                if pinner.state == PrinterState::Processing {
                    pinner.state = PrinterState::Idle;
                    pinner.state_time = Utc::now();
                }
            }
        }
        TransformOutcome::Failed(reason) => {
            error!(job = job.id, %reason, "transform failed");
            job::transition(
                system,
                printer,
                job,
                JobState::Aborted,
                JREASON_ABORTED_BY_SYSTEM,
                JREASON_JOB_PRINTING,
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Transform execution
// ---------------------------------------------------------------------------

async fn run_transform(
    system: &Arc<System>,
    printer: &Arc<Printer>,
    job: &Arc<Job>,
    command: &std::path::Path,
    output_mode: OutputMode,
) -> TransformOutcome {
    let spool = match job.inner.read_lock().filename.clone() {
        Some(path) => path,
        None => return TransformOutcome::Failed("no spool file".into()),
    };

    let env = match build_env(system, printer, job) {
        Ok(env) => env,
        Err(e) => return TransformOutcome::Failed(e.to_string()),
    };

    let stdout = match output_mode {
        OutputMode::File => {
            let out_path = spool.with_extension("out");
            match std::fs::File::create(&out_path) {
                Ok(file) => Stdio::from(file),
                Err(e) => return TransformOutcome::Failed(format!("output file: {e}")),
            }
        }
        OutputMode::Discard | OutputMode::Client => Stdio::null(),
    };

    let mut child = match Command::new(command)
        .arg(&spool)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return TransformOutcome::Failed(format!("spawn {}: {e}", command.display())),
    };

    job.inner.write_lock().transform_pid = child.id();
    info!(job = job.id, pid = ?child.id(), command = %command.display(), "transform started");

    // Drain stderr to EOF, feeding the sideband parser.
    if let Some(mut stderr) = child.stderr.take() {
        let mut assembler = LineAssembler::new();
        let mut chunk = [0u8; 4096];
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    for line in assembler.push(&chunk[..n]) {
                        process_sideband_line(system, printer, job, &line);
                    }
                }
                Err(e) => {
                    warn!(job = job.id, error = %e, "transform stderr read failed");
                    break;
                }
            }
        }
    }

    let status = child.wait().await;
    job.inner.write_lock().transform_pid = None;

    let (cancel_requested, stop_requested, already_aborted) = {
        let inner = job.inner.read_lock();
        (
            inner.cancel_requested,
            inner.stop_requested,
            inner.state == JobState::Aborted,
        )
    };
    if already_aborted {
        // A STATE: ...-error line already terminated the job.
        return TransformOutcome::Failed("aborted by transform state message".into());
    }

    match status {
        Ok(status) if status.success() => {
            if cancel_requested {
                TransformOutcome::Canceled
            } else {
                TransformOutcome::Success
            }
        }
        Ok(status) => {
            if died_of_sigterm(&status) && (cancel_requested || stop_requested) {
                // Termination we asked for is not a failure.
                if cancel_requested {
                    TransformOutcome::Canceled
                } else {
                    TransformOutcome::Stopped
                }
            } else {
                TransformOutcome::Failed(format!("transform exited with {status}"))
            }
        }
        Err(e) => TransformOutcome::Failed(format!("wait: {e}")),
    }
}

#[cfg(unix)]
fn died_of_sigterm(status: &std::process::ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(libc::SIGTERM)
}

#[cfg(not(unix))]
fn died_of_sigterm(_status: &std::process::ExitStatus) -> bool {
    false
}

/// Build the transform environment. Inherited process variables are kept;
/// on top go the transport variables and one `IPP_<UPPER_SNAKE>` entry
/// per selected attribute: `pwg-*` and `*-default` from the printer then
/// the device (device wins), then job then document attributes (document
/// wins).
fn build_env(
    system: &Arc<System>,
    printer: &Arc<Printer>,
    job: &Arc<Job>,
) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();

    {
        let pinner = printer.inner.read_lock();
        for attr in &pinner.pinfo.attrs {
            if attr.name.starts_with("pwg-") || attr.name.ends_with("-default") {
                env.insert(env_name(&attr.name), env_value(attr));
            }
        }
        for attr in &pinner.dev_attrs.attrs {
            if attr.name.starts_with("pwg-") || attr.name.ends_with("-default") {
                env.insert(env_name(&attr.name), env_value(attr));
            }
        }
        env.insert("DEVICE_URI".into(), pinner.device_uri.clone());
    }
    {
        let jinner = job.inner.read_lock();
        for attr in &jinner.attrs.attrs {
            env.insert(env_name(&attr.name), env_value(attr));
        }
        for attr in &jinner.doc_attrs.attrs {
            env.insert(env_name(&attr.name), env_value(attr));
        }
        env.insert("CONTENT_TYPE".into(), jinner.format.clone());
    }
    env.insert("OUTPUT_TYPE".into(), "image/pwg-raster".into());
    env.insert("SERVER_LOGLEVEL".into(), system.config.log_level.clone());

    if env.len() > MAX_ENV_ENTRIES {
        return Err(PlatenError::Transform(format!(
            "environment too large: {} entries",
            env.len()
        )));
    }
    if let Some((name, _)) = env.iter().find(|(_, v)| v.len() > MAX_ENV_VALUE) {
        return Err(PlatenError::Transform(format!(
            "environment value for {name} too large"
        )));
    }
    Ok(env)
}

fn env_name(attr_name: &str) -> String {
    let mut name = String::with_capacity(attr_name.len() + 4);
    name.push_str("IPP_");
    for c in attr_name.chars() {
        name.push(match c {
            '-' => '_',
            c => c.to_ascii_uppercase(),
        });
    }
    name
}

fn env_value(attr: &Attribute) -> String {
    attr.values
        .iter()
        .map(|v| v.to_env_string())
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Sideband parsing
// ---------------------------------------------------------------------------

/// Assemble stderr chunks into lines with a hard length bound.
/// Incomplete trailing bytes survive to the next push; lines over the
/// bound are discarded whole rather than truncated.
pub struct LineAssembler {
    buf: Vec<u8>,
    overflow: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            overflow: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                if self.overflow {
                    warn!("discarding over-long sideband line");
                } else {
                    let mut line = String::from_utf8_lossy(&self.buf).into_owned();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                    lines.push(line);
                }
                self.buf.clear();
                self.overflow = false;
            } else if self.buf.len() >= MAX_LINE {
                self.overflow = true;
            } else {
                self.buf.push(byte);
            }
        }
        lines
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Route one stderr line.
pub fn process_sideband_line(
    system: &Arc<System>,
    printer: &Arc<Printer>,
    job: &Arc<Job>,
    line: &str,
) {
    if let Some(rest) = line.strip_prefix("STATE:") {
        apply_state_line(system, printer, job, rest);
    } else if let Some(rest) = line.strip_prefix("ATTR:") {
        apply_attr_line(system, printer, job, rest);
    } else if !line.is_empty() {
        info!(job = job.id, "transform: {line}");
    }
}

/// `STATE: [+|-]kw[,kw...]` — `+` adds, `-` removes, no prefix replaces
/// the printer reason set (job reasons stay additive/subtractive). A
/// `-error` suffix also aborts the job; `-warning` and `-report`
/// suffixes are stripped before keyword matching.
pub fn apply_state_line(system: &Arc<System>, printer: &Arc<Printer>, job: &Arc<Job>, rest: &str) {
    #[derive(PartialEq, Clone, Copy)]
    enum Mode {
        Add,
        Remove,
        Replace,
    }

    let rest = rest.trim();
    let (mode, list) = match rest.as_bytes().first() {
        Some(b'+') => (Mode::Add, &rest[1..]),
        Some(b'-') => (Mode::Remove, &rest[1..]),
        _ => (Mode::Replace, rest),
    };

    let mut printer_bits = 0u64;
    let mut job_add: JobReasons = 0;
    let mut job_remove: JobReasons = 0;
    let mut abort = false;

    for keyword in list.split(',') {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            continue;
        }
        let (base, is_error) = strip_severity(keyword);
        if is_error {
            abort = true;
        }
        if let Some(bit) = printer_reason_bit(base) {
            printer_bits |= bit;
        } else if let Some(bit) = job_reason_bit(base) {
            match mode {
                Mode::Remove => job_remove |= bit,
                _ => job_add |= bit,
            }
        } else {
            debug!(keyword = base, "unrecognised STATE keyword");
        }
    }

    match mode {
        Mode::Add => printer.update_reasons(printer_bits, 0),
        Mode::Remove => printer.update_reasons(0, printer_bits),
        // Replacement intentionally loses pre-existing printer reasons.
        Mode::Replace => printer.replace_reasons(printer_bits),
    }
    if job_add != 0 || job_remove != 0 {
        let mut inner = job.inner.write_lock();
        inner.reasons = (inner.reasons & !job_remove) | job_add;
    }

    events::add_event(
        system,
        Some(printer),
        Some(job),
        EVENT_PRINTER_STATE_CHANGED,
        "Printer state reasons updated by transform.",
    );

    if abort {
        job::transition(
            system,
            printer,
            job,
            JobState::Aborted,
            JREASON_ABORTED_BY_SYSTEM,
            0,
        );
    }
}

/// Severity suffix handling for STATE keywords.
fn strip_severity(keyword: &str) -> (&str, bool) {
    if let Some(base) = keyword.strip_suffix("-error") {
        (base, true)
    } else if let Some(base) = keyword.strip_suffix("-warning") {
        (base, false)
    } else if let Some(base) = keyword.strip_suffix("-report") {
        (base, false)
    } else {
        (keyword, false)
    }
}

/// `ATTR: name=value [name=value ...]` with URL-escaped values.
pub fn apply_attr_line(system: &Arc<System>, printer: &Arc<Printer>, job: &Arc<Job>, rest: &str) {
    let mut progressed = false;
    let mut printer_changed = false;

    for pair in rest.split_whitespace() {
        let Some((name, raw)) = pair.split_once('=') else {
            debug!(pair, "malformed ATTR pair");
            continue;
        };
        let value = url_decode(raw);

        match name {
            "job-impressions" => {
                if let Ok(v) = value.parse::<i32>() {
                    job.inner.write_lock().impressions = Some(v);
                }
            }
            "job-impressions-completed" => {
                if let Ok(v) = value.parse::<i32>() {
                    let mut inner = job.inner.write_lock();
                    // Monotonically non-decreasing until termination.
                    if v > inner.impcompleted {
                        inner.impcompleted = v;
                        progressed = true;
                    }
                }
            }
            name if name.starts_with("job-impressions-col")
                || name.starts_with("job-media-sheets")
                || name.starts_with("job-pages") =>
            {
                let attr = Attribute::with_values(name, parse_attr_values(&value));
                job.inner.write_lock().attrs.replace(attr);
            }
            name if name.starts_with("marker-")
                || name == "printer-alert"
                || name == "printer-alert-description"
                || name == "printer-supply"
                || name == "printer-supply-description" =>
            {
                let attr = Attribute::with_values(name, parse_attr_values(&value));
                printer.inner.write_lock().pinfo.replace(attr);
                printer_changed = true;
            }
            other => {
                debug!(attr = other, "unrecognised ATTR name");
            }
        }
    }

    if progressed {
        events::add_event(
            system,
            Some(printer),
            Some(job),
            EVENT_JOB_PROGRESS,
            "Job progress.",
        );
    }
    if printer_changed {
        events::add_event(
            system,
            Some(printer),
            None,
            EVENT_PRINTER_CONFIG_CHANGED,
            "Printer supplies updated by transform.",
        );
    }
}

/// Parse an ATTR value: comma separation makes a 1setOf; each element is
/// an integer, boolean, or keyword.
fn parse_attr_values(raw: &str) -> Vec<Value> {
    raw.split(',')
        .map(|token| {
            let token = token.trim();
            if token == "true" {
                Value::Boolean(true)
            } else if token == "false" {
                Value::Boolean(false)
            } else if let Ok(v) = token.parse::<i32>() {
                Value::Integer(v)
            } else {
                Value::Keyword(token.to_string())
            }
        })
        .collect()
}

/// Decode %XX escapes.
pub fn url_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3).and_then(|pair| {
                std::str::from_utf8(pair)
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
            });
            match hex {
                Some(b) => {
                    out.push(b);
                    i += 3;
                    continue;
                }
                None => out.push(bytes[i]),
            }
        } else {
            out.push(bytes[i]);
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------------
// Stop / cancel
// ---------------------------------------------------------------------------

/// Request cancellation. Idle-state jobs cancel immediately; a
/// processing job is signalled and finalised by the reaper.
pub fn cancel_job(system: &Arc<System>, printer: &Arc<Printer>, job: &Arc<Job>) -> Result<()> {
    let state = job.state();
    if state.is_terminal() {
        return Err(PlatenError::NotPossible(format!(
            "job {} is already {:?}",
            job.id, state
        )));
    }
    if state == JobState::Processing {
        let pid = {
            let mut inner = job.inner.write_lock();
            inner.cancel_requested = true;
            inner.reasons |= JREASON_PROCESSING_TO_STOP_POINT;
            inner.transform_pid
        };
        signal_terminate(pid);
    } else {
        job::transition(
            system,
            printer,
            job,
            JobState::Canceled,
            JREASON_JOB_CANCELED_BY_USER,
            0,
        );
    }
    Ok(())
}

/// Abort a job outright (printer deletion, internal failure). Any live
/// transform is signalled after the transition; the reaper's own
/// finalisation then no-ops on the terminal job.
pub fn abort_job(system: &Arc<System>, printer: &Arc<Printer>, job: &Arc<Job>) {
    let pid = job.inner.read_lock().transform_pid;
    job::transition(
        system,
        printer,
        job,
        JobState::Aborted,
        JREASON_ABORTED_BY_SYSTEM,
        0,
    );
    signal_terminate(pid);
}

/// Stop-Job: pause a processing job; the reaper returns it to pending.
pub fn stop_job(_system: &Arc<System>, _printer: &Arc<Printer>, job: &Arc<Job>) -> Result<()> {
    let state = job.state();
    if state != JobState::Processing {
        return Err(PlatenError::NotPossible(format!(
            "job {} is not processing",
            job.id
        )));
    }
    let pid = {
        let mut inner = job.inner.write_lock();
        inner.stop_requested = true;
        inner.reasons |= JREASON_PROCESSING_TO_STOP_POINT;
        inner.transform_pid
    };
    signal_terminate(pid);
    Ok(())
}

#[cfg(unix)]
fn signal_terminate(pid: Option<u32>) {
    if let Some(pid) = pid {
        // The reaper (wait in run_transform) finalises state.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn signal_terminate(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use platen_core::config::ServerConfig;
    use platen_core::types::{
        JREASON_JOB_PRINTING, PREASON_MEDIA_EMPTY, PREASON_MEDIA_LOW, PREASON_PAUSED,
    };

    fn fixture() -> (Arc<System>, Arc<Printer>, Arc<Job>) {
        let system = System::new(ServerConfig::default());
        let printer = Printer::create(1, "p", "/ipp/print/p", &system.config);
        system.add_printer(Arc::clone(&printer));
        let job = Job::create(1, printer.id, "alice", "doc", 50);
        printer.enqueue_job(Arc::clone(&job));
        (system, printer, job)
    }

    // -- Line assembly ------------------------------------------------------

    #[test]
    fn assembler_splits_and_keeps_partial_tail() {
        let mut a = LineAssembler::new();
        assert_eq!(a.push(b"STATE: +paused\nATT"), vec!["STATE: +paused"]);
        assert_eq!(a.push(b"R: x=1\n"), vec!["ATTR: x=1"]);
    }

    #[test]
    fn assembler_strips_carriage_return() {
        let mut a = LineAssembler::new();
        assert_eq!(a.push(b"hello\r\n"), vec!["hello"]);
    }

    #[test]
    fn assembler_discards_over_long_lines() {
        let mut a = LineAssembler::new();
        let long = vec![b'x'; MAX_LINE + 10];
        assert!(a.push(&long).is_empty());
        assert!(a.push(b"\n").is_empty());
        // The next line parses normally.
        assert_eq!(a.push(b"ok\n"), vec!["ok"]);
    }

    // -- STATE parsing ------------------------------------------------------

    #[test]
    fn state_add_with_warning_suffix_stripped() {
        let (system, printer, job) = fixture();
        apply_state_line(&system, &printer, &job, " +media-empty-warning,paused");
        let reasons = printer.inner.read().unwrap().reasons;
        assert!(reasons & PREASON_MEDIA_EMPTY != 0);
        assert!(reasons & PREASON_PAUSED != 0);
        assert_eq!(job.state(), JobState::Pending);
    }

    #[test]
    fn state_remove_clears_bits() {
        let (system, printer, job) = fixture();
        printer.update_reasons(PREASON_MEDIA_EMPTY | PREASON_PAUSED, 0);
        apply_state_line(&system, &printer, &job, " -paused");
        let reasons = printer.inner.read().unwrap().reasons;
        assert!(reasons & PREASON_PAUSED == 0);
        assert!(reasons & PREASON_MEDIA_EMPTY != 0);
    }

    #[test]
    fn state_replace_loses_previous_reasons() {
        let (system, printer, job) = fixture();
        printer.update_reasons(PREASON_MEDIA_LOW, 0);
        apply_state_line(&system, &printer, &job, " media-empty");
        assert_eq!(printer.inner.read().unwrap().reasons, PREASON_MEDIA_EMPTY);
    }

    #[test]
    fn state_error_suffix_aborts_job() {
        let (system, printer, job) = fixture();
        apply_state_line(&system, &printer, &job, " +media-jam-error");
        assert_eq!(job.state(), JobState::Aborted);
        assert!(printer.inner.read().unwrap().reasons & platen_core::types::PREASON_MEDIA_JAM != 0);
    }

    #[test]
    fn state_job_keywords_stay_additive_in_replace_mode() {
        let (system, printer, job) = fixture();
        job.inner.write().unwrap().reasons |= JREASON_JOB_PRINTING;
        apply_state_line(&system, &printer, &job, " job-incoming");
        let reasons = job.inner.read().unwrap().reasons;
        assert!(reasons & JREASON_JOB_PRINTING != 0);
        assert!(reasons & platen_core::types::JREASON_JOB_INCOMING != 0);
    }

    // -- ATTR parsing -------------------------------------------------------

    #[test]
    fn attr_updates_job_counters() {
        let (system, printer, job) = fixture();
        apply_attr_line(
            &system,
            &printer,
            &job,
            " job-impressions=10 job-impressions-completed=4",
        );
        let inner = job.inner.read().unwrap();
        assert_eq!(inner.impressions, Some(10));
        assert_eq!(inner.impcompleted, 4);
    }

    #[test]
    fn impressions_completed_is_monotonic() {
        let (system, printer, job) = fixture();
        apply_attr_line(&system, &printer, &job, "job-impressions-completed=5");
        apply_attr_line(&system, &printer, &job, "job-impressions-completed=3");
        assert_eq!(job.inner.read().unwrap().impcompleted, 5);
    }

    #[test]
    fn attr_replaces_marker_attributes_on_printer() {
        let (system, printer, job) = fixture();
        apply_attr_line(&system, &printer, &job, "marker-levels=90,50 marker-colors=%23000000");
        let pinner = printer.inner.read().unwrap();
        let levels = pinner.pinfo.find("marker-levels").unwrap();
        assert_eq!(levels.values, vec![Value::Integer(90), Value::Integer(50)]);
        let colors = pinner.pinfo.find("marker-colors").unwrap();
        assert_eq!(colors.as_str(), Some("#000000"));
    }

    #[test]
    fn url_decode_escapes() {
        assert_eq!(url_decode("a%20b"), "a b");
        assert_eq!(url_decode("no-escapes"), "no-escapes");
        assert_eq!(url_decode("%2f%2F"), "//");
        assert_eq!(url_decode("trailing%2"), "trailing%2");
    }

    // -- Environment --------------------------------------------------------

    #[test]
    fn env_names_are_upper_snake() {
        assert_eq!(env_name("media-col-default"), "IPP_MEDIA_COL_DEFAULT");
        assert_eq!(env_name("pwg-raster-document-sheet-back"), "IPP_PWG_RASTER_DOCUMENT_SHEET_BACK");
    }

    #[test]
    fn env_includes_transport_and_attr_entries() {
        let (system, printer, job) = fixture();
        job.inner
            .write()
            .unwrap()
            .attrs
            .add(Attribute::integer("copies", 2));
        job.inner
            .write()
            .unwrap()
            .doc_attrs
            .add(Attribute::keyword("sides", "one-sided"));
        let env = build_env(&system, &printer, &job).unwrap();
        assert_eq!(env.get("CONTENT_TYPE").map(String::as_str), Some("application/octet-stream"));
        assert!(env.contains_key("DEVICE_URI"));
        assert!(env.contains_key("OUTPUT_TYPE"));
        assert!(env.contains_key("SERVER_LOGLEVEL"));
        assert_eq!(env.get("IPP_COPIES").map(String::as_str), Some("2"));
        assert_eq!(env.get("IPP_SIDES").map(String::as_str), Some("one-sided"));
        // Printer defaults ride along.
        assert_eq!(env.get("IPP_MEDIA_DEFAULT").map(String::as_str), Some("iso_a4_210x297mm"));
    }

    #[test]
    fn doc_attrs_win_over_job_attrs() {
        let (system, printer, job) = fixture();
        {
            let mut inner = job.inner.write().unwrap();
            inner.attrs.add(Attribute::keyword("sides", "one-sided"));
            inner
                .doc_attrs
                .add(Attribute::keyword("sides", "two-sided-long-edge"));
        }
        let env = build_env(&system, &printer, &job).unwrap();
        assert_eq!(
            env.get("IPP_SIDES").map(String::as_str),
            Some("two-sided-long-edge")
        );
    }

    #[test]
    fn oversized_env_value_fails() {
        let (system, printer, job) = fixture();
        let huge = "x".repeat(MAX_ENV_VALUE + 1);
        job.inner
            .write()
            .unwrap()
            .attrs
            .add(Attribute::text("job-message-to-operator", &huge));
        assert!(build_env(&system, &printer, &job).is_err());
    }

    // -- Cancel / stop preconditions ---------------------------------------

    #[test]
    fn cancel_pending_job_is_immediate() {
        let (system, printer, job) = fixture();
        cancel_job(&system, &printer, &job).unwrap();
        assert_eq!(job.state(), JobState::Canceled);
    }

    #[test]
    fn cancel_terminal_job_is_not_possible() {
        let (system, printer, job) = fixture();
        cancel_job(&system, &printer, &job).unwrap();
        assert!(matches!(
            cancel_job(&system, &printer, &job),
            Err(PlatenError::NotPossible(_))
        ));
    }

    #[test]
    fn stop_requires_processing() {
        let (system, printer, job) = fixture();
        assert!(matches!(
            stop_job(&system, &printer, &job),
            Err(PlatenError::NotPossible(_))
        ));
    }
}
