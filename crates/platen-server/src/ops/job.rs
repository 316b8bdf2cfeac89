// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job and document operations.

use std::sync::Arc;

use tracing::{debug, info};

use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_core::types::{
    JREASON_JOB_HOLD_UNTIL_SPECIFIED, JobState, PREASON_HOLD_NEW_JOBS,
};
use platen_ipp::attr::{Attribute, AttributeGroup};
use platen_ipp::message::Message;
use platen_ipp::model::{DelimiterTag, StatusCode, ValueTag};
use platen_ipp::value::Value;

use crate::auth::{self, Policy};
use crate::engine;
use crate::events;
use crate::job::{self, Job};
use crate::ops::{Ctx, add_filtered_group, privacy_filter, unsupported_response};
use crate::printer::Printer;
use crate::validate::{self, JOB_CREATION};

/// Outcome of the shared job-creation path.
enum Created {
    Job(Arc<Job>),
    Rejected(Message),
}

// ---------------------------------------------------------------------------
// Job creation
// ---------------------------------------------------------------------------

/// Print-Job: create a job and spool the request body as its document.
pub fn print_job(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::PrintGroup, Some(&printer))?;

    let job = match new_job(ctx, &printer)? {
        Created::Job(job) => job,
        Created::Rejected(resp) => return Ok(resp),
    };

    if let Err(e) = spool_document(ctx, &printer, &job, &ctx.req.payload) {
        abort_intake(ctx, &printer, &job);
        return Err(e);
    }
    finish_intake(ctx, &printer, &job);

    Ok(job_created_response(ctx, &printer, &job))
}

/// Print-URI: create a job whose document is fetched from a URI.
pub async fn print_uri(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::PrintGroup, Some(&printer))?;

    let uri = document_uri(ctx.req)?;
    let job = match new_job(ctx, &printer)? {
        Created::Job(job) => job,
        Created::Rejected(resp) => return Ok(resp),
    };

    if let Err(e) = fetch_into_spool(ctx, &printer, &job, &uri).await {
        abort_intake(ctx, &printer, &job);
        return Err(e);
    }
    finish_intake(ctx, &printer, &job);

    Ok(job_created_response(ctx, &printer, &job))
}

/// Validate-Job: run the full creation validation with no side effects.
pub fn validate_job(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::PrintGroup, Some(&printer))?;

    let offenders = validate_creation(ctx, &printer);
    if !offenders.is_empty() {
        return Ok(unsupported_response(ctx.req, offenders, false));
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Create-Job: a job with no document yet; Send-Document supplies it.
pub fn create_job(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::PrintGroup, Some(&printer))?;

    let job = match new_job(ctx, &printer)? {
        Created::Job(job) => job,
        Created::Rejected(resp) => return Ok(resp),
    };
    job.inner.write_lock().spooling = true;
    finish_intake(ctx, &printer, &job);

    Ok(job_created_response(ctx, &printer, &job))
}

/// Send-Document: attach the single document to a Create-Job job.
pub fn send_document(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    require_owner_or_admin(ctx, &job)?;

    let last = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "last-document")
        .and_then(|a| a.as_bool())
        .unwrap_or(true);
    if !last {
        return Err(PlatenError::NotPossible(
            "multiple documents per job are not supported".into(),
        ));
    }

    {
        let inner = job.inner.read_lock();
        if inner.state.is_terminal() {
            return Err(PlatenError::NotPossible(format!(
                "job {} is already {:?}",
                job.id, inner.state
            )));
        }
        if !inner.spooling && inner.filename.is_some() {
            return Err(PlatenError::NotPossible(format!(
                "job {} already has its document",
                job.id
            )));
        }
    }

    spool_document(ctx, &printer, &job, &ctx.req.payload)?;
    job.inner.write_lock().spooling = false;
    printer.sched.notify_one();

    Ok(job_created_response(ctx, &printer, &job))
}

/// Send-URI: like Send-Document, with the payload fetched from a URI.
pub async fn send_uri(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    require_owner_or_admin(ctx, &job)?;

    let uri = document_uri(ctx.req)?;
    fetch_into_spool(ctx, &printer, &job, &uri).await?;
    job.inner.write_lock().spooling = false;
    printer.sched.notify_one();

    Ok(job_created_response(ctx, &printer, &job))
}

// -- Creation internals -----------------------------------------------------

fn validate_creation(ctx: &Ctx<'_>, printer: &Arc<Printer>) -> Vec<Attribute> {
    let supported: Vec<String> = {
        let inner = printer.inner.read_lock();
        inner
            .pinfo
            .find("job-creation-attributes-supported")
            .map(|a| a.strings().iter().map(|s| s.to_string()).collect())
            .unwrap_or_default()
    };
    let supported_refs: Vec<&str> = supported.iter().map(String::as_str).collect();
    let supported = if supported_refs.is_empty() {
        None
    } else {
        Some(supported_refs.as_slice())
    };
    validate::validate_group(ctx.req, DelimiterTag::JobAttributes, JOB_CREATION, supported, true)
}

fn new_job(ctx: &Ctx<'_>, printer: &Arc<Printer>) -> Result<Created> {
    {
        let inner = printer.inner.read_lock();
        if !inner.is_accepting || inner.is_shutdown {
            return Err(PlatenError::NotAcceptingJobs);
        }
        if inner.active_jobs.len() >= ctx.system.config.max_jobs_per_printer {
            return Err(PlatenError::TooManyJobs);
        }
    }

    let offenders = validate_creation(ctx, printer);
    if !offenders.is_empty() {
        return Ok(Created::Rejected(unsupported_response(ctx.req, offenders, false)));
    }

    let username = auth::effective_username(ctx.username, ctx.req);
    let name = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "job-name")
        .and_then(|a| a.as_str())
        .or_else(|| {
            ctx.req
                .find(DelimiterTag::JobAttributes, "job-name")
                .and_then(|a| a.as_str())
        })
        .unwrap_or("untitled")
        .to_string();
    let priority = ctx
        .req
        .find(DelimiterTag::JobAttributes, "job-priority")
        .and_then(|a| a.as_i32())
        .unwrap_or(50);

    let job = Job::create(ctx.system.next_job_id(), printer.id, &username, &name, priority);

    // Gather everything that needs printer or resource locks before
    // taking the job lock (printer before job, never the reverse).
    let templates = template_attrs(ctx, printer, "template-job");
    let held_by_printer =
        printer.inner.read_lock().reasons & PREASON_HOLD_NEW_JOBS != 0;

    {
        let mut inner = job.inner.write_lock();

        // Template-job resources supply defaults before the request's own
        // attributes land on top.
        for template in templates {
            if validate::schema_row(JOB_CREATION, &template.name).is_some() {
                inner.attrs.replace(template);
            }
        }
        if let Some(group) = ctx.req.group(DelimiterTag::JobAttributes) {
            for attr in &group.attrs {
                inner.attrs.replace(attr.clone());
            }
        }
        if let Some(op) = ctx.req.op_attrs() {
            for name in ["document-name", "document-format", "compression"] {
                if let Some(attr) = op.find(name) {
                    inner.doc_attrs.replace(attr.clone());
                }
            }
        }

        // Hold semantics: an explicit hold attribute, or a printer
        // currently holding new jobs.
        let hold_kw = inner
            .attrs
            .find("job-hold-until")
            .and_then(|a| a.as_str())
            .map(str::to_string);
        let hold_time = inner
            .attrs
            .find_with_tag("job-hold-until-time", ValueTag::DateTime)
            .is_some();
        if let Some(kw) = hold_kw {
            if let Some(until) = job::hold_until_time(&kw, job.created) {
                inner.hold_until = Some(until);
                inner.state = JobState::Held;
                inner.reasons |= JREASON_JOB_HOLD_UNTIL_SPECIFIED;
            }
        } else if hold_time {
            inner.hold_until = Some(chrono::DateTime::<chrono::Utc>::MAX_UTC);
            inner.state = JobState::Held;
            inner.reasons |= JREASON_JOB_HOLD_UNTIL_SPECIFIED;
        } else if held_by_printer {
            inner.hold_until = None;
            inner.state = JobState::Held;
            inner.reasons |= JREASON_JOB_HOLD_UNTIL_SPECIFIED;
        }
    }

    info!(
        printer = printer.id,
        job = job.id,
        user = %job.username(),
        "job created"
    );
    Ok(Created::Job(job))
}

/// Stored attribute sets of installed template resources of `rtype`
/// allocated to this printer.
fn template_attrs(ctx: &Ctx<'_>, printer: &Arc<Printer>, rtype: &str) -> Vec<Attribute> {
    let resource_ids = printer.inner.read_lock().resources.clone();
    let mut out = Vec::new();
    for id in resource_ids {
        if let Some(resource) = ctx.system.resource_by_id(id) {
            let inner = resource.inner.read_lock();
            if inner.rtype == rtype {
                out.extend(inner.attrs.attrs.iter().cloned());
            }
        }
    }
    out
}

/// Template-printer attribute sets for Create-Printer, from any
/// installed template-printer resource in the registry.
pub fn printer_template_attrs(system: &crate::store::System) -> Vec<Attribute> {
    let mut out = Vec::new();
    for resource in system.all_resources() {
        let inner = resource.inner.read_lock();
        if inner.rtype == "template-printer"
            && inner.state == platen_core::types::ResourceState::Installed
        {
            out.extend(inner.attrs.attrs.iter().cloned());
        }
    }
    out
}

fn document_uri(req: &Message) -> Result<String> {
    req.find(DelimiterTag::OperationAttributes, "document-uri")
        .and_then(|a| a.as_str())
        .map(str::to_string)
        .ok_or_else(|| PlatenError::BadRequest("missing document-uri".into()))
}

/// Resolve the job's format and write the document to its spool file.
fn spool_document(
    ctx: &Ctx<'_>,
    printer: &Arc<Printer>,
    job: &Arc<Job>,
    data: &[u8],
) -> Result<()> {
    let declared = resolve_format(ctx, printer);
    let mut format = declared.clone();
    if format == "application/octet-stream" && !data.is_empty() {
        if let Some(detected) = job::detect_format(&data[..data.len().min(8)]) {
            format = detected.to_string();
            job.inner
                .write_lock()
                .doc_attrs
                .replace(Attribute::mime_type("document-format-detected", detected));
        }
    }

    let printer_name = printer.inner.read_lock().name.clone();
    let path = job.spool_path(&ctx.system.config, &printer_name, &format);
    std::fs::create_dir_all(&ctx.system.config.spool_dir)?;
    std::fs::write(&path, data)?;
    debug!(job = job.id, path = %path.display(), bytes = data.len(), "document spooled");

    let mut inner = job.inner.write_lock();
    inner.format = format;
    inner.filename = Some(path);
    inner.spooling = false;
    Ok(())
}

async fn fetch_into_spool(
    ctx: &Ctx<'_>,
    printer: &Arc<Printer>,
    job: &Arc<Job>,
    uri: &str,
) -> Result<()> {
    let declared = resolve_format(ctx, printer);
    let printer_name = printer.inner.read_lock().name.clone();
    let path = job.spool_path(&ctx.system.config, &printer_name, &declared);
    tokio::fs::create_dir_all(&ctx.system.config.spool_dir).await?;

    let content_type = crate::uri::fetch_document(&ctx.system.config, uri, &path).await?;

    let mut format = declared;
    if format == "application/octet-stream" {
        let head = std::fs::File::open(&path).and_then(|mut f| {
            use std::io::Read;
            let mut buf = [0u8; 8];
            let n = f.read(&mut buf)?;
            Ok(buf[..n].to_vec())
        })?;
        if let Some(detected) = job::detect_format(&head) {
            format = detected.to_string();
            job.inner
                .write_lock()
                .doc_attrs
                .replace(Attribute::mime_type("document-format-detected", detected));
        } else if let Some(ct) = content_type {
            format = ct;
        }
    }

    let mut inner = job.inner.write_lock();
    inner.format = format;
    inner.filename = Some(path);
    inner.spooling = false;
    Ok(())
}

/// Format precedence: detected > declared > printer default > octet-stream.
fn resolve_format(ctx: &Ctx<'_>, printer: &Arc<Printer>) -> String {
    let from_req = |name: &str| {
        ctx.req
            .find(DelimiterTag::OperationAttributes, name)
            .and_then(|a| a.as_str())
            .map(str::to_string)
    };
    from_req("document-format-detected")
        .or_else(|| from_req("document-format"))
        .or_else(|| {
            printer
                .inner
                .read_lock()
                .pinfo
                .find("document-format-default")
                .and_then(|a| a.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "application/octet-stream".into())
}

fn finish_intake(ctx: &Ctx<'_>, printer: &Arc<Printer>, job: &Arc<Job>) {
    printer.enqueue_job(Arc::clone(job));
    job::announce_created(ctx.system, printer, job);
}

fn abort_intake(ctx: &Ctx<'_>, printer: &Arc<Printer>, job: &Arc<Job>) {
    printer.enqueue_job(Arc::clone(job));
    job::transition(
        ctx.system,
        printer,
        job,
        JobState::Aborted,
        platen_core::types::JREASON_ABORTED_BY_SYSTEM
            | platen_core::types::JREASON_DOCUMENT_ACCESS_ERROR,
        0,
    );
}

fn job_created_response(ctx: &Ctx<'_>, printer: &Arc<Printer>, job: &Arc<Job>) -> Message {
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let uri = printer.uri(&ctx.system.config);
    resp.groups.push(job.status_attributes(&uri));
    resp
}

// ---------------------------------------------------------------------------
// Job queries
// ---------------------------------------------------------------------------

/// Get-Job-Attributes: full set for the owner or an administrator,
/// privacy-filtered for anyone else.
pub fn get_job_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    let uri = printer.uri(&ctx.system.config);
    let group = job.status_attributes(&uri);
    let owner = job.username();
    let visible = if auth::can_view_all(&ctx.system.config, ctx.username, ctx.req, &owner) {
        group
    } else {
        privacy_filter(&group)
    };

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();
    add_filtered_group(
        &mut resp,
        DelimiterTag::JobAttributes,
        &visible,
        requested.as_deref(),
    );
    Ok(resp)
}

/// Get-Jobs: which-jobs / my-jobs / limit, one group per job.
pub fn get_jobs(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    let op = ctx.req.op_attrs();
    let which = op
        .and_then(|g| g.find("which-jobs"))
        .and_then(|a| a.as_str())
        .unwrap_or("not-completed");
    let my_jobs = op
        .and_then(|g| g.find("my-jobs"))
        .and_then(|a| a.as_bool())
        .unwrap_or(false);
    let limit = op
        .and_then(|g| g.find("limit"))
        .and_then(|a| a.as_i32())
        .unwrap_or(i32::MAX)
        .max(0) as usize;
    let requester = auth::effective_username(ctx.username, ctx.req);

    // Get-Jobs defaults to the identification pair unless the client
    // asked for more.
    let requested = ctx.requested();
    let requested = requested
        .as_deref()
        .map(|r| r.to_vec())
        .unwrap_or_else(|| vec!["job-id", "job-uri"]);

    let uri = printer.uri(&ctx.system.config);
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let mut count = 0usize;
    for job in printer.all_jobs() {
        if count >= limit {
            break;
        }
        let state = job.state();
        let selected = match which {
            "completed" => state.is_terminal(),
            "all" => true,
            _ => !state.is_terminal(),
        };
        if !selected {
            continue;
        }
        let owner = job.username();
        if my_jobs && owner != requester {
            continue;
        }
        let group = job.status_attributes(&uri);
        let visible = if auth::can_view_all(&ctx.system.config, ctx.username, ctx.req, &owner) {
            group
        } else {
            privacy_filter(&group)
        };
        add_filtered_group(
            &mut resp,
            DelimiterTag::JobAttributes,
            &visible,
            Some(&requested),
        );
        count += 1;
    }
    Ok(resp)
}

/// Set-Job-Attributes: settable semantics against the creation schema.
pub fn set_job_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    require_owner_or_admin(ctx, &job)?;
    if job.state().is_terminal() {
        return Err(PlatenError::NotPossible(format!(
            "job {} is in a terminal state",
            job.id
        )));
    }

    let offenders =
        validate::validate_group(ctx.req, DelimiterTag::JobAttributes, JOB_CREATION, None, false);
    if !offenders.is_empty() {
        return Ok(unsupported_response(ctx.req, offenders, true));
    }

    if let Some(group) = ctx.req.group(DelimiterTag::JobAttributes) {
        let mut inner = job.inner.write_lock();
        for attr in &group.attrs {
            if attr.value() == Some(&Value::DeleteAttribute) {
                inner.attrs.remove(&attr.name);
                continue;
            }
            if attr.name == "job-priority" {
                if let Some(v) = attr.as_i32() {
                    inner.priority = v;
                }
            }
            inner.attrs.replace(attr.clone());
        }
    }
    events::add_event(
        ctx.system,
        Some(&printer),
        Some(&job),
        platen_core::types::EVENT_JOB_CONFIG_CHANGED,
        &format!("Job {} attributes changed.", job.id),
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Close-Job: with single-document jobs there is nothing left to add;
/// confirm and report current status.
pub fn close_job(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    require_owner_or_admin(ctx, &job)?;
    {
        let mut inner = job.inner.write_lock();
        inner.spooling = false;
    }
    printer.sched.notify_one();
    Ok(job_created_response(ctx, &printer, &job))
}

// ---------------------------------------------------------------------------
// Cancel / hold / release
// ---------------------------------------------------------------------------

pub fn cancel_job(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    require_owner_or_admin(ctx, &job)?;
    engine::cancel_job(ctx.system, &printer, &job)?;
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

pub fn cancel_current_job(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, Some(&printer))?;
    let current = printer
        .inner
        .read_lock()
        .processing_job
        .clone();
    match current {
        Some(job) => {
            engine::cancel_job(ctx.system, &printer, &job)?;
            Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
        }
        None => Err(PlatenError::NotPossible("no job is processing".into())),
    }
}

/// Cancel-Jobs (admin, all jobs) and Cancel-My-Jobs (requester's own).
pub fn cancel_jobs(ctx: &Ctx<'_>, my_jobs_only: bool) -> Result<Message> {
    let printer = ctx.printer()?;
    if !my_jobs_only {
        auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, Some(&printer))?;
    }
    let requester = auth::effective_username(ctx.username, ctx.req);

    for job in printer.active_jobs() {
        if my_jobs_only && job.username() != requester {
            continue;
        }
        // Jobs that finished while iterating are fine to skip.
        let _ = engine::cancel_job(ctx.system, &printer, &job);
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

pub fn hold_job(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    require_owner_or_admin(ctx, &job)?;

    let keyword = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "job-hold-until")
        .or_else(|| ctx.req.find(DelimiterTag::JobAttributes, "job-hold-until"))
        .and_then(|a| a.as_str())
        .unwrap_or("indefinite")
        .to_string();

    {
        let inner = job.inner.read_lock();
        if inner.state.is_terminal() || inner.state == JobState::Processing {
            return Err(PlatenError::NotPossible(format!(
                "job {} cannot be held while {:?}",
                job.id, inner.state
            )));
        }
    }
    {
        let mut inner = job.inner.write_lock();
        inner.hold_until = job::hold_until_time(&keyword, chrono::Utc::now());
        inner
            .attrs
            .replace(Attribute::keyword("job-hold-until", &keyword));
    }
    job::transition(
        ctx.system,
        &printer,
        &job,
        JobState::Held,
        JREASON_JOB_HOLD_UNTIL_SPECIFIED,
        0,
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

pub fn release_job(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    require_owner_or_admin(ctx, &job)?;

    if job.state() != JobState::Held {
        return Err(PlatenError::NotPossible(format!(
            "job {} is not held",
            job.id
        )));
    }
    {
        let mut inner = job.inner.write_lock();
        inner.hold_until = None;
        inner.attrs.remove("job-hold-until");
        inner.attrs.remove("job-hold-until-time");
    }
    job::transition(
        ctx.system,
        &printer,
        &job,
        JobState::Pending,
        0,
        JREASON_JOB_HOLD_UNTIL_SPECIFIED,
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Hold-New-Jobs: newly created jobs go to `held` until released.
pub fn hold_new_jobs(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, Some(&printer))?;
    printer.update_reasons(PREASON_HOLD_NEW_JOBS, 0);
    events::add_event(
        ctx.system,
        Some(&printer),
        None,
        platen_core::types::EVENT_PRINTER_STATE_CHANGED,
        "Holding new jobs.",
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Release-Held-New-Jobs: clear the hold reason and release the jobs it
/// captured (held with no explicit hold time).
pub fn release_held_new_jobs(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, Some(&printer))?;
    printer.update_reasons(0, PREASON_HOLD_NEW_JOBS);

    for job in printer.active_jobs() {
        let release = {
            let inner = job.inner.read_lock();
            inner.state == JobState::Held && inner.hold_until.is_none()
        };
        if release {
            job::transition(
                ctx.system,
                &printer,
                &job,
                JobState::Pending,
                0,
                JREASON_JOB_HOLD_UNTIL_SPECIFIED,
            );
        }
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

// ---------------------------------------------------------------------------
// Document operations (single document, number 1)
// ---------------------------------------------------------------------------

fn require_document_one(ctx: &Ctx<'_>) -> Result<()> {
    let number = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "document-number")
        .and_then(|a| a.as_i32())
        .unwrap_or(1);
    if number != 1 {
        return Err(PlatenError::NotFound(format!(
            "document {number} not found (single-document jobs)"
        )));
    }
    Ok(())
}

fn document_group(ctx: &Ctx<'_>, printer: &Arc<Printer>, job: &Arc<Job>) -> AttributeGroup {
    let inner = job.inner.read_lock();
    let mut g = AttributeGroup::new(DelimiterTag::DocumentAttributes);
    g.add(Attribute::integer("document-number", 1));
    g.add(Attribute::uri(
        "document-job-uri",
        &format!("{}/{}", printer.uri(&ctx.system.config), job.id),
    ));
    g.add(Attribute::integer("document-job-id", job.id));
    g.add(Attribute::mime_type("document-format", &inner.format));
    g.add(Attribute::enum_value("document-state", inner.state.ipp_enum()));
    g.add(Attribute::keywords(
        "document-state-reasons",
        &platen_core::types::job_reason_keywords(inner.reasons),
    ));
    for attr in &inner.doc_attrs.attrs {
        if g.find(&attr.name).is_none() {
            g.add(attr.clone());
        }
    }
    g
}

pub fn get_document_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    require_document_one(ctx)?;
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();
    add_filtered_group(
        &mut resp,
        DelimiterTag::DocumentAttributes,
        &document_group(ctx, &printer, &job),
        requested.as_deref(),
    );
    Ok(resp)
}

pub fn get_documents(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();
    add_filtered_group(
        &mut resp,
        DelimiterTag::DocumentAttributes,
        &document_group(ctx, &printer, &job),
        requested.as_deref(),
    );
    Ok(resp)
}

pub fn cancel_document(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    require_owner_or_admin(ctx, &job)?;
    require_document_one(ctx)?;
    // Canceling the only document cancels the job.
    engine::cancel_job(ctx.system, &printer, &job)?;
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

pub fn set_document_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let (_, job) = ctx.job()?;
    require_owner_or_admin(ctx, &job)?;
    require_document_one(ctx)?;
    if job.state().is_terminal() {
        return Err(PlatenError::NotPossible(format!(
            "job {} is in a terminal state",
            job.id
        )));
    }

    let offenders = validate::validate_group(
        ctx.req,
        DelimiterTag::DocumentAttributes,
        JOB_CREATION,
        None,
        false,
    );
    if !offenders.is_empty() {
        return Ok(unsupported_response(ctx.req, offenders, true));
    }

    if let Some(group) = ctx.req.group(DelimiterTag::DocumentAttributes) {
        let mut inner = job.inner.write_lock();
        for attr in &group.attrs {
            if attr.value() == Some(&Value::DeleteAttribute) {
                inner.doc_attrs.remove(&attr.name);
            } else {
                inner.doc_attrs.replace(attr.clone());
            }
        }
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

pub fn validate_document(ctx: &Ctx<'_>) -> Result<Message> {
    let offenders = validate::validate_group(
        ctx.req,
        DelimiterTag::DocumentAttributes,
        JOB_CREATION,
        None,
        true,
    );
    if !offenders.is_empty() {
        return Ok(unsupported_response(ctx.req, offenders, false));
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

// ---------------------------------------------------------------------------

fn require_owner_or_admin(ctx: &Ctx<'_>, job: &Arc<Job>) -> Result<()> {
    let owner = job.username();
    if auth::can_view_all(&ctx.system.config, ctx.username, ctx.req, &owner) {
        Ok(())
    } else {
        Err(PlatenError::Forbidden)
    }
}
