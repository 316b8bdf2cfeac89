// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output-device (proxy) operations: registration, capability updates,
// job state reconciliation, and the fetch/acknowledge pull protocol.

use std::sync::Arc;

use tracing::{error, info, warn};

use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_core::types::{
    EVENT_PRINTER_CONFIG_CHANGED, EVENT_PRINTER_CREATED, JREASON_JOB_CANCELED_AT_DEVICE,
    JREASON_JOB_COMPLETED_SUCCESSFULLY, JREASON_JOB_FETCHABLE, JobState, job_reason_bit,
};
use platen_ipp::attr::Attribute;
use platen_ipp::message::Message;
use platen_ipp::model::{DelimiterTag, StatusCode};
use platen_ipp::value::Value;

use crate::auth::{self, Policy};
use crate::device::{OutputDevice, overlay};
use crate::engine;
use crate::events;
use crate::job::{self, Job};
use crate::ops::Ctx;
use crate::printer::Printer;

/// Output devices one printer will fan out to at most.
const MAX_DEVICES_PER_PRINTER: usize = 4;

fn device_uuid(ctx: &Ctx<'_>) -> Result<String> {
    ctx.req
        .find(DelimiterTag::OperationAttributes, "output-device-uuid")
        .and_then(|a| a.as_str())
        .map(str::to_string)
        .ok_or_else(|| PlatenError::BadRequest("missing output-device-uuid".into()))
}

fn device_on(printer: &Arc<Printer>, uuid: &str) -> Option<Arc<OutputDevice>> {
    printer
        .inner
        .read_lock()
        .devices
        .iter()
        .find(|d| d.uuid == uuid)
        .cloned()
}

/// Refresh the printer's merged device-attribute view after an update.
fn refresh_dev_attrs(printer: &Arc<Printer>) {
    let devices = printer.inner.read_lock().devices.clone();
    let mut merged = platen_ipp::attr::AttributeGroup::new(DelimiterTag::PrinterAttributes);
    for device in devices {
        merged = overlay(&merged, &device.snapshot());
    }
    printer.inner.write_lock().dev_attrs = merged;
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Register-Output-Device: reuse the printer already carrying the uuid,
/// else join any proxy-visible printer with capacity, else create a new
/// printer under /ipp/print/ named from the uuid tail.
pub fn register_output_device(ctx: &Ctx<'_>) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, None)?;
    let uuid = device_uuid(ctx)?;

    // 1: a printer that already knows this device.
    for printer in ctx.system.all_printers() {
        if device_on(&printer, &uuid).is_some() {
            return Ok(registered_response(ctx, &printer));
        }
    }

    // 2: any printer with device capacity.
    for printer in ctx.system.all_printers() {
        let count = printer.inner.read_lock().devices.len();
        if count > 0 && count < MAX_DEVICES_PER_PRINTER {
            attach_device(&printer, &uuid);
            info!(printer = printer.id, device = %uuid, "output device joined printer");
            return Ok(registered_response(ctx, &printer));
        }
    }

    // 3: a fresh printer named from the uuid tail.
    let tail = uuid
        .rsplit(&[':', '-'][..])
        .next()
        .unwrap_or_default()
        .to_string();
    if tail.is_empty() {
        // Building the resource path failed; report rather than guess.
        error!(device = %uuid, "cannot derive a printer path from device uuid");
        return Err(PlatenError::Internal(format!(
            "cannot derive printer path from output-device-uuid '{uuid}'"
        )));
    }
    let path = format!("/ipp/print/{tail}");
    if ctx.system.printer_by_path(&path).is_some() {
        return Err(PlatenError::Internal(format!(
            "derived printer path '{path}' already exists"
        )));
    }

    let printer = Printer::create(ctx.system.next_printer_id(), &tail, &path, &ctx.system.config);
    attach_device(&printer, &uuid);
    ctx.system.add_printer(Arc::clone(&printer));
    tokio::spawn(engine::printer_loop(
        Arc::clone(ctx.system),
        Arc::clone(&printer),
    ));
    events::add_event(
        ctx.system,
        Some(&printer),
        None,
        EVENT_PRINTER_CREATED,
        &format!("Printer '{tail}' created for output device."),
    );
    info!(printer = printer.id, device = %uuid, path = %path, "printer created for output device");
    Ok(registered_response(ctx, &printer))
}

fn attach_device(printer: &Arc<Printer>, uuid: &str) {
    let device = OutputDevice::new(uuid);
    printer
        .inner
        .write_lock()
        .devices
        .push(device);
}

fn registered_response(ctx: &Ctx<'_>, printer: &Arc<Printer>) -> Message {
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let mut group = printer.status_attributes(&ctx.system.config);
    group.add(Attribute::uri(
        "printer-xri-supported",
        &printer.uri(&ctx.system.config),
    ));
    resp.groups.push(group);
    resp
}

/// Deregister-Output-Device: detach; pending fetchable work returns to
/// the local queue.
pub fn deregister_output_device(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;
    let uuid = device_uuid(ctx)?;

    let removed = {
        let mut inner = printer.inner.write_lock();
        let before = inner.devices.len();
        inner.devices.retain(|d| d.uuid != uuid);
        inner.devices.len() != before
    };
    if !removed {
        return Err(PlatenError::NotFound(format!(
            "output device {uuid} is not registered here"
        )));
    }
    refresh_dev_attrs(&printer);

    for active in printer.active_jobs() {
        let mut inner = active.inner.write_lock();
        if inner.dev_uuid.as_deref() == Some(uuid.as_str()) {
            inner.dev_uuid = None;
            inner.dev_state = None;
            inner.dev_reasons = 0;
        }
    }
    events::add_event(
        ctx.system,
        Some(&printer),
        None,
        EVENT_PRINTER_CONFIG_CHANGED,
        "Output device deregistered.",
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

// ---------------------------------------------------------------------------
// Capability and status updates
// ---------------------------------------------------------------------------

pub fn get_output_device_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;
    let uuid = device_uuid(ctx)?;
    let device = device_on(&printer, &uuid)
        .ok_or_else(|| PlatenError::NotFound(format!("output device {uuid} not found")))?;

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();
    crate::ops::add_filtered_group(
        &mut resp,
        DelimiterTag::PrinterAttributes,
        &device.snapshot(),
        requested.as_deref(),
    );
    Ok(resp)
}

/// Update-Output-Device-Attributes: whole-attribute replacement plus the
/// sparse `name.N` / `name.N-M` indexed forms.
pub fn update_output_device_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;
    let uuid = device_uuid(ctx)?;
    let device = device_on(&printer, &uuid)
        .ok_or_else(|| PlatenError::NotFound(format!("output device {uuid} not found")))?;

    if let Some(group) = ctx.req.group(DelimiterTag::PrinterAttributes) {
        device.merge(group)?;
        refresh_dev_attrs(&printer);
    }
    events::add_event(
        ctx.system,
        Some(&printer),
        None,
        EVENT_PRINTER_CONFIG_CHANGED,
        "Output device attributes updated.",
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Update-Active-Jobs: reconcile the proxy's job list with ours; the
/// response reports every disagreement.
pub fn update_active_jobs(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;
    let uuid = device_uuid(ctx)?;

    let op = ctx.req.op_attrs();
    let proxy_ids: Vec<i32> = op
        .and_then(|g| g.find("job-ids"))
        .map(|a| a.values.iter().filter_map(|v| v.as_i32()).collect())
        .unwrap_or_default();
    let proxy_states: Vec<i32> = op
        .and_then(|g| g.find("output-device-job-states"))
        .map(|a| a.values.iter().filter_map(|v| v.as_i32()).collect())
        .unwrap_or_default();

    let mut mismatch_ids: Vec<Value> = Vec::new();
    let mut mismatch_states: Vec<Value> = Vec::new();

    // Jobs the proxy reported: flag those already finished here or in a
    // different state than claimed.
    for (index, id) in proxy_ids.iter().enumerate() {
        let claimed = proxy_states
            .get(index)
            .copied()
            .and_then(JobState::from_ipp_enum);
        match printer.job_by_id(*id) {
            Some(job) => {
                let state = job.state();
                if state.is_terminal() || claimed.map(|c| c != state).unwrap_or(true) {
                    mismatch_ids.push(Value::Integer(*id));
                    mismatch_states.push(Value::Enum(state.ipp_enum()));
                }
            }
            None => {
                mismatch_ids.push(Value::Integer(*id));
                mismatch_states.push(Value::Enum(JobState::Aborted.ipp_enum()));
            }
        }
    }

    // Jobs assigned to this device the proxy failed to mention.
    for active in printer.active_jobs() {
        let assigned = active.inner.read_lock().dev_uuid.as_deref()
            == Some(uuid.as_str());
        if assigned && !proxy_ids.contains(&active.id) {
            mismatch_ids.push(Value::Integer(active.id));
            mismatch_states.push(Value::Enum(active.state().ipp_enum()));
        }
    }

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    if !mismatch_ids.is_empty() {
        resp.add(
            DelimiterTag::OperationAttributes,
            Attribute::with_values("job-ids", mismatch_ids),
        );
        resp.add(
            DelimiterTag::OperationAttributes,
            Attribute::with_values("output-device-job-states", mismatch_states),
        );
    }
    Ok(resp)
}

/// Update-Job-Status: the proxy reports its view of one job.
pub fn update_job_status(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;

    let op = ctx.req.op_attrs();
    let dev_state = op
        .and_then(|g| g.find("output-device-job-state"))
        .and_then(|a| a.as_i32())
        .and_then(JobState::from_ipp_enum);
    let dev_message = op
        .and_then(|g| g.find("output-device-job-state-message"))
        .and_then(|a| a.as_str())
        .map(str::to_string);
    let dev_reasons = op
        .and_then(|g| g.find("output-device-job-state-reasons"))
        .map(|a| {
            a.strings()
                .iter()
                .filter_map(|kw| job_reason_bit(kw))
                .fold(0, |acc, bit| acc | bit)
        })
        .unwrap_or(0);
    let impressions_completed = op
        .and_then(|g| g.find("job-impressions-completed"))
        .and_then(|a| a.as_i32());

    {
        let mut inner = job.inner.write_lock();
        inner.dev_state = dev_state;
        inner.dev_reasons = dev_reasons;
        inner.dev_state_message = dev_message;
        if let Some(v) = impressions_completed {
            if v > inner.impcompleted {
                inner.impcompleted = v;
            }
        }
    }

    // Terminal device states finish the job here too.
    match dev_state {
        Some(JobState::Completed) => job::transition(
            ctx.system,
            &printer,
            &job,
            JobState::Completed,
            JREASON_JOB_COMPLETED_SUCCESSFULLY,
            JREASON_JOB_FETCHABLE,
        ),
        Some(JobState::Canceled) => job::transition(
            ctx.system,
            &printer,
            &job,
            JobState::Canceled,
            JREASON_JOB_CANCELED_AT_DEVICE,
            JREASON_JOB_FETCHABLE,
        ),
        Some(JobState::Aborted) => job::transition(
            ctx.system,
            &printer,
            &job,
            JobState::Aborted,
            platen_core::types::JREASON_ABORTED_BY_SYSTEM,
            JREASON_JOB_FETCHABLE,
        ),
        _ => {}
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Update-Document-Status: single-document progress reporting.
pub fn update_document_status(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;
    require_document_one(ctx)?;

    if let Some(v) = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "impressions-completed")
        .or_else(|| {
            ctx.req
                .find(DelimiterTag::OperationAttributes, "job-impressions-completed")
        })
        .and_then(|a| a.as_i32())
    {
        let mut inner = job.inner.write_lock();
        if v > inner.impcompleted {
            inner.impcompleted = v;
        }
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

// ---------------------------------------------------------------------------
// Fetch / acknowledge
// ---------------------------------------------------------------------------

fn require_fetchable(job: &Arc<Job>) -> Result<()> {
    let inner = job.inner.read_lock();
    if inner.reasons & JREASON_JOB_FETCHABLE == 0 && inner.dev_uuid.is_none() {
        return Err(PlatenError::NotPossible(format!(
            "job {} is not fetchable",
            job.id
        )));
    }
    Ok(())
}

/// Fetch-Job: hand the job's attributes to the proxy.
pub fn fetch_job(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;
    require_fetchable(&job)?;

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    resp.groups
        .push(job.status_attributes(&printer.uri(&ctx.system.config)));
    Ok(resp)
}

/// Fetch-Document: stream the document (optionally transformed to the
/// format the device accepts) back to the proxy.
pub async fn fetch_document(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;
    require_fetchable(&job)?;
    require_document_one(ctx)?;

    let (spool, format) = {
        let inner = job.inner.read_lock();
        (inner.filename.clone(), inner.format.clone())
    };
    let spool = spool.ok_or_else(|| {
        PlatenError::NotPossible(format!("job {} has no document data", job.id))
    })?;

    let accepted: Option<String> = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "document-format-accepted")
        .map(|a| a.strings().iter().map(|s| s.to_string()).collect::<Vec<_>>())
        .and_then(|formats| {
            if formats.iter().any(|f| *f == format) {
                None
            } else {
                formats.first().cloned()
            }
        });

    let (payload, out_format) = match (&accepted, &ctx.system.config.transform_command) {
        (Some(want), Some(command)) => {
            // Inline transform: stdout is the fetched document.
            let output = tokio::process::Command::new(command)
                .arg(&spool)
                .env("CONTENT_TYPE", &format)
                .env("OUTPUT_TYPE", want)
                .env("SERVER_LOGLEVEL", &ctx.system.config.log_level)
                .stdin(std::process::Stdio::null())
                .output()
                .await
                .map_err(|e| PlatenError::Transform(format!("spawn: {e}")))?;
            if !output.status.success() {
                warn!(job = job.id, status = %output.status, "inline transform failed");
                return Err(PlatenError::Transform(format!(
                    "transform exited with {}",
                    output.status
                )));
            }
            (output.stdout, want.clone())
        }
        _ => {
            let bytes = tokio::fs::read(&spool)
                .await
                .map_err(|e| PlatenError::Internal(format!("read spool: {e}")))?;
            (bytes, format)
        }
    };

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    resp.add(
        DelimiterTag::OperationAttributes,
        Attribute::mime_type("document-format", &out_format),
    );
    resp.payload = payload;
    Ok(resp)
}

/// Acknowledge-Job: the proxy takes ownership; the fetchable marker
/// clears and the job starts processing at the device.
pub fn acknowledge_job(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;
    let uuid = device_uuid(ctx)?;

    {
        let mut inner = job.inner.write_lock();
        if inner.state.is_terminal() {
            return Err(PlatenError::NotPossible(format!(
                "job {} is already {:?}",
                job.id, inner.state
            )));
        }
        match &inner.dev_uuid {
            Some(existing) if existing != &uuid => {
                return Err(PlatenError::NotPossible(format!(
                    "job {} is owned by another output device",
                    job.id
                )));
            }
            _ => inner.dev_uuid = Some(uuid),
        }
    }
    job::transition(
        ctx.system,
        &printer,
        &job,
        JobState::Processing,
        platen_core::types::JREASON_JOB_PRINTING,
        JREASON_JOB_FETCHABLE,
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Acknowledge-Document: confirm receipt of the single document.
pub fn acknowledge_document(ctx: &Ctx<'_>) -> Result<Message> {
    let (printer, job) = ctx.job()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;
    require_document_one(ctx)?;
    let uuid = device_uuid(ctx)?;
    let owned = job.inner.read_lock().dev_uuid.as_deref() == Some(uuid.as_str());
    if !owned {
        return Err(PlatenError::NotPossible(format!(
            "job {} is not assigned to output device {uuid}",
            job.id
        )));
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Acknowledge-Identify-Printer: collect and clear the pending identify
/// request.
pub fn acknowledge_identify_printer(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::ProxyGroup, Some(&printer))?;

    let (actions, message) = {
        let mut inner = printer.inner.write_lock();
        if inner.reasons & platen_core::types::PREASON_IDENTIFY_PRINTER_REQUESTED == 0 {
            return Err(PlatenError::NotPossible("no identify request pending".into()));
        }
        inner.reasons &= !platen_core::types::PREASON_IDENTIFY_PRINTER_REQUESTED;
        (
            std::mem::take(&mut inner.identify_actions),
            inner.identify_message.take(),
        )
    };

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    if !actions.is_empty() {
        let refs: Vec<&str> = actions.iter().map(String::as_str).collect();
        resp.add(
            DelimiterTag::OperationAttributes,
            Attribute::keywords("identify-actions", &refs),
        );
    }
    if let Some(message) = message {
        resp.add(
            DelimiterTag::OperationAttributes,
            Attribute::text("message", &message),
        );
    }
    Ok(resp)
}

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
