// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer-targeted operations, plus the state-change helpers shared with
// their all-printers counterparts.

use std::sync::Arc;

use tracing::info;

use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_core::types::{
    EVENT_PRINTER_CONFIG_CHANGED, EVENT_PRINTER_CREATED, EVENT_PRINTER_DELETED,
    EVENT_PRINTER_RESTARTED, EVENT_PRINTER_SHUTDOWN, EVENT_PRINTER_STATE_CHANGED,
    EVENT_PRINTER_STOPPED, PREASON_DELETING, PREASON_IDENTIFY_PRINTER_REQUESTED,
    PREASON_MOVING_TO_PAUSED, PREASON_PAUSED, PrinterState,
};
use platen_ipp::attr::Attribute;
use platen_ipp::message::Message;
use platen_ipp::model::{DelimiterTag, StatusCode};
use platen_ipp::value::Value;

use crate::auth::{self, Policy};
use crate::device::overlay;
use crate::engine;
use crate::events;
use crate::ops::{Ctx, add_filtered_group, unsupported_response};
use crate::printer::Printer;
use crate::store::System;
use crate::uri::printer_path_for;
use crate::validate::{self, PRINTER_SETTABLE};

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Get-Printer-Attributes: static description, device overlay, and live
/// status, filtered by requested-attributes. Public.
pub fn get_printer_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();

    let merged = {
        let inner = printer.inner.read_lock();
        overlay(&inner.pinfo, &inner.dev_attrs)
    };
    let mut full = printer.status_attributes(&ctx.system.config);
    for attr in merged.attrs {
        if full.find(&attr.name).is_none() {
            full.add(attr);
        }
    }
    add_filtered_group(
        &mut resp,
        DelimiterTag::PrinterAttributes,
        &full,
        requested.as_deref(),
    );
    Ok(resp)
}

/// Get-Printer-Supported-Values: the `*-supported` subset.
pub fn get_printer_supported_values(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let group = {
        let inner = printer.inner.read_lock();
        inner
            .pinfo
            .copy_filtered(DelimiterTag::PrinterAttributes, |a| {
                a.name.ends_with("-supported")
            })
    };
    resp.groups.push(group);
    Ok(resp)
}

/// Set-Printer-Attributes: settable-schema validation, then in-place
/// replacement on the static attribute set.
pub fn set_printer_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, Some(&printer))?;

    let offenders = validate::validate_group(
        ctx.req,
        DelimiterTag::PrinterAttributes,
        PRINTER_SETTABLE,
        None,
        false,
    );
    if !offenders.is_empty() {
        return Ok(unsupported_response(ctx.req, offenders, true));
    }

    if let Some(group) = ctx.req.group(DelimiterTag::PrinterAttributes) {
        let mut inner = printer.inner.write_lock();
        for attr in &group.attrs {
            if attr.value() == Some(&Value::DeleteAttribute) {
                inner.pinfo.remove(&attr.name);
                continue;
            }
            if attr.name == "device-uri" {
                if let Some(uri) = attr.as_str() {
                    inner.device_uri = uri.to_string();
                }
            }
            inner.pinfo.replace(attr.clone());
        }
        inner.config_time = chrono::Utc::now();
    }

    events::add_event(
        ctx.system,
        Some(&printer),
        None,
        EVENT_PRINTER_CONFIG_CHANGED,
        "Printer configuration changed.",
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Identify-Printer: record the requested actions for the device (or a
/// person near it) to act on; Acknowledge-Identify-Printer collects them.
pub fn identify_printer(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    let actions = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "identify-actions")
        .map(|a| a.strings().iter().map(|s| s.to_string()).collect())
        .unwrap_or_else(|| vec!["sound".to_string()]);
    let message = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "message")
        .and_then(|a| a.as_str())
        .map(str::to_string);

    {
        let mut inner = printer.inner.write_lock();
        inner.identify_actions = actions;
        inner.identify_message = message;
        inner.reasons |= PREASON_IDENTIFY_PRINTER_REQUESTED;
    }
    events::add_event(
        ctx.system,
        Some(&printer),
        None,
        EVENT_PRINTER_STATE_CHANGED,
        "Identify-Printer requested.",
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

// ---------------------------------------------------------------------------
// State changes (shared with all-printers counterparts)
// ---------------------------------------------------------------------------

pub fn do_pause(system: &Arc<System>, printer: &Arc<Printer>, after_current_job: bool) {
    let processing = printer
        .inner
        .read_lock()
        .processing_job
        .is_some();
    if after_current_job && processing {
        printer.update_reasons(PREASON_MOVING_TO_PAUSED, 0);
    } else {
        printer.update_reasons(PREASON_PAUSED, PREASON_MOVING_TO_PAUSED);
        printer.set_state(PrinterState::Stopped);
    }
    events::add_event(
        system,
        Some(printer),
        None,
        EVENT_PRINTER_STATE_CHANGED | EVENT_PRINTER_STOPPED,
        "Printer paused.",
    );
}

pub fn do_resume(system: &Arc<System>, printer: &Arc<Printer>) {
    printer.update_reasons(0, PREASON_PAUSED | PREASON_MOVING_TO_PAUSED);
    let processing = printer
        .inner
        .read_lock()
        .processing_job
        .is_some();
    printer.set_state(if processing {
        PrinterState::Processing
    } else {
        PrinterState::Idle
    });
    printer.sched.notify_one();
    events::add_event(
        system,
        Some(printer),
        None,
        EVENT_PRINTER_STATE_CHANGED,
        "Printer resumed.",
    );
}

pub fn do_disable(system: &Arc<System>, printer: &Arc<Printer>) {
    printer.inner.write_lock().is_accepting = false;
    events::add_event(
        system,
        Some(printer),
        None,
        EVENT_PRINTER_CONFIG_CHANGED,
        "Printer no longer accepting jobs.",
    );
}

pub fn do_enable(system: &Arc<System>, printer: &Arc<Printer>) {
    printer.inner.write_lock().is_accepting = true;
    printer.sched.notify_one();
    events::add_event(
        system,
        Some(printer),
        None,
        EVENT_PRINTER_CONFIG_CHANGED,
        "Printer accepting jobs.",
    );
}

pub fn do_shutdown(system: &Arc<System>, printer: &Arc<Printer>) {
    {
        let mut inner = printer.inner.write_lock();
        inner.is_shutdown = true;
    }
    let processing = printer
        .inner
        .read_lock()
        .processing_job
        .clone();
    if let Some(active) = processing {
        let _ = engine::stop_job(system, printer, &active);
    }
    events::add_event(
        system,
        Some(printer),
        None,
        EVENT_PRINTER_SHUTDOWN | EVENT_PRINTER_STATE_CHANGED,
        "Printer shut down.",
    );
}

pub fn do_startup(system: &Arc<System>, printer: &Arc<Printer>) {
    {
        let mut inner = printer.inner.write_lock();
        inner.is_shutdown = false;
        inner.state = PrinterState::Idle;
    }
    printer.sched.notify_one();
    events::add_event(
        system,
        Some(printer),
        None,
        EVENT_PRINTER_STATE_CHANGED,
        "Printer started.",
    );
}

pub fn do_restart(system: &Arc<System>, printer: &Arc<Printer>) {
    let processing = printer
        .inner
        .read_lock()
        .processing_job
        .clone();
    if let Some(active) = processing {
        let _ = engine::stop_job(system, printer, &active);
    }
    {
        let mut inner = printer.inner.write_lock();
        inner.is_shutdown = false;
        inner.state = PrinterState::Idle;
        inner.reasons = 0;
        inner.state_time = chrono::Utc::now();
    }
    printer.sched.notify_one();
    events::add_event(
        system,
        Some(printer),
        None,
        EVENT_PRINTER_RESTARTED | EVENT_PRINTER_STATE_CHANGED,
        "Printer restarted.",
    );
}

/// Admin wrapper used by the single-printer operations.
pub fn state_op(
    ctx: &Ctx<'_>,
    apply: impl Fn(&Arc<System>, &Arc<Printer>),
) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, Some(&printer))?;
    apply(ctx.system, &printer);
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

// ---------------------------------------------------------------------------
// Printer lifecycle (system operations)
// ---------------------------------------------------------------------------

/// Create-Printer: service type + printer-name, template-printer
/// defaults, then the request's own printer attributes.
pub fn create_printer(ctx: &Ctx<'_>) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, None)?;

    let service = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "printer-service-type")
        .and_then(|a| a.as_str())
        .unwrap_or("print")
        .to_string();
    let name = ctx
        .req
        .find(DelimiterTag::PrinterAttributes, "printer-name")
        .or_else(|| ctx.req.find(DelimiterTag::OperationAttributes, "printer-name"))
        .and_then(|a| a.as_str())
        .ok_or_else(|| PlatenError::BadRequest("missing printer-name".into()))?
        .to_string();

    if ctx.system.printer_by_name(&name).is_some() {
        return Err(PlatenError::NotPossible(format!(
            "printer '{name}' already exists"
        )));
    }

    let offenders = validate::validate_group(
        ctx.req,
        DelimiterTag::PrinterAttributes,
        PRINTER_SETTABLE,
        None,
        true,
    );
    let offenders: Vec<Attribute> = offenders
        .into_iter()
        .filter(|a| a.name != "printer-name")
        .collect();
    if !offenders.is_empty() {
        return Ok(unsupported_response(ctx.req, offenders, false));
    }

    let path = printer_path_for(&service, &name);
    let printer = Printer::create(ctx.system.next_printer_id(), &name, &path, &ctx.system.config);

    {
        let mut inner = printer.inner.write_lock();
        // Template-printer resources first, the request's values on top.
        for attr in crate::ops::job::printer_template_attrs(ctx.system) {
            if validate::schema_row(PRINTER_SETTABLE, &attr.name).is_some() {
                inner.pinfo.replace(attr);
            }
        }
        if let Some(group) = ctx.req.group(DelimiterTag::PrinterAttributes) {
            for attr in &group.attrs {
                if attr.name == "device-uri" {
                    if let Some(uri) = attr.as_str() {
                        inner.device_uri = uri.to_string();
                    }
                }
                inner.pinfo.replace(attr.clone());
            }
        }
    }

    ctx.system.add_printer(Arc::clone(&printer));
    ctx.system.touch_config();
    tokio::spawn(engine::printer_loop(
        Arc::clone(ctx.system),
        Arc::clone(&printer),
    ));
    events::add_event(
        ctx.system,
        Some(&printer),
        None,
        EVENT_PRINTER_CREATED,
        &format!("Printer '{name}' created."),
    );
    info!(printer = printer.id, name = %name, path = %path, "printer created");

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let mut group = printer.status_attributes(&ctx.system.config);
    group.add(Attribute::boolean("printer-is-shared", true));
    resp.groups.push(group);
    Ok(resp)
}

/// Delete-Printer: abort every non-terminal job (stopping the one in
/// `processing` first) and drop the registry entry.
pub fn delete_printer(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, Some(&printer))?;

    printer.update_reasons(PREASON_DELETING, 0);

    for active in printer.active_jobs() {
        engine::abort_job(ctx.system, &printer, &active);
    }

    events::add_event(
        ctx.system,
        Some(&printer),
        None,
        EVENT_PRINTER_DELETED,
        "Printer deleted.",
    );
    ctx.system.remove_printer(printer.id);
    ctx.system.touch_config();
    printer.sched.notify_one();
    info!(printer = printer.id, "printer deleted");
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Get-Printers: one printer-attributes group per registered printer.
pub fn get_printers(ctx: &Ctx<'_>) -> Result<Message> {
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();
    for printer in ctx.system.all_printers() {
        let group = printer.status_attributes(&ctx.system.config);
        add_filtered_group(
            &mut resp,
            DelimiterTag::PrinterAttributes,
            &group,
            requested.as_deref(),
        );
    }
    Ok(resp)
}

// ---------------------------------------------------------------------------
// Resource allocation
// ---------------------------------------------------------------------------

pub fn allocate_printer_resources(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, Some(&printer))?;

    let ids = resource_ids(ctx.req)?;
    for id in &ids {
        let resource = ctx
            .system
            .resource_by_id(*id)
            .ok_or_else(|| PlatenError::NotFound(format!("resource {id} not found")))?;

        {
            let inner = printer.inner.read_lock();
            if inner.resources.len() >= ctx.system.config.max_resources_per_printer {
                return Err(PlatenError::NotPossible(format!(
                    "printer {} is at its resource limit",
                    printer.id
                )));
            }
            if inner.resources.contains(id) {
                continue;
            }
        }
        resource.allocate()?;
        printer.inner.write_lock().resources.push(*id);
    }
    ctx.system.touch_config();
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

pub fn deallocate_printer_resources(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, Some(&printer))?;

    let ids = resource_ids(ctx.req)?;
    for id in &ids {
        let held = {
            let mut inner = printer.inner.write_lock();
            match inner.resources.iter().position(|r| r == id) {
                Some(index) => {
                    inner.resources.remove(index);
                    true
                }
                None => false,
            }
        };
        if !held {
            return Err(PlatenError::NotPossible(format!(
                "resource {id} is not allocated to printer {}",
                printer.id
            )));
        }
        if let Some(resource) = ctx.system.resource_by_id(*id) {
            let _ = resource.deallocate();
        }
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Allocated resource ids for Get-Printer-Resources.
pub fn get_printer_resources(ctx: &Ctx<'_>) -> Result<Message> {
    let printer = ctx.printer()?;
    let ids = printer.inner.read_lock().resources.clone();
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    if !ids.is_empty() {
        resp.add(
            DelimiterTag::PrinterAttributes,
            Attribute::with_values(
                "printer-resource-ids",
                ids.into_iter().map(Value::Integer).collect(),
            ),
        );
    }
    Ok(resp)
}

fn resource_ids(req: &Message) -> Result<Vec<i32>> {
    let attr = req
        .find(DelimiterTag::OperationAttributes, "resource-ids")
        .ok_or_else(|| PlatenError::BadRequest("missing resource-ids".into()))?;
    let ids: Vec<i32> = attr.values.iter().filter_map(|v| v.as_i32()).collect();
    if ids.is_empty() {
        return Err(PlatenError::BadRequest("empty resource-ids".into()));
    }
    Ok(ids)
}
