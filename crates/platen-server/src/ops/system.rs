// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// System-service operations and the all-printers fan-outs.

use chrono::Utc;

use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_core::types::{
    EVENT_SYSTEM_CONFIG_CHANGED, EVENT_SYSTEM_STATE_CHANGED, printer_reason_keywords,
};
use platen_ipp::attr::{Attribute, AttributeGroup};
use platen_ipp::message::Message;
use platen_ipp::model::{DelimiterTag, StatusCode};
use platen_ipp::value::Value;

use crate::auth::{self, Policy};
use crate::events;
use crate::ops::printer::{do_disable, do_enable, do_pause, do_resume, do_shutdown, do_startup};
use crate::ops::{Ctx, add_filtered_group, unsupported_response};
use crate::validate::{self, SYSTEM_SETTABLE};

/// Get-System-Attributes: identity, state, and the settable set. Public.
pub fn get_system_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();

    let mut g = AttributeGroup::new(DelimiterTag::SystemAttributes);
    {
        let info = ctx.system.info.read_lock();
        g.add(Attribute::name_value("system-name", &info.name));
        g.add(Attribute::new(
            "system-uuid",
            Value::Uri(format!("urn:uuid:{}", ctx.system.uuid)),
        ));
        g.add(Attribute::enum_value("system-state", info.state.ipp_enum()));
        g.add(Attribute::keywords(
            "system-state-reasons",
            &printer_reason_keywords(info.reasons),
        ));
        match info.default_printer_id {
            Some(id) => g.add(Attribute::integer("system-default-printer-id", id)),
            None => g.add(Attribute::new("system-default-printer-id", Value::NoValue)),
        }
        if let Some(location) = &info.location {
            g.add(Attribute::text("system-location", location));
        }
        if let Some(text) = &info.info {
            g.add(Attribute::text("system-info", text));
        }
        if let Some(mm) = &info.make_and_model {
            g.add(Attribute::text("system-make-and-model", mm));
        }
        if let Some(geo) = &info.geo_location {
            g.add(Attribute::uri("system-geo-location", geo));
        }
        g.add(Attribute::integer(
            "system-config-change-time",
            (info.config_time - ctx.system.start_time).num_seconds() as i32,
        ));
        g.add(Attribute::integer(
            "system-state-change-time",
            (info.state_time - ctx.system.start_time).num_seconds() as i32,
        ));
        for attr in &info.attrs.attrs {
            if g.find(&attr.name).is_none() {
                g.add(attr.clone());
            }
        }
    }
    g.add(Attribute::integer(
        "system-up-time",
        (Utc::now() - ctx.system.start_time).num_seconds() as i32,
    ));
    g.add(Attribute::integer(
        "system-configured-printers",
        ctx.system.all_printers().len() as i32,
    ));
    g.add(Attribute::keywords(
        "printer-creation-attributes-supported",
        &validate::PRINTER_SETTABLE
            .iter()
            .map(|r| r.name)
            .collect::<Vec<_>>(),
    ));

    add_filtered_group(&mut resp, DelimiterTag::SystemAttributes, &g, requested.as_deref());
    Ok(resp)
}

/// Get-System-Supported-Values: what Set-System-Attributes accepts.
pub fn get_system_supported_values(ctx: &Ctx<'_>) -> Result<Message> {
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    resp.add(
        DelimiterTag::SystemAttributes,
        Attribute::keywords(
            "system-settable-attributes-supported",
            &SYSTEM_SETTABLE.iter().map(|r| r.name).collect::<Vec<_>>(),
        ),
    );
    Ok(resp)
}

/// Set-System-Attributes validates the entire request before touching
/// anything; a failure mid-validation performs no mutations.
pub fn set_system_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, None)?;

    let offenders = validate::validate_group(
        ctx.req,
        DelimiterTag::SystemAttributes,
        SYSTEM_SETTABLE,
        None,
        false,
    );
    if !offenders.is_empty() {
        return Ok(unsupported_response(ctx.req, offenders, true));
    }
    // Referenced printers must exist before any change lands.
    if let Some(group) = ctx.req.group(DelimiterTag::SystemAttributes) {
        if let Some(attr) = group.find("system-default-printer-id") {
            if let Some(id) = attr.as_i32() {
                if ctx.system.printer_by_id(id).is_none() {
                    return Err(PlatenError::NotPossible(format!(
                        "printer {id} does not exist"
                    )));
                }
            }
        }
    }

    if let Some(group) = ctx.req.group(DelimiterTag::SystemAttributes) {
        let mut info = ctx.system.info.write_lock();
        for attr in &group.attrs {
            let text = attr.as_str().map(str::to_string);
            match attr.name.as_str() {
                "system-name" => {
                    if let Some(v) = text {
                        info.name = v;
                    }
                }
                "system-location" => info.location = text,
                "system-info" => info.info = text,
                "system-make-and-model" => info.make_and_model = text,
                "system-geo-location" => {
                    info.geo_location = if attr.value() == Some(&Value::Unknown) {
                        None
                    } else {
                        text
                    };
                }
                "system-default-printer-id" => {
                    info.default_printer_id = if attr.value() == Some(&Value::NoValue) {
                        None
                    } else {
                        attr.as_i32()
                    };
                }
                _ => info.attrs.replace(attr.clone()),
            }
        }
        info.config_time = Utc::now();
    }

    events::add_event(
        ctx.system,
        None,
        None,
        EVENT_SYSTEM_CONFIG_CHANGED,
        "System configuration changed.",
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// Restart-System: every printer returns to a clean idle state.
pub fn restart_system(ctx: &Ctx<'_>) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, None)?;
    for printer in ctx.system.all_printers() {
        crate::ops::printer::do_restart(ctx.system, &printer);
    }
    {
        let mut info = ctx.system.info.write_lock();
        info.state = platen_core::types::SystemState::Idle;
        info.reasons = 0;
        info.state_time = Utc::now();
    }
    events::add_event(
        ctx.system,
        None,
        None,
        EVENT_SYSTEM_STATE_CHANGED,
        "System restarted.",
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

/// The Disable/Enable/Pause/Resume/Shutdown/Startup-All-Printers family.
pub fn all_printers_op(ctx: &Ctx<'_>, which: AllPrintersOp) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, None)?;
    for printer in ctx.system.all_printers() {
        match which {
            AllPrintersOp::Disable => do_disable(ctx.system, &printer),
            AllPrintersOp::Enable => do_enable(ctx.system, &printer),
            AllPrintersOp::Pause => do_pause(ctx.system, &printer, false),
            AllPrintersOp::PauseAfterCurrentJob => do_pause(ctx.system, &printer, true),
            AllPrintersOp::Resume => do_resume(ctx.system, &printer),
            AllPrintersOp::Shutdown => do_shutdown(ctx.system, &printer),
            AllPrintersOp::Startup => do_startup(ctx.system, &printer),
        }
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

#[derive(Clone, Copy)]
pub enum AllPrintersOp {
    Disable,
    Enable,
    Pause,
    PauseAfterCurrentJob,
    Resume,
    Shutdown,
    Startup,
}

/// Shutdown/Startup/Restart-One-Printer: system-targeted with a
/// printer-id operation attribute.
pub fn one_printer_op(ctx: &Ctx<'_>, which: OnePrinterOp) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, None)?;
    let printer = ctx.printer_by_id_attr()?;
    match which {
        OnePrinterOp::Shutdown => do_shutdown(ctx.system, &printer),
        OnePrinterOp::Startup => do_startup(ctx.system, &printer),
        OnePrinterOp::Restart => crate::ops::printer::do_restart(ctx.system, &printer),
    }
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

#[derive(Clone, Copy)]
pub enum OnePrinterOp {
    Shutdown,
    Startup,
    Restart,
}
