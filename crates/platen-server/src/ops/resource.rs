// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resource operations (system-targeted, administrative).

use std::sync::Arc;

use tracing::{info, warn};

use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_core::types::{
    EVENT_RESOURCE_CANCELED, EVENT_RESOURCE_CONFIG_CHANGED, EVENT_RESOURCE_CREATED,
    EVENT_RESOURCE_INSTALLED, ResourceState,
};
use platen_ipp::attr::Attribute;
use platen_ipp::message::Message;
use platen_ipp::model::{DelimiterTag, StatusCode};
use platen_ipp::wire;

use crate::auth::{self, Policy};
use crate::events;
use crate::ops::{Ctx, add_filtered_group, unsupported_response};
use crate::resource::{RESOURCE_FORMATS, RESOURCE_TYPES, Resource};

fn resource_from_request(ctx: &Ctx<'_>) -> Result<Arc<Resource>> {
    let id = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "resource-id")
        .and_then(|a| a.as_i32())
        .ok_or_else(|| PlatenError::BadRequest("missing resource-id".into()))?;
    ctx.system
        .resource_by_id(id)
        .ok_or_else(|| PlatenError::NotFound(format!("resource {id} not found")))
}

/// Create-Resource: an empty resource in `pending` state.
pub fn create_resource(ctx: &Ctx<'_>) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, None)?;

    let rtype_attr = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "resource-type")
        .or_else(|| ctx.req.find(DelimiterTag::ResourceAttributes, "resource-type"))
        .ok_or_else(|| PlatenError::BadRequest("missing resource-type".into()))?;
    let rtype = rtype_attr.as_str().unwrap_or_default().to_string();
    if !RESOURCE_TYPES.contains(&rtype.as_str()) {
        return Ok(unsupported_response(ctx.req, vec![rtype_attr.clone()], false));
    }

    let name = ctx
        .req
        .find(DelimiterTag::ResourceAttributes, "resource-name")
        .or_else(|| ctx.req.find(DelimiterTag::OperationAttributes, "resource-name"))
        .and_then(|a| a.as_str())
        .unwrap_or("untitled")
        .to_string();

    let resource = Resource::create(ctx.system.next_resource_id(), &rtype, &name);
    ctx.system.add_resource(Arc::clone(&resource));
    events::add_event_full(
        ctx.system,
        None,
        None,
        Some(&resource),
        EVENT_RESOURCE_CREATED,
        &format!("Resource {} created.", resource.id),
    );
    info!(resource = resource.id, rtype = %rtype, "resource created");

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    resp.groups.push(resource.status_attributes());
    Ok(resp)
}

/// Send-Resource-Data: stream the payload and move to `available`.
pub fn send_resource_data(ctx: &Ctx<'_>) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, None)?;
    let resource = resource_from_request(ctx)?;

    let format_attr = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "resource-format")
        .ok_or_else(|| PlatenError::BadRequest("missing resource-format".into()))?;
    let format = format_attr.as_str().unwrap_or_default().to_string();
    if !RESOURCE_FORMATS.contains(&format.as_str()) {
        return Ok(unsupported_response(ctx.req, vec![format_attr.clone()], false));
    }

    if resource.state() != ResourceState::Pending {
        return Err(PlatenError::NotPossible(format!(
            "resource {} is not pending",
            resource.id
        )));
    }

    let path = resource.payload_path(&ctx.system.config, &format);
    std::fs::create_dir_all(&ctx.system.config.spool_dir)?;
    std::fs::write(&path, &ctx.req.payload)?;

    {
        let mut inner = resource.inner.write_lock();
        inner.format = Some(format.clone());
        inner.filename = Some(path);
        inner.spooling = false;
    }

    // Template payloads in application/ipp form carry the attribute set
    // to merge at creation time.
    if resource.is_template() && format == "application/ipp" && !ctx.req.payload.is_empty() {
        match wire::parse(&ctx.req.payload) {
            Ok(template) => {
                let mut inner = resource.inner.write_lock();
                for group in &template.groups {
                    for attr in &group.attrs {
                        inner.attrs.replace(attr.clone());
                    }
                }
            }
            Err(e) => {
                warn!(resource = resource.id, error = %e, "template payload did not parse");
                return Err(PlatenError::BadRequest(
                    "template payload is not a valid IPP attribute set".into(),
                ));
            }
        }
    }

    resource.set_state(ResourceState::Available);
    events::add_event_full(
        ctx.system,
        None,
        None,
        Some(&resource),
        EVENT_RESOURCE_CONFIG_CHANGED,
        &format!("Resource {} data received.", resource.id),
    );

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    resp.groups.push(resource.status_attributes());
    Ok(resp)
}

/// Install-Resource: `available` becomes `installed`.
pub fn install_resource(ctx: &Ctx<'_>) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, None)?;
    let resource = resource_from_request(ctx)?;

    if resource.state() != ResourceState::Available {
        return Err(PlatenError::NotPossible(format!(
            "resource {} is not available",
            resource.id
        )));
    }
    resource.set_state(ResourceState::Installed);
    events::add_event_full(
        ctx.system,
        None,
        None,
        Some(&resource),
        EVENT_RESOURCE_INSTALLED,
        &format!("Resource {} installed.", resource.id),
    );
    info!(resource = resource.id, "resource installed");

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    resp.groups.push(resource.status_attributes());
    Ok(resp)
}

/// Cancel-Resource: immediate, or deferred while allocations exist.
pub fn cancel_resource(ctx: &Ctx<'_>) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, None)?;
    let resource = resource_from_request(ctx)?;

    if resource.state().is_terminal() {
        return Err(PlatenError::NotPossible(format!(
            "resource {} is already {:?}",
            resource.id,
            resource.state()
        )));
    }
    let state = resource.cancel();
    if state == ResourceState::Canceled {
        events::add_event_full(
            ctx.system,
            None,
            None,
            Some(&resource),
            EVENT_RESOURCE_CANCELED,
            &format!("Resource {} canceled.", resource.id),
        );
    }
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    resp.groups.push(resource.status_attributes());
    Ok(resp)
}

/// Set-Resource-Attributes: description fields only; state and identity
/// are not settable.
pub fn set_resource_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    auth::authorize(&ctx.system.config, ctx.username, Policy::AdminGroup, None)?;
    let resource = resource_from_request(ctx)?;

    let Some(group) = ctx.req.group(DelimiterTag::ResourceAttributes) else {
        return Ok(Message::response(ctx.req, StatusCode::SuccessfulOk));
    };

    const NOT_SETTABLE: &[&str] = &[
        "resource-id",
        "resource-state",
        "resource-state-reasons",
        "resource-type",
        "resource-uuid",
        "resource-use-count",
        "time-at-creation",
    ];
    let offenders: Vec<Attribute> = group
        .attrs
        .iter()
        .filter(|a| NOT_SETTABLE.contains(&a.name.as_str()))
        .cloned()
        .collect();
    if !offenders.is_empty() {
        return Ok(unsupported_response(ctx.req, offenders, true));
    }

    {
        let mut inner = resource.inner.write_lock();
        for attr in &group.attrs {
            if attr.name == "resource-name" {
                if let Some(name) = attr.as_str() {
                    inner.name = name.to_string();
                }
            }
            inner.attrs.replace(attr.clone());
        }
    }
    events::add_event_full(
        ctx.system,
        None,
        None,
        Some(&resource),
        EVENT_RESOURCE_CONFIG_CHANGED,
        &format!("Resource {} attributes changed.", resource.id),
    );
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

pub fn get_resource_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let resource = resource_from_request(ctx)?;
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();
    add_filtered_group(
        &mut resp,
        DelimiterTag::ResourceAttributes,
        &resource.status_attributes(),
        requested.as_deref(),
    );
    Ok(resp)
}

pub fn get_resources(ctx: &Ctx<'_>) -> Result<Message> {
    let which = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "resource-states")
        .map(|a| a.strings().iter().map(|s| s.to_string()).collect::<Vec<_>>());
    let limit = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "limit")
        .and_then(|a| a.as_i32())
        .unwrap_or(i32::MAX)
        .max(0) as usize;

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();
    let mut count = 0usize;
    for resource in ctx.system.all_resources() {
        if count >= limit {
            break;
        }
        if let Some(states) = &which {
            let keyword = match resource.state() {
                ResourceState::Pending => "pending",
                ResourceState::Available => "available",
                ResourceState::Installed => "installed",
                ResourceState::Canceled => "canceled",
                ResourceState::Aborted => "aborted",
            };
            if !states.iter().any(|s| s == keyword) {
                continue;
            }
        }
        add_filtered_group(
            &mut resp,
            DelimiterTag::ResourceAttributes,
            &resource.status_attributes(),
            requested.as_deref(),
        );
        count += 1;
    }
    Ok(resp)
}
