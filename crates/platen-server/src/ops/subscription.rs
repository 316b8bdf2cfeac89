// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subscription operations and the Get-Notifications pull path.

use std::sync::Arc;

use tracing::debug;

use platen_core::error::{PlatenError, Result};
use platen_core::sync::LockExt;
use platen_core::types::{EVENT_JOB_COMPLETED, EventMask, event_bit};
use platen_ipp::attr::Attribute;
use platen_ipp::message::Message;
use platen_ipp::model::{DelimiterTag, StatusCode};

use crate::auth::{self, Policy};
use crate::events::{Subscription, SubscriptionOwner};
use crate::ops::{Ctx, add_filtered_group, unsupported_response};
use crate::uri::Target;

/// Maximum accepted notify-user-data payload.
const MAX_USER_DATA: usize = 63;

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// What the Create-*-Subscriptions variants attach to.
pub enum SubscriptionScope {
    Printer,
    Job,
    Resource,
    System,
}

/// Shared Create-*-Subscriptions implementation: one subscription per
/// subscription-attributes group, all-or-nothing on validation.
pub fn create_subscriptions(ctx: &Ctx<'_>, scope: SubscriptionScope) -> Result<Message> {
    let printer = match scope {
        SubscriptionScope::Printer | SubscriptionScope::Job => Some(ctx.printer()?),
        _ => None,
    };
    auth::authorize(
        &ctx.system.config,
        ctx.username,
        Policy::PrintGroup,
        printer.as_ref(),
    )?;
    let username = auth::effective_username(ctx.username, ctx.req);

    let groups: Vec<_> = ctx
        .req
        .groups_of(DelimiterTag::SubscriptionAttributes)
        .cloned()
        .collect();
    if groups.is_empty() {
        return Err(PlatenError::BadRequest(
            "no subscription attributes supplied".into(),
        ));
    }

    // Validate every requested subscription before creating any.
    let mut requests = Vec::new();
    for group in &groups {
        // Only the ippget pull method is offered; push methods are
        // unsupported values.
        if let Some(method) = group.find("notify-pull-method") {
            if method.as_str() != Some("ippget") {
                return Ok(unsupported_response(ctx.req, vec![method.clone()], false));
            }
        } else if let Some(recipient) = group.find("notify-recipient-uri") {
            return Ok(unsupported_response(ctx.req, vec![recipient.clone()], false));
        }

        let mut mask: EventMask = 0;
        if let Some(events) = group.find("notify-events") {
            for kw in events.strings() {
                match event_bit(kw) {
                    Some(bit) => mask |= bit,
                    None => {
                        return Ok(unsupported_response(ctx.req, vec![events.clone()], false));
                    }
                }
            }
        }
        if mask == 0 {
            mask = EVENT_JOB_COMPLETED;
        }

        let user_data = match group.find("notify-user-data") {
            Some(attr) => match attr.value() {
                Some(platen_ipp::value::Value::OctetString(bytes))
                    if bytes.len() <= MAX_USER_DATA =>
                {
                    bytes.clone()
                }
                _ => {
                    return Ok(unsupported_response(ctx.req, vec![attr.clone()], false));
                }
            },
            None => Vec::new(),
        };

        let lease = group
            .find("notify-lease-duration")
            .and_then(|a| a.as_i32())
            .map(|v| v.max(0) as u32)
            .unwrap_or(86400)
            .min(ctx.system.config.max_lease_secs);
        let interval = group
            .find("notify-time-interval")
            .and_then(|a| a.as_i32())
            .map(|v| v.max(0) as u32)
            .unwrap_or(0);
        let attributes: Vec<String> = group
            .find("notify-attributes")
            .map(|a| a.strings().iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();
        let charset = group
            .find("notify-charset")
            .and_then(|a| a.as_str())
            .unwrap_or("utf-8")
            .to_string();
        let language = group
            .find("notify-natural-language")
            .and_then(|a| a.as_str())
            .unwrap_or("en")
            .to_string();

        requests.push((mask, lease, interval, user_data, attributes, charset, language));
    }

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    for (mask, lease, interval, user_data, attributes, charset, language) in requests {
        let owner = match scope {
            SubscriptionScope::System => SubscriptionOwner::System,
            SubscriptionScope::Printer => {
                let printer = printer.as_ref().ok_or_else(|| {
                    PlatenError::Internal("printer subscription without a printer target".into())
                })?;
                SubscriptionOwner::Printer(Arc::downgrade(printer))
            }
            SubscriptionScope::Job => {
                let printer = printer.as_ref().ok_or_else(|| {
                    PlatenError::Internal("job subscription without a printer target".into())
                })?;
                let (_, job) = match ctx.target {
                    Target::Job(..) => ctx.job()?,
                    _ => {
                        let id = ctx
                            .req
                            .find(DelimiterTag::OperationAttributes, "notify-job-id")
                            .and_then(|a| a.as_i32())
                            .ok_or_else(|| {
                                PlatenError::BadRequest("missing notify-job-id".into())
                            })?;
                        let job = printer.job_by_id(id).ok_or_else(|| {
                            PlatenError::NotFound(format!("job {id} not found"))
                        })?;
                        (Arc::clone(printer), job)
                    }
                };
                SubscriptionOwner::Job(Arc::downgrade(printer), Arc::downgrade(&job))
            }
            SubscriptionScope::Resource => {
                let id = ctx
                    .req
                    .find(DelimiterTag::OperationAttributes, "resource-id")
                    .and_then(|a| a.as_i32())
                    .ok_or_else(|| PlatenError::BadRequest("missing resource-id".into()))?;
                ctx.system
                    .resource_by_id(id)
                    .ok_or_else(|| PlatenError::NotFound(format!("resource {id} not found")))?;
                SubscriptionOwner::Resource(id)
            }
        };

        let sub = Subscription::new(
            ctx.system.next_subscription_id(),
            owner,
            &username,
            mask,
            lease,
            interval,
            ctx.system.config.event_queue_depth,
        );
        {
            let mut inner = sub.inner.write_lock();
            inner.user_data = user_data;
            inner.notify_attributes = attributes;
            inner.charset = charset;
            inner.language = language;
        }
        ctx.system.add_subscription(Arc::clone(&sub));
        debug!(subscription = sub.id, "subscription created");

        let group = resp.new_group(DelimiterTag::SubscriptionAttributes);
        group.add(Attribute::integer("notify-subscription-id", sub.id));
    }
    Ok(resp)
}

// ---------------------------------------------------------------------------
// Queries / lifecycle
// ---------------------------------------------------------------------------

fn subscription_from_request(ctx: &Ctx<'_>) -> Result<Arc<Subscription>> {
    let id = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "notify-subscription-id")
        .and_then(|a| a.as_i32())
        .ok_or_else(|| PlatenError::BadRequest("missing notify-subscription-id".into()))?;
    ctx.system
        .subscription_by_id(id)
        .ok_or_else(|| PlatenError::NotFound(format!("subscription {id} not found")))
}

pub fn get_subscription_attributes(ctx: &Ctx<'_>) -> Result<Message> {
    let sub = subscription_from_request(ctx)?;
    let owner = sub.inner.read_lock().username.clone();
    if !auth::can_view_all(&ctx.system.config, ctx.username, ctx.req, &owner) {
        return Err(PlatenError::Forbidden);
    }
    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();
    add_filtered_group(
        &mut resp,
        DelimiterTag::SubscriptionAttributes,
        &sub.status_attributes(),
        requested.as_deref(),
    );
    Ok(resp)
}

pub fn get_subscriptions(ctx: &Ctx<'_>) -> Result<Message> {
    let my_subscriptions = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "my-subscriptions")
        .and_then(|a| a.as_bool())
        .unwrap_or(false);
    let requester = auth::effective_username(ctx.username, ctx.req);
    let target_printer_id = match ctx.target {
        Target::Printer(printer) => Some(printer.id),
        _ => None,
    };

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    let requested = ctx.requested();
    for sub in ctx.system.all_subscriptions() {
        let inner = sub.inner.read_lock();
        if my_subscriptions && inner.username != requester {
            continue;
        }
        if let Some(printer_id) = target_printer_id {
            let matches = match &inner.owner {
                SubscriptionOwner::Printer(weak) => {
                    weak.upgrade().map(|p| p.id == printer_id).unwrap_or(false)
                }
                SubscriptionOwner::Job(weak, _) => {
                    weak.upgrade().map(|p| p.id == printer_id).unwrap_or(false)
                }
                _ => false,
            };
            if !matches {
                continue;
            }
        }
        drop(inner);
        add_filtered_group(
            &mut resp,
            DelimiterTag::SubscriptionAttributes,
            &sub.status_attributes(),
            requested.as_deref(),
        );
    }
    Ok(resp)
}

pub fn renew_subscription(ctx: &Ctx<'_>) -> Result<Message> {
    let sub = subscription_from_request(ctx)?;
    {
        let inner = sub.inner.read_lock();
        if matches!(inner.owner, SubscriptionOwner::Job(..)) {
            // Job subscriptions live exactly as long as their job.
            return Err(PlatenError::NotPossible(
                "job subscriptions cannot be renewed".into(),
            ));
        }
        if !auth::can_view_all(&ctx.system.config, ctx.username, ctx.req, &inner.username) {
            return Err(PlatenError::Forbidden);
        }
    }
    let lease = ctx
        .req
        .find(DelimiterTag::OperationAttributes, "notify-lease-duration")
        .or_else(|| ctx.req.find(DelimiterTag::SubscriptionAttributes, "notify-lease-duration"))
        .and_then(|a| a.as_i32())
        .map(|v| v.max(0) as u32)
        .unwrap_or(86400);
    let granted = sub.renew(lease, ctx.system.config.max_lease_secs);

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    resp.add(
        DelimiterTag::SubscriptionAttributes,
        Attribute::integer("notify-lease-duration", granted as i32),
    );
    Ok(resp)
}

pub fn cancel_subscription(ctx: &Ctx<'_>) -> Result<Message> {
    let sub = subscription_from_request(ctx)?;
    let owner = sub.inner.read_lock().username.clone();
    if !auth::can_view_all(&ctx.system.config, ctx.username, ctx.req, &owner) {
        return Err(PlatenError::Forbidden);
    }
    sub.truncate();
    ctx.system.remove_subscription(sub.id);
    Ok(Message::response(ctx.req, StatusCode::SuccessfulOk))
}

// ---------------------------------------------------------------------------
// Get-Notifications
// ---------------------------------------------------------------------------

/// Pull events for a set of subscriptions, optionally blocking until
/// something arrives. A missing or foreign subscription id fails only
/// its own entry.
pub async fn get_notifications(ctx: &Ctx<'_>) -> Result<Message> {
    let op = ctx
        .req
        .op_attrs()
        .ok_or_else(|| PlatenError::BadRequest("missing operation attributes".into()))?;
    let ids: Vec<i32> = op
        .find("notify-subscription-ids")
        .map(|a| a.values.iter().filter_map(|v| v.as_i32()).collect())
        .unwrap_or_default();
    if ids.is_empty() {
        return Err(PlatenError::BadRequest("missing notify-subscription-ids".into()));
    }
    let seqs: Vec<u32> = op
        .find("notify-sequence-numbers")
        .map(|a| {
            a.values
                .iter()
                .filter_map(|v| v.as_i32())
                .map(|v| v.max(1) as u32)
                .collect()
        })
        .unwrap_or_default();
    let wait = op
        .find("notify-wait")
        .and_then(|a| a.as_bool())
        .unwrap_or(false);
    let requester = auth::effective_username(ctx.username, ctx.req);

    let collect = |resp: &mut Message| -> usize {
        let mut delivered = 0;
        for (index, id) in ids.iter().enumerate() {
            let since = seqs.get(index).copied().unwrap_or(1);
            let Some(sub) = ctx.system.subscription_by_id(*id) else {
                debug!(subscription = id, "get-notifications: unknown id");
                continue;
            };
            let owner = sub.inner.read_lock().username.clone();
            if owner != requester
                && !auth::can_view_all(&ctx.system.config, ctx.username, ctx.req, &owner)
            {
                debug!(subscription = id, "get-notifications: foreign subscription");
                continue;
            }
            for event in sub.events_since(since) {
                resp.groups.push(event.group);
                delivered += 1;
            }
        }
        delivered
    };

    let mut resp = Message::response(ctx.req, StatusCode::SuccessfulOk);
    resp.add(
        DelimiterTag::OperationAttributes,
        Attribute::integer(
            "notify-get-interval",
            ctx.system.config.notify_wait_secs as i32,
        ),
    );

    // Register for the broadcast before checking, so an event landing
    // between the check and the wait still wakes us.
    let notified = ctx.system.event_ping.notified();
    tokio::pin!(notified);
    if collect(&mut resp) == 0 && wait {
        // One bounded wait; any add-event broadcast wakes every waiter.
        let _ = tokio::time::timeout(
            std::time::Duration::from_secs(ctx.system.config.notify_wait_secs),
            &mut notified,
        )
        .await;
        collect(&mut resp);
    }

    Ok(resp)
}
