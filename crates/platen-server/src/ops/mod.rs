// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operation handlers, grouped by target object. Each handler enforces
// its authorization policy, validates inputs, mutates objects, and
// assembles the response; errors return immediately and mutations made
// before a failure stay (Set-System-Attributes is the one
// validate-everything-first exception).

pub mod job;
pub mod printer;
pub mod proxy;
pub mod resource;
pub mod subscription;
pub mod system;

use std::sync::Arc;

use platen_core::error::{PlatenError, Result};
use platen_ipp::attr::{Attribute, AttributeGroup, requested_selects};
use platen_ipp::message::Message;
use platen_ipp::model::{DelimiterTag, StatusCode};

use crate::printer::Printer;
use crate::store::System;
use crate::uri::Target;

/// Everything a handler needs for one request.
pub struct Ctx<'a> {
    pub system: &'a Arc<System>,
    /// HTTP-authenticated username, if any.
    pub username: Option<&'a str>,
    pub req: &'a Message,
    pub target: &'a Target,
}

impl Ctx<'_> {
    /// The printer this request addresses (directly or via a job URI).
    pub fn printer(&self) -> Result<Arc<Printer>> {
        match self.target {
            Target::Printer(printer) | Target::Job(printer, _) => Ok(Arc::clone(printer)),
            Target::System => Err(PlatenError::NotFound(
                "operation requires a printer target".into(),
            )),
        }
    }

    /// The job this request addresses: from the job URI, or from the
    /// `job-id` operation attribute against the target printer.
    pub fn job(&self) -> Result<(Arc<Printer>, Arc<crate::job::Job>)> {
        let (printer, job_id) = match self.target {
            Target::Job(printer, id) => (Arc::clone(printer), *id),
            Target::Printer(printer) => {
                let id = self
                    .req
                    .find(DelimiterTag::OperationAttributes, "job-id")
                    .and_then(|a| a.as_i32())
                    .ok_or_else(|| PlatenError::BadRequest("missing job-id".into()))?;
                (Arc::clone(printer), id)
            }
            Target::System => {
                return Err(PlatenError::NotFound("operation requires a job target".into()));
            }
        };
        let job = printer
            .job_by_id(job_id)
            .ok_or_else(|| PlatenError::NotFound(format!("job {job_id} not found")))?;
        Ok((printer, job))
    }

    /// A printer addressed by `printer-id` on a system-targeted request.
    pub fn printer_by_id_attr(&self) -> Result<Arc<Printer>> {
        let id = self
            .req
            .find(DelimiterTag::OperationAttributes, "printer-id")
            .and_then(|a| a.as_i32())
            .ok_or_else(|| PlatenError::BadRequest("missing printer-id".into()))?;
        self.system
            .printer_by_id(id)
            .ok_or_else(|| PlatenError::NotFound(format!("printer {id} not found")))
    }

    pub fn requested(&self) -> Option<Vec<&str>> {
        self.req.requested()
    }
}

/// Response for requests that failed attribute validation: the offending
/// attributes ride in the unsupported group with their original values.
pub fn unsupported_response(req: &Message, offenders: Vec<Attribute>, settable: bool) -> Message {
    let status = if settable {
        StatusCode::ClientErrorAttributesNotSettable
    } else {
        StatusCode::ClientErrorAttributesOrValuesNotSupported
    };
    let mut resp = Message::error_response(req, status, "unsupported attributes or values");
    let group = resp.new_group(DelimiterTag::UnsupportedAttributes);
    for attr in offenders {
        group.add(attr);
    }
    resp
}

/// Copy `source` into `resp` as a group of `tag`, filtered by the
/// request's `requested-attributes`.
pub fn add_filtered_group(
    resp: &mut Message,
    tag: DelimiterTag,
    source: &AttributeGroup,
    requested: Option<&[&str]>,
) {
    let filtered = source.copy_filtered(tag, |a| requested_selects(requested, &a.name));
    resp.groups.push(filtered);
}

/// Privacy filter for jobs viewed by strangers: only the public
/// identification subset survives.
pub fn privacy_filter(group: &AttributeGroup) -> AttributeGroup {
    const PUBLIC: &[&str] = &[
        "job-id",
        "job-uri",
        "job-printer-uri",
        "job-state",
        "job-state-reasons",
        "time-at-creation",
        "time-at-processing",
        "time-at-completed",
    ];
    group.copy_filtered(group.tag, |a| PUBLIC.contains(&a.name.as_str()))
}
