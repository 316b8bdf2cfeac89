// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Decoded IPP messages: a header, ordered attribute groups, and the
// document payload that followed the end-of-attributes tag.

use crate::attr::{Attribute, AttributeGroup};
use crate::model::{DelimiterTag, Operation, StatusCode};

/// A decoded IPP request or response.
///
/// `code` is the operation-id for requests and the status-code for
/// responses; the two occupy the same header bytes (RFC 8010 §3.1.1).
#[derive(Debug, Clone)]
pub struct Message {
    pub version: (u8, u8),
    pub code: u16,
    pub request_id: u32,
    pub groups: Vec<AttributeGroup>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Start a request message.
    pub fn request(operation: Operation, request_id: u32) -> Self {
        Self {
            version: (2, 0),
            code: operation.code(),
            request_id,
            groups: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Start a response to `req`, echoing version and request-id, with
    /// the mandatory charset and natural-language operation attributes.
    pub fn response(req: &Message, status: StatusCode) -> Self {
        let mut resp = Self {
            version: req.version,
            code: status.code(),
            request_id: req.request_id,
            groups: Vec::new(),
            payload: Vec::new(),
        };
        resp.new_group(DelimiterTag::OperationAttributes);
        resp.add(
            DelimiterTag::OperationAttributes,
            Attribute::charset("attributes-charset", "utf-8"),
        );
        resp.add(
            DelimiterTag::OperationAttributes,
            Attribute::language("attributes-natural-language", "en"),
        );
        resp
    }

    /// Response carrying a diagnostic `status-message`.
    pub fn error_response(req: &Message, status: StatusCode, message: &str) -> Self {
        let mut resp = Self::response(req, status);
        resp.add(
            DelimiterTag::OperationAttributes,
            Attribute::text("status-message", message),
        );
        resp
    }

    pub fn operation(&self) -> Option<Operation> {
        Operation::from_u16(self.code)
    }

    /// First group with the given delimiter tag.
    pub fn group(&self, tag: DelimiterTag) -> Option<&AttributeGroup> {
        self.groups.iter().find(|g| g.tag == tag)
    }

    pub fn group_mut(&mut self, tag: DelimiterTag) -> Option<&mut AttributeGroup> {
        self.groups.iter_mut().find(|g| g.tag == tag)
    }

    /// All groups with the given delimiter tag, in wire order.
    pub fn groups_of(&self, tag: DelimiterTag) -> impl Iterator<Item = &AttributeGroup> {
        self.groups.iter().filter(move |g| g.tag == tag)
    }

    /// The operation-attributes group.
    pub fn op_attrs(&self) -> Option<&AttributeGroup> {
        self.group(DelimiterTag::OperationAttributes)
    }

    /// Find an attribute within the first group of the given tag.
    pub fn find(&self, tag: DelimiterTag, name: &str) -> Option<&Attribute> {
        self.group(tag).and_then(|g| g.find(name))
    }

    /// Open a fresh group; subsequent `add` calls with the same tag land
    /// in it. Repeated groups of one tag (per-job, per-event) are built
    /// by calling this between runs.
    pub fn new_group(&mut self, tag: DelimiterTag) -> &mut AttributeGroup {
        self.groups.push(AttributeGroup::new(tag));
        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }

    /// Append to the trailing group of the given tag, opening one if the
    /// message does not end with it.
    pub fn add(&mut self, tag: DelimiterTag, attr: Attribute) {
        match self.groups.last_mut() {
            Some(last) if last.tag == tag => last.add(attr),
            _ => self.new_group(tag).add(attr),
        }
    }

    /// The values of `requested-attributes`, if present.
    pub fn requested(&self) -> Option<Vec<&str>> {
        self.find(DelimiterTag::OperationAttributes, "requested-attributes")
            .map(|a| a.strings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn response_echoes_header_and_adds_basics() {
        let mut req = Message::request(Operation::PrintJob, 42);
        req.version = (1, 1);
        let resp = Message::response(&req, StatusCode::SuccessfulOk);
        assert_eq!(resp.version, (1, 1));
        assert_eq!(resp.request_id, 42);
        assert_eq!(resp.code, 0x0000);
        let op = resp.op_attrs().unwrap();
        assert_eq!(op.find("attributes-charset").unwrap().as_str(), Some("utf-8"));
        assert_eq!(
            op.find("attributes-natural-language").unwrap().as_str(),
            Some("en")
        );
    }

    #[test]
    fn add_appends_to_trailing_group_only() {
        let mut msg = Message::request(Operation::GetJobs, 1);
        msg.add(DelimiterTag::JobAttributes, Attribute::integer("job-id", 1));
        msg.new_group(DelimiterTag::JobAttributes);
        msg.add(DelimiterTag::JobAttributes, Attribute::integer("job-id", 2));
        assert_eq!(msg.groups_of(DelimiterTag::JobAttributes).count(), 2);
        assert_eq!(msg.groups[0].attrs[0].as_i32(), Some(1));
        assert_eq!(msg.groups[1].attrs[0].as_i32(), Some(2));
    }

    #[test]
    fn requested_attributes_values() {
        let mut msg = Message::request(Operation::GetPrinterAttributes, 1);
        msg.add(
            DelimiterTag::OperationAttributes,
            Attribute::with_values(
                "requested-attributes",
                vec![
                    Value::Keyword("printer-name".into()),
                    Value::Keyword("printer-state".into()),
                ],
            ),
        );
        assert_eq!(
            msg.requested(),
            Some(vec!["printer-name", "printer-state"])
        );
    }
}
