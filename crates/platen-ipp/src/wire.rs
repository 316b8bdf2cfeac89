// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Binary codec for IPP messages (RFC 8010 §3).
//
// ```text
// version-number:  2 bytes (major, minor)
// operation-id or status-code: 2 bytes (big-endian u16)
// request-id:      4 bytes (big-endian u32)
// attribute-groups: delimiter tag, then attributes
//   value-tag:     1 byte
//   name-length:   2 bytes + name (empty name = additional value)
//   value-length:  2 bytes + value
// end-of-attributes-tag: 0x03
// document-data: remainder
// ```
//
// Collections are framed as begCollection / memberAttrName / endCollection
// runs per RFC 8010 §3.1.6 and may nest.

use platen_core::error::{PlatenError, Result};

use crate::attr::{Attribute, AttributeGroup};
use crate::message::Message;
use crate::model::{DelimiterTag, ValueTag};
use crate::value::{DateTimeValue, Member, Value};

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn take_u8(&mut self, what: &str) -> Result<u8> {
        let b = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| PlatenError::BadRequest(format!("truncated {what}")))?;
        self.pos += 1;
        Ok(b)
    }

    fn take_u16(&mut self, what: &str) -> Result<u16> {
        if self.remaining() < 2 {
            return Err(PlatenError::BadRequest(format!("truncated {what}")));
        }
        let v = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    fn take_bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(PlatenError::BadRequest(format!("truncated {what}")));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

fn take_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a raw IPP message. The caller decides whether `code` is an
/// operation-id or a status-code.
pub fn parse(data: &[u8]) -> Result<Message> {
    if data.len() < 8 {
        return Err(PlatenError::BadRequest(format!(
            "IPP message too short: {} bytes",
            data.len()
        )));
    }

    let version = (data[0], data[1]);
    let code = u16::from_be_bytes([data[2], data[3]]);
    let request_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

    let mut cur = Cursor::new(data);
    cur.pos = 8;

    let mut groups: Vec<AttributeGroup> = Vec::new();
    let mut current: Option<AttributeGroup> = None;
    let mut saw_end = false;

    while let Some(tag) = cur.peek_u8() {
        // Delimiter tags occupy 0x00..=0x0F.
        if tag <= 0x0F {
            cur.pos += 1;
            if let Some(group) = current.take() {
                groups.push(group);
            }
            if tag == DelimiterTag::EndOfAttributes as u8 {
                saw_end = true;
                break;
            }
            let delim = DelimiterTag::from_u8(tag)
                .ok_or_else(|| PlatenError::BadRequest(format!("bad delimiter tag 0x{tag:02x}")))?;
            current = Some(AttributeGroup::new(delim));
            continue;
        }

        let value_tag = cur.take_u8("value tag")?;
        let name_len = cur.take_u16("name-length")? as usize;
        let name = String::from_utf8_lossy(cur.take_bytes(name_len, "attribute name")?).into_owned();

        let vtag = ValueTag::from_u8(value_tag)
            .ok_or_else(|| PlatenError::BadRequest(format!("bad value tag 0x{value_tag:02x}")))?;

        let value = match vtag {
            ValueTag::BegCollection => {
                let skip = cur.take_u16("collection value-length")? as usize;
                cur.take_bytes(skip, "collection value")?;
                Value::Collection(parse_collection(&mut cur)?)
            }
            ValueTag::EndCollection => {
                return Err(PlatenError::BadRequest(
                    "endCollection outside a collection".into(),
                ));
            }
            ValueTag::MemberAttrName => {
                return Err(PlatenError::BadRequest(
                    "memberAttrName outside a collection".into(),
                ));
            }
            _ => {
                let value_len = cur.take_u16("value-length")? as usize;
                let bytes = cur.take_bytes(value_len, "attribute value")?;
                parse_value(vtag, bytes)?
            }
        };

        let group = current.as_mut().ok_or_else(|| {
            PlatenError::BadRequest("attribute outside of any group".into())
        })?;

        if name.is_empty() {
            // Additional value of the preceding attribute (1setOf).
            let prev = group.attrs.last_mut().ok_or_else(|| {
                PlatenError::BadRequest("additional value with no preceding attribute".into())
            })?;
            prev.values.push(value);
        } else {
            group.add(Attribute::new(&name, value));
        }
    }

    if !saw_end {
        return Err(PlatenError::BadRequest("missing end-of-attributes tag".into()));
    }
    if let Some(group) = current.take() {
        groups.push(group);
    }

    Ok(Message {
        version,
        code,
        request_id,
        groups,
        payload: data[cur.pos..].to_vec(),
    })
}

/// Parse member items up to and including the matching endCollection.
fn parse_collection(cur: &mut Cursor<'_>) -> Result<Vec<Member>> {
    let mut members: Vec<Member> = Vec::new();

    loop {
        let tag = cur.take_u8("collection member tag")?;
        let name_len = cur.take_u16("member name-length")? as usize;
        cur.take_bytes(name_len, "member name")?;

        if tag == ValueTag::EndCollection as u8 {
            let trailing = cur.take_u16("endCollection value-length")? as usize;
            cur.take_bytes(trailing, "endCollection value")?;
            break;
        }

        let vtag = ValueTag::from_u8(tag)
            .ok_or_else(|| PlatenError::BadRequest(format!("bad member tag 0x{tag:02x}")))?;

        match vtag {
            ValueTag::MemberAttrName => {
                let len = cur.take_u16("member name value-length")? as usize;
                let name =
                    String::from_utf8_lossy(cur.take_bytes(len, "member name value")?).into_owned();
                members.push(Member {
                    name,
                    values: Vec::new(),
                });
            }
            ValueTag::BegCollection => {
                let skip = cur.take_u16("nested collection value-length")? as usize;
                cur.take_bytes(skip, "nested collection value")?;
                let inner = Value::Collection(parse_collection(cur)?);
                push_member_value(&mut members, inner)?;
            }
            _ => {
                let len = cur.take_u16("member value-length")? as usize;
                let bytes = cur.take_bytes(len, "member value")?;
                let value = parse_value(vtag, bytes)?;
                push_member_value(&mut members, value)?;
            }
        }
    }

    for member in &members {
        if member.values.is_empty() {
            return Err(PlatenError::BadRequest(format!(
                "collection member '{}' has no value",
                member.name
            )));
        }
    }
    Ok(members)
}

fn push_member_value(members: &mut [Member], value: Value) -> Result<()> {
    match members.last_mut() {
        Some(member) => {
            member.values.push(value);
            Ok(())
        }
        None => Err(PlatenError::BadRequest(
            "collection value before memberAttrName".into(),
        )),
    }
}

/// Decode a single scalar value from its payload bytes.
fn parse_value(tag: ValueTag, bytes: &[u8]) -> Result<Value> {
    let fixed = |n: usize| -> Result<()> {
        if bytes.len() != n {
            Err(PlatenError::BadRequest(format!(
                "bad value length {} for tag {:?}",
                bytes.len(),
                tag
            )))
        } else {
            Ok(())
        }
    };

    let value = match tag {
        ValueTag::Integer => {
            fixed(4)?;
            Value::Integer(take_i32(bytes, 0))
        }
        ValueTag::Enum => {
            fixed(4)?;
            Value::Enum(take_i32(bytes, 0))
        }
        ValueTag::Boolean => {
            fixed(1)?;
            Value::Boolean(bytes[0] != 0)
        }
        ValueTag::RangeOfInteger => {
            fixed(8)?;
            Value::RangeOfInteger {
                lower: take_i32(bytes, 0),
                upper: take_i32(bytes, 4),
            }
        }
        ValueTag::Resolution => {
            fixed(9)?;
            Value::Resolution {
                xres: take_i32(bytes, 0),
                yres: take_i32(bytes, 4),
                units: bytes[8] as i8,
            }
        }
        ValueTag::DateTime => {
            fixed(11)?;
            Value::DateTime(DateTimeValue {
                year: u16::from_be_bytes([bytes[0], bytes[1]]),
                month: bytes[2],
                day: bytes[3],
                hour: bytes[4],
                minutes: bytes[5],
                seconds: bytes[6],
                deci_seconds: bytes[7],
                utc_dir: bytes[8],
                utc_hours: bytes[9],
                utc_mins: bytes[10],
            })
        }
        ValueTag::OctetString => Value::OctetString(bytes.to_vec()),
        ValueTag::TextWithLanguage | ValueTag::NameWithLanguage => {
            let mut cur = Cursor::new(bytes);
            let lang_len = cur.take_u16("language length")? as usize;
            let lang =
                String::from_utf8_lossy(cur.take_bytes(lang_len, "language")?).into_owned();
            let text_len = cur.take_u16("string length")? as usize;
            let text = String::from_utf8_lossy(cur.take_bytes(text_len, "string")?).into_owned();
            if tag == ValueTag::TextWithLanguage {
                Value::TextWithLang { lang, text }
            } else {
                Value::NameWithLang { lang, name: text }
            }
        }
        ValueTag::TextWithoutLanguage => Value::Text(lossy(bytes)),
        ValueTag::NameWithoutLanguage => Value::Name(lossy(bytes)),
        ValueTag::Keyword => Value::Keyword(lossy(bytes)),
        ValueTag::Uri => Value::Uri(lossy(bytes)),
        ValueTag::UriScheme => Value::UriScheme(lossy(bytes)),
        ValueTag::Charset => Value::Charset(lossy(bytes)),
        ValueTag::NaturalLanguage => Value::Language(lossy(bytes)),
        ValueTag::MimeMediaType => Value::MimeType(lossy(bytes)),
        ValueTag::Unsupported => Value::Unsupported,
        ValueTag::Unknown => Value::Unknown,
        ValueTag::NoValue => Value::NoValue,
        ValueTag::NotSettable => Value::NotSettable,
        ValueTag::DeleteAttribute => Value::DeleteAttribute,
        ValueTag::AdminDefine => Value::AdminDefine,
        ValueTag::BegCollection | ValueTag::EndCollection | ValueTag::MemberAttrName => {
            return Err(PlatenError::BadRequest(
                "collection framing tag in scalar position".into(),
            ));
        }
    };
    Ok(value)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a message into its wire bytes.
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256 + msg.payload.len());
    buf.push(msg.version.0);
    buf.push(msg.version.1);
    buf.extend_from_slice(&msg.code.to_be_bytes());
    buf.extend_from_slice(&msg.request_id.to_be_bytes());

    for group in &msg.groups {
        buf.push(group.tag as u8);
        for attr in &group.attrs {
            encode_attribute(&mut buf, attr);
        }
    }

    buf.push(DelimiterTag::EndOfAttributes as u8);
    buf.extend_from_slice(&msg.payload);
    buf
}

fn encode_attribute(buf: &mut Vec<u8>, attr: &Attribute) {
    for (i, value) in attr.values.iter().enumerate() {
        buf.push(value.tag() as u8);
        let name: &str = if i == 0 { &attr.name } else { "" };
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        encode_value(buf, value);
    }
}

/// Write the value-length field and payload; collections expand into
/// their member item run.
fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) | Value::Enum(i) => {
            buf.extend_from_slice(&4u16.to_be_bytes());
            buf.extend_from_slice(&i.to_be_bytes());
        }
        Value::Boolean(b) => {
            buf.extend_from_slice(&1u16.to_be_bytes());
            buf.push(*b as u8);
        }
        Value::RangeOfInteger { lower, upper } => {
            buf.extend_from_slice(&8u16.to_be_bytes());
            buf.extend_from_slice(&lower.to_be_bytes());
            buf.extend_from_slice(&upper.to_be_bytes());
        }
        Value::Resolution { xres, yres, units } => {
            buf.extend_from_slice(&9u16.to_be_bytes());
            buf.extend_from_slice(&xres.to_be_bytes());
            buf.extend_from_slice(&yres.to_be_bytes());
            buf.push(*units as u8);
        }
        Value::DateTime(d) => {
            buf.extend_from_slice(&11u16.to_be_bytes());
            buf.extend_from_slice(&d.year.to_be_bytes());
            buf.extend_from_slice(&[
                d.month,
                d.day,
                d.hour,
                d.minutes,
                d.seconds,
                d.deci_seconds,
                d.utc_dir,
                d.utc_hours,
                d.utc_mins,
            ]);
        }
        Value::OctetString(bytes) => {
            buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
        Value::TextWithLang { lang, text } | Value::NameWithLang { lang, name: text } => {
            let total = lang.len() + text.len() + 4;
            buf.extend_from_slice(&(total as u16).to_be_bytes());
            buf.extend_from_slice(&(lang.len() as u16).to_be_bytes());
            buf.extend_from_slice(lang.as_bytes());
            buf.extend_from_slice(&(text.len() as u16).to_be_bytes());
            buf.extend_from_slice(text.as_bytes());
        }
        Value::Keyword(s)
        | Value::Name(s)
        | Value::Text(s)
        | Value::Uri(s)
        | Value::UriScheme(s)
        | Value::MimeType(s)
        | Value::Charset(s)
        | Value::Language(s) => {
            buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Collection(members) => {
            // begCollection's own value is empty.
            buf.extend_from_slice(&0u16.to_be_bytes());
            for member in members {
                buf.push(ValueTag::MemberAttrName as u8);
                buf.extend_from_slice(&0u16.to_be_bytes());
                buf.extend_from_slice(&(member.name.len() as u16).to_be_bytes());
                buf.extend_from_slice(member.name.as_bytes());
                for v in &member.values {
                    buf.push(v.tag() as u8);
                    buf.extend_from_slice(&0u16.to_be_bytes());
                    encode_value(buf, v);
                }
            }
            buf.push(ValueTag::EndCollection as u8);
            buf.extend_from_slice(&0u16.to_be_bytes());
            buf.extend_from_slice(&0u16.to_be_bytes());
        }
        Value::NoValue
        | Value::Unknown
        | Value::Unsupported
        | Value::NotSettable
        | Value::DeleteAttribute
        | Value::AdminDefine => {
            buf.extend_from_slice(&0u16.to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Operation, StatusCode};

    fn roundtrip(msg: &Message) -> Message {
        parse(&encode(msg)).expect("roundtrip parse")
    }

    #[test]
    fn header_roundtrip() {
        let mut msg = Message::request(Operation::GetPrinterAttributes, 99);
        msg.new_group(DelimiterTag::OperationAttributes);
        let out = roundtrip(&msg);
        assert_eq!(out.version, (2, 0));
        assert_eq!(out.code, Operation::GetPrinterAttributes.code());
        assert_eq!(out.request_id, 99);
    }

    #[test]
    fn scalar_values_roundtrip() {
        let mut msg = Message::request(Operation::PrintJob, 1);
        let g = msg.new_group(DelimiterTag::OperationAttributes);
        g.add(Attribute::charset("attributes-charset", "utf-8"));
        g.add(Attribute::language("attributes-natural-language", "en"));
        g.add(Attribute::integer("copies", 3));
        g.add(Attribute::boolean("last-document", true));
        g.add(Attribute::enum_value("job-state", 5));
        g.add(Attribute::new(
            "page-ranges",
            Value::RangeOfInteger { lower: 1, upper: 4 },
        ));
        g.add(Attribute::new(
            "printer-resolution",
            Value::Resolution {
                xres: 600,
                yres: 600,
                units: 3,
            },
        ));
        g.add(Attribute::new(
            "job-name",
            Value::NameWithLang {
                lang: "en".into(),
                name: "report".into(),
            },
        ));
        let out = roundtrip(&msg);
        let g = out.op_attrs().unwrap();
        assert_eq!(g.find("copies").unwrap().as_i32(), Some(3));
        assert_eq!(g.find("last-document").unwrap().as_bool(), Some(true));
        assert_eq!(
            g.find("page-ranges").unwrap().value(),
            Some(&Value::RangeOfInteger { lower: 1, upper: 4 })
        );
        assert_eq!(g.find("job-name").unwrap().as_str(), Some("report"));
    }

    #[test]
    fn one_set_of_roundtrip() {
        let mut msg = Message::request(Operation::GetPrinterAttributes, 2);
        msg.add(
            DelimiterTag::OperationAttributes,
            Attribute::keywords("requested-attributes", &["printer-name", "printer-state"]),
        );
        let bytes = encode(&msg);
        let out = parse(&bytes).unwrap();
        let attr = out
            .find(DelimiterTag::OperationAttributes, "requested-attributes")
            .unwrap();
        assert_eq!(attr.values.len(), 2);
        assert_eq!(attr.strings(), vec!["printer-name", "printer-state"]);
    }

    #[test]
    fn out_of_band_roundtrip() {
        let mut msg = Message::request(Operation::SetJobAttributes, 3);
        msg.add(
            DelimiterTag::JobAttributes,
            Attribute::new("job-hold-until", Value::DeleteAttribute),
        );
        let out = roundtrip(&msg);
        assert_eq!(
            out.find(DelimiterTag::JobAttributes, "job-hold-until")
                .unwrap()
                .value(),
            Some(&Value::DeleteAttribute)
        );
    }

    #[test]
    fn collection_wire_layout() {
        // Reference byte layout: begCollection, memberAttrName carrying the
        // member name as its value, the member value with an empty name,
        // then endCollection with empty name and value.
        let mut msg = Message::request(Operation::PrintJob, 1);
        msg.add(
            DelimiterTag::JobAttributes,
            Attribute::new(
                "coll",
                Value::Collection(vec![Member::new("abcd", Value::Integer(0x2222_2222))]),
            ),
        );
        let bytes = encode(&msg);
        let attr_bytes = &bytes[8 + 1..]; // skip header + job group delimiter
        assert_eq!(
            &attr_bytes[..attr_bytes.len() - 1], // trailing end-of-attributes
            &[
                0x34, 0, 4, b'c', b'o', b'l', b'l', 0, 0, 0x4a, 0, 0, 0, 4, b'a', b'b', b'c',
                b'd', 0x21, 0, 0, 0, 4, 0x22, 0x22, 0x22, 0x22, 0x37, 0, 0, 0, 0,
            ]
        );
    }

    #[test]
    fn collection_roundtrip_nested() {
        let media_size = Value::Collection(vec![
            Member::new("x-dimension", Value::Integer(21000)),
            Member::new("y-dimension", Value::Integer(29700)),
        ]);
        let media_col = Value::Collection(vec![
            Member::new("media-size", media_size.clone()),
            Member::new("media-type", Value::Keyword("stationery".into())),
        ]);
        let mut msg = Message::request(Operation::PrintJob, 7);
        msg.add(
            DelimiterTag::JobAttributes,
            Attribute::new("media-col", media_col.clone()),
        );
        let out = roundtrip(&msg);
        assert_eq!(
            out.find(DelimiterTag::JobAttributes, "media-col")
                .unwrap()
                .value(),
            Some(&media_col)
        );
    }

    #[test]
    fn repeated_groups_roundtrip() {
        let mut msg = Message::request(Operation::GetJobs, 4);
        msg.new_group(DelimiterTag::OperationAttributes);
        msg.add(DelimiterTag::JobAttributes, Attribute::integer("job-id", 1));
        msg.new_group(DelimiterTag::JobAttributes);
        msg.add(DelimiterTag::JobAttributes, Attribute::integer("job-id", 2));
        let out = roundtrip(&msg);
        let ids: Vec<i32> = out
            .groups_of(DelimiterTag::JobAttributes)
            .filter_map(|g| g.find("job-id").and_then(|a| a.as_i32()))
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn payload_survives() {
        let mut msg = Message::request(Operation::PrintJob, 5);
        msg.new_group(DelimiterTag::OperationAttributes);
        msg.payload = b"%PDF-1.7 fake".to_vec();
        let out = roundtrip(&msg);
        assert_eq!(out.payload, b"%PDF-1.7 fake");
    }

    #[test]
    fn truncated_messages_are_rejected() {
        assert!(parse(&[1, 1, 0]).is_err());
        // Header but no end-of-attributes tag.
        assert!(parse(&[2, 0, 0, 2, 0, 0, 0, 1]).is_err());
        // Attribute with a name length running past the buffer.
        let bad = [2u8, 0, 0, 2, 0, 0, 0, 1, 0x01, 0x44, 0xFF, 0xFF];
        assert!(parse(&bad).is_err());
    }

    #[test]
    fn status_code_in_response_header() {
        let req = Message::request(Operation::PrintJob, 9);
        let resp = Message::response(&req, StatusCode::ClientErrorNotFound);
        let out = roundtrip(&resp);
        assert_eq!(out.code, StatusCode::ClientErrorNotFound.code());
    }
}
