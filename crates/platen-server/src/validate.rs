// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Table-driven attribute validation.
//
// Three static schemas cover job-creation attributes, printer
// creation/settable attributes, and system-settable attributes. Each row
// declares the expected syntax, an optional out-of-band alternate, the
// 1setOf flag, whether the attribute may ride in the operation group on
// create operations, and an optional value check.
//
// Failures collect the offending attributes verbatim; the caller copies
// them into the unsupported group of an `attributes-or-values` (or
// `attributes-not-settable`) response.

use platen_ipp::attr::{Attribute, AttributeGroup};
use platen_ipp::message::Message;
use platen_ipp::model::{DelimiterTag, ValueTag};
use platen_ipp::value::Value;

/// One schema row.
pub struct SchemaRow {
    pub name: &'static str,
    pub tag: ValueTag,
    pub alt_tag: Option<ValueTag>,
    pub multi: bool,
    /// Create operations may carry this attribute in the operation group.
    pub op_exempt: bool,
    pub check: Option<fn(&Attribute) -> bool>,
}

const fn row(
    name: &'static str,
    tag: ValueTag,
    alt_tag: Option<ValueTag>,
    multi: bool,
    op_exempt: bool,
    check: Option<fn(&Attribute) -> bool>,
) -> SchemaRow {
    SchemaRow {
        name,
        tag,
        alt_tag,
        multi,
        op_exempt,
        check,
    }
}

// -- Value checks -----------------------------------------------------------

fn check_copies(a: &Attribute) -> bool {
    a.as_i32().map(|v| (1..=999).contains(&v)).unwrap_or(false)
}

fn check_priority(a: &Attribute) -> bool {
    a.as_i32().map(|v| (1..=100).contains(&v)).unwrap_or(false)
}

fn check_number_up(a: &Attribute) -> bool {
    a.as_i32()
        .map(|v| matches!(v, 1 | 2 | 4 | 6 | 9 | 16))
        .unwrap_or(false)
}

fn check_orientation(a: &Attribute) -> bool {
    a.as_i32().map(|v| (3..=7).contains(&v)).unwrap_or(false)
}

fn check_quality(a: &Attribute) -> bool {
    a.as_i32().map(|v| (3..=5).contains(&v)).unwrap_or(false)
}

fn check_page_ranges(a: &Attribute) -> bool {
    a.values.iter().all(|v| match v {
        Value::RangeOfInteger { lower, upper } => *lower >= 1 && upper >= lower,
        _ => false,
    })
}

fn check_positive(a: &Attribute) -> bool {
    match a.value() {
        Some(Value::Integer(v)) => *v > 0,
        Some(v) if v.is_out_of_band() => true,
        _ => false,
    }
}

// -- Schemas ----------------------------------------------------------------

use ValueTag::*;

/// Attributes a client may supply in the job group (or, where exempt, in
/// the operation group) of a job-creation request.
pub static JOB_CREATION: &[SchemaRow] = &[
    row("copies", Integer, None, false, false, Some(check_copies)),
    row("finishings", Enum, None, true, false, None),
    row("ipp-attribute-fidelity", Boolean, None, false, true, None),
    row("job-hold-until", Keyword, Some(NameWithoutLanguage), false, false, None),
    row("job-hold-until-time", DateTime, Some(NoValue), false, false, None),
    row("job-name", NameWithoutLanguage, None, false, true, None),
    row("job-priority", Integer, None, false, false, Some(check_priority)),
    row("job-sheets", Keyword, Some(NameWithoutLanguage), false, false, None),
    row("media", Keyword, Some(NameWithoutLanguage), false, false, None),
    row("media-col", BegCollection, None, false, false, None),
    row("multiple-document-handling", Keyword, None, false, false, None),
    row("number-up", Integer, None, false, false, Some(check_number_up)),
    row("orientation-requested", Enum, None, false, false, Some(check_orientation)),
    row("output-bin", Keyword, None, false, false, None),
    row("page-ranges", RangeOfInteger, None, true, false, Some(check_page_ranges)),
    row("print-color-mode", Keyword, None, false, false, None),
    row("print-content-optimize", Keyword, None, false, false, None),
    row("print-quality", Enum, None, false, false, Some(check_quality)),
    row("print-scaling", Keyword, None, false, false, None),
    row("printer-resolution", Resolution, None, false, false, None),
    row("sides", Keyword, None, false, false, None),
];

/// Attributes settable on a printer (and acceptable to Create-Printer).
pub static PRINTER_SETTABLE: &[SchemaRow] = &[
    row("copies-default", Integer, None, false, false, Some(check_copies)),
    row("device-uri", Uri, None, false, false, None),
    row("document-format-default", MimeMediaType, None, false, false, None),
    row("media-default", Keyword, Some(NameWithoutLanguage), false, false, None),
    row("media-ready", Keyword, Some(NameWithoutLanguage), true, false, None),
    row("orientation-requested-default", Enum, None, false, false, Some(check_orientation)),
    row("print-color-mode-default", Keyword, None, false, false, None),
    row("print-quality-default", Enum, None, false, false, Some(check_quality)),
    row("printer-contact-col", BegCollection, None, false, false, None),
    row("printer-device-id", TextWithoutLanguage, None, false, false, None),
    row("printer-dns-sd-name", NameWithoutLanguage, Some(NoValue), false, false, None),
    row("printer-geo-location", Uri, Some(Unknown), false, false, None),
    row("printer-icc-profiles", BegCollection, None, true, false, None),
    row("printer-info", TextWithoutLanguage, None, false, false, None),
    row("printer-location", TextWithoutLanguage, None, false, false, None),
    row("printer-name", NameWithoutLanguage, None, false, false, None),
    row("printer-organization", TextWithoutLanguage, None, false, false, None),
    row("printer-organizational-unit", TextWithoutLanguage, None, false, false, None),
    row("printer-resolution-default", Resolution, None, false, false, None),
    row("sides-default", Keyword, None, false, false, None),
];

/// Attributes settable on the system object.
pub static SYSTEM_SETTABLE: &[SchemaRow] = &[
    row("system-contact-col", BegCollection, None, false, false, None),
    row("system-default-printer-id", Integer, Some(NoValue), false, false, Some(check_positive)),
    row("system-dns-sd-name", NameWithoutLanguage, Some(NoValue), false, false, None),
    row("system-geo-location", Uri, Some(Unknown), false, false, None),
    row("system-info", TextWithoutLanguage, None, false, false, None),
    row("system-location", TextWithoutLanguage, None, false, false, None),
    row("system-make-and-model", TextWithoutLanguage, None, false, false, None),
    row("system-name", NameWithoutLanguage, None, false, false, None),
];

// -- Validation -------------------------------------------------------------

pub fn schema_row<'a>(schema: &'a [SchemaRow], name: &str) -> Option<&'a SchemaRow> {
    schema.iter().find(|r| r.name == name)
}

/// Syntax match with the name<->nameWithLanguage and
/// text<->textWithLanguage equivalences.
fn tag_matches(row: &SchemaRow, actual: ValueTag) -> bool {
    let direct = |expected: ValueTag| {
        expected == actual
            || match expected {
                NameWithoutLanguage => actual == NameWithLanguage,
                NameWithLanguage => actual == NameWithoutLanguage,
                TextWithoutLanguage => actual == TextWithLanguage,
                TextWithLanguage => actual == TextWithoutLanguage,
                _ => false,
            }
    };
    direct(row.tag) || row.alt_tag.map(direct).unwrap_or(false)
}

/// Validate the attributes of `group_tag` (plus exempt attributes in the
/// operation group when `create_op`) against `schema`.
///
/// `supported` is the target's `*-creation-attributes-supported` list, if
/// it publishes one. Returns the offending attributes; an empty vector
/// means the request passed.
pub fn validate_group(
    msg: &Message,
    group_tag: DelimiterTag,
    schema: &[SchemaRow],
    supported: Option<&[&str]>,
    create_op: bool,
) -> Vec<Attribute> {
    let mut offenders: Vec<Attribute> = Vec::new();
    let empty = AttributeGroup::new(group_tag);
    let group = msg.group(group_tag).unwrap_or(&empty);

    // Collect the candidate attributes with their actual location.
    let mut candidates: Vec<(&Attribute, bool)> =
        group.attrs.iter().map(|a| (a, false)).collect();
    if create_op {
        if let Some(op) = msg.op_attrs() {
            for attr in &op.attrs {
                if schema_row(schema, &attr.name).map(|r| r.op_exempt).unwrap_or(false) {
                    candidates.push((attr, true));
                }
            }
        }
    }

    for (attr, in_op_group) in candidates {
        let Some(row) = schema_row(schema, &attr.name) else {
            // Unknown to the schema entirely.
            offenders.push(attr.clone());
            continue;
        };
        if let Some(supported) = supported {
            if !supported.contains(&attr.name.as_str()) {
                offenders.push(attr.clone());
                continue;
            }
        }
        if in_op_group && !row.op_exempt {
            offenders.push(attr.clone());
            continue;
        }
        if !tag_matches(row, attr.tag()) {
            offenders.push(attr.clone());
            continue;
        }
        if attr.values.len() > 1 && !row.multi {
            offenders.push(attr.clone());
            continue;
        }
        // Out-of-band alternates skip the value check.
        if attr.value().map(|v| v.is_out_of_band()).unwrap_or(false) {
            continue;
        }
        if let Some(check) = row.check {
            if !check(attr) {
                offenders.push(attr.clone());
            }
        }
    }

    offenders
}

#[cfg(test)]
mod tests {
    use super::*;
    use platen_ipp::model::Operation;

    fn job_request(attrs: Vec<Attribute>) -> Message {
        let mut msg = Message::request(Operation::PrintJob, 1);
        msg.new_group(DelimiterTag::OperationAttributes);
        let g = msg.new_group(DelimiterTag::JobAttributes);
        for attr in attrs {
            g.add(attr);
        }
        msg
    }

    #[test]
    fn valid_job_attributes_pass() {
        let msg = job_request(vec![
            Attribute::integer("copies", 2),
            Attribute::keyword("sides", "two-sided-long-edge"),
            Attribute::keyword("media", "iso_a4_210x297mm"),
        ]);
        let offenders = validate_group(&msg, DelimiterTag::JobAttributes, JOB_CREATION, None, true);
        assert!(offenders.is_empty());
    }

    #[test]
    fn zero_copies_is_an_offender_with_original_value() {
        let msg = job_request(vec![Attribute::integer("copies", 0)]);
        let offenders = validate_group(&msg, DelimiterTag::JobAttributes, JOB_CREATION, None, true);
        assert_eq!(offenders.len(), 1);
        assert_eq!(offenders[0].name, "copies");
        assert_eq!(offenders[0].as_i32(), Some(0));
    }

    #[test]
    fn wrong_syntax_is_rejected() {
        let msg = job_request(vec![Attribute::keyword("copies", "two")]);
        let offenders = validate_group(&msg, DelimiterTag::JobAttributes, JOB_CREATION, None, true);
        assert_eq!(offenders.len(), 1);
    }

    #[test]
    fn name_with_language_equivalence() {
        let msg = job_request(vec![Attribute::new(
            "job-hold-until",
            Value::NameWithLang {
                lang: "en".into(),
                name: "indefinite".into(),
            },
        )]);
        let offenders = validate_group(&msg, DelimiterTag::JobAttributes, JOB_CREATION, None, true);
        assert!(offenders.is_empty());
    }

    #[test]
    fn out_of_band_alternate_accepted() {
        let msg = job_request(vec![Attribute::new("job-hold-until-time", Value::NoValue)]);
        let offenders = validate_group(&msg, DelimiterTag::JobAttributes, JOB_CREATION, None, true);
        assert!(offenders.is_empty());
    }

    #[test]
    fn cardinality_enforced_unless_multi() {
        let single = job_request(vec![Attribute::with_values(
            "copies",
            vec![Value::Integer(1), Value::Integer(2)],
        )]);
        assert_eq!(
            validate_group(&single, DelimiterTag::JobAttributes, JOB_CREATION, None, true).len(),
            1
        );

        let multi = job_request(vec![Attribute::with_values(
            "page-ranges",
            vec![
                Value::RangeOfInteger { lower: 1, upper: 2 },
                Value::RangeOfInteger { lower: 5, upper: 9 },
            ],
        )]);
        assert!(
            validate_group(&multi, DelimiterTag::JobAttributes, JOB_CREATION, None, true)
                .is_empty()
        );
    }

    #[test]
    fn exempt_attribute_allowed_in_operation_group() {
        let mut msg = Message::request(Operation::PrintJob, 1);
        let op = msg.new_group(DelimiterTag::OperationAttributes);
        op.add(Attribute::name_value("job-name", "report"));
        op.add(Attribute::boolean("ipp-attribute-fidelity", false));
        let offenders = validate_group(&msg, DelimiterTag::JobAttributes, JOB_CREATION, None, true);
        assert!(offenders.is_empty());
    }

    #[test]
    fn supported_list_filters_attributes() {
        let msg = job_request(vec![
            Attribute::integer("copies", 2),
            Attribute::keyword("output-bin", "tray-1"),
        ]);
        let offenders = validate_group(
            &msg,
            DelimiterTag::JobAttributes,
            JOB_CREATION,
            Some(&["copies", "media", "sides"]),
            true,
        );
        assert_eq!(offenders.len(), 1);
        assert_eq!(offenders[0].name, "output-bin");
    }

    #[test]
    fn unknown_attribute_is_an_offender() {
        let msg = job_request(vec![Attribute::keyword("frobnicate", "yes")]);
        let offenders = validate_group(&msg, DelimiterTag::JobAttributes, JOB_CREATION, None, true);
        assert_eq!(offenders.len(), 1);
    }

    #[test]
    fn system_settable_positive_id() {
        let mut msg = Message::request(Operation::SetSystemAttributes, 1);
        msg.new_group(DelimiterTag::OperationAttributes);
        let g = msg.new_group(DelimiterTag::SystemAttributes);
        g.add(Attribute::integer("system-default-printer-id", 0));
        let offenders = validate_group(
            &msg,
            DelimiterTag::SystemAttributes,
            SYSTEM_SETTABLE,
            None,
            false,
        );
        assert_eq!(offenders.len(), 1);
    }
}
