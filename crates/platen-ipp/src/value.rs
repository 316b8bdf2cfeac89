// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Typed IPP attribute values (RFC 8010 §3.5.2 syntaxes).
//
// A value is a tagged record, not a trait hierarchy: the wire format is a
// closed set of syntaxes and a single sum type matches it directly.
// Out-of-band kinds (no-value, unknown, unsupported, not-settable,
// admin-define, delete-attribute) carry no payload but are first-class
// values so they survive find/copy like any other.

use std::fmt;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::model::ValueTag;

/// An IPP `dateTime` value (RFC 8010: DER GeneralizedTime layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTimeValue {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub deci_seconds: u8,
    pub utc_dir: u8,
    pub utc_hours: u8,
    pub utc_mins: u8,
}

impl DateTimeValue {
    /// Snapshot a UTC timestamp into the wire layout.
    pub fn from_utc(t: DateTime<Utc>) -> Self {
        Self {
            year: t.year() as u16,
            month: t.month() as u8,
            day: t.day() as u8,
            hour: t.hour() as u8,
            minutes: t.minute() as u8,
            seconds: t.second() as u8,
            deci_seconds: (t.timestamp_subsec_millis() / 100) as u8,
            utc_dir: b'+',
            utc_hours: 0,
            utc_mins: 0,
        }
    }
}

/// A named member of a collection value; members may themselves be 1setOf.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub values: Vec<Value>,
}

impl Member {
    pub fn new(name: &str, value: Value) -> Self {
        Self {
            name: name.to_string(),
            values: vec![value],
        }
    }
}

/// One IPP attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    Boolean(bool),
    Enum(i32),
    Keyword(String),
    Name(String),
    NameWithLang { lang: String, name: String },
    Text(String),
    TextWithLang { lang: String, text: String },
    Uri(String),
    UriScheme(String),
    MimeType(String),
    Charset(String),
    Language(String),
    OctetString(Vec<u8>),
    DateTime(DateTimeValue),
    Resolution { xres: i32, yres: i32, units: i8 },
    RangeOfInteger { lower: i32, upper: i32 },
    Collection(Vec<Member>),
    // Out-of-band
    NoValue,
    Unknown,
    Unsupported,
    NotSettable,
    DeleteAttribute,
    AdminDefine,
}

impl Value {
    /// The wire syntax tag for this value.
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Integer(_) => ValueTag::Integer,
            Value::Boolean(_) => ValueTag::Boolean,
            Value::Enum(_) => ValueTag::Enum,
            Value::Keyword(_) => ValueTag::Keyword,
            Value::Name(_) => ValueTag::NameWithoutLanguage,
            Value::NameWithLang { .. } => ValueTag::NameWithLanguage,
            Value::Text(_) => ValueTag::TextWithoutLanguage,
            Value::TextWithLang { .. } => ValueTag::TextWithLanguage,
            Value::Uri(_) => ValueTag::Uri,
            Value::UriScheme(_) => ValueTag::UriScheme,
            Value::MimeType(_) => ValueTag::MimeMediaType,
            Value::Charset(_) => ValueTag::Charset,
            Value::Language(_) => ValueTag::NaturalLanguage,
            Value::OctetString(_) => ValueTag::OctetString,
            Value::DateTime(_) => ValueTag::DateTime,
            Value::Resolution { .. } => ValueTag::Resolution,
            Value::RangeOfInteger { .. } => ValueTag::RangeOfInteger,
            Value::Collection(_) => ValueTag::BegCollection,
            Value::NoValue => ValueTag::NoValue,
            Value::Unknown => ValueTag::Unknown,
            Value::Unsupported => ValueTag::Unsupported,
            Value::NotSettable => ValueTag::NotSettable,
            Value::DeleteAttribute => ValueTag::DeleteAttribute,
            Value::AdminDefine => ValueTag::AdminDefine,
        }
    }

    pub fn is_out_of_band(&self) -> bool {
        self.tag().is_out_of_band()
    }

    /// Integer-valued kinds (`integer` and `enum`).
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer(i) | Value::Enum(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The character-string payload of any string-like kind.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Keyword(s)
            | Value::Name(s)
            | Value::Text(s)
            | Value::Uri(s)
            | Value::UriScheme(s)
            | Value::MimeType(s)
            | Value::Charset(s)
            | Value::Language(s) => Some(s),
            Value::NameWithLang { name, .. } => Some(name),
            Value::TextWithLang { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[Member]> {
        match self {
            Value::Collection(members) => Some(members),
            _ => None,
        }
    }

    /// Flatten to the attribute-string form used for the transform
    /// environment: scalar values render as `Display`, booleans as
    /// true/false, ranges as `lower-upper`, collections as
    /// `{name=value ...}`.
    pub fn to_env_string(&self) -> String {
        match self {
            Value::RangeOfInteger { lower, upper } => format!("{lower}-{upper}"),
            Value::Collection(members) => {
                let inner: Vec<String> = members
                    .iter()
                    .map(|m| {
                        let vals: Vec<String> =
                            m.values.iter().map(|v| v.to_env_string()).collect();
                        format!("{}={}", m.name, vals.join(","))
                    })
                    .collect();
                format!("{{{}}}", inner.join(" "))
            }
            other => format!("{other}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) | Value::Enum(i) => write!(f, "{i}"),
            Value::Boolean(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Keyword(s)
            | Value::Name(s)
            | Value::Text(s)
            | Value::Uri(s)
            | Value::UriScheme(s)
            | Value::MimeType(s)
            | Value::Charset(s)
            | Value::Language(s) => write!(f, "{s}"),
            Value::NameWithLang { lang, name } => write!(f, "{lang}:{name}"),
            Value::TextWithLang { lang, text } => write!(f, "{lang}:{text}"),
            Value::OctetString(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::DateTime(d) => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                d.year, d.month, d.day, d.hour, d.minutes, d.seconds
            ),
            Value::Resolution { xres, yres, units } => {
                write!(f, "{xres}x{yres}{}", if *units == 3 { "dpi" } else { "dpcm" })
            }
            Value::RangeOfInteger { lower, upper } => write!(f, "{lower}..{upper}"),
            Value::Collection(members) => {
                let s: Vec<String> = members
                    .iter()
                    .map(|m| {
                        let vals: Vec<String> =
                            m.values.iter().map(|v| v.to_string()).collect();
                        format!("{}={}", m.name, vals.join(","))
                    })
                    .collect();
                write!(f, "<{}>", s.join(", "))
            }
            Value::NoValue => write!(f, "no-value"),
            Value::Unknown => write!(f, "unknown"),
            Value::Unsupported => write!(f, "unsupported"),
            Value::NotSettable => write!(f, "not-settable"),
            Value::DeleteAttribute => write!(f, "delete-attribute"),
            Value::AdminDefine => write!(f, "admin-define"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_kinds() {
        assert_eq!(Value::Integer(1).tag(), ValueTag::Integer);
        assert_eq!(Value::Keyword("a".into()).tag(), ValueTag::Keyword);
        assert_eq!(Value::NoValue.tag(), ValueTag::NoValue);
        assert_eq!(Value::Collection(Vec::new()).tag(), ValueTag::BegCollection);
    }

    #[test]
    fn out_of_band_values_have_no_payload_accessors() {
        assert!(Value::Unknown.is_out_of_band());
        assert_eq!(Value::Unknown.as_str(), None);
        assert_eq!(Value::NoValue.as_i32(), None);
    }

    #[test]
    fn as_str_covers_language_variants() {
        let v = Value::NameWithLang {
            lang: "en".into(),
            name: "letterhead".into(),
        };
        assert_eq!(v.as_str(), Some("letterhead"));
    }

    #[test]
    fn env_string_forms() {
        assert_eq!(Value::Integer(42).to_env_string(), "42");
        assert_eq!(Value::Boolean(false).to_env_string(), "false");
        assert_eq!(
            Value::RangeOfInteger { lower: 1, upper: 5 }.to_env_string(),
            "1-5"
        );
        let coll = Value::Collection(vec![
            Member::new("x-dimension", Value::Integer(21000)),
            Member::new("y-dimension", Value::Integer(29700)),
        ]);
        assert_eq!(
            coll.to_env_string(),
            "{x-dimension=21000 y-dimension=29700}"
        );
    }

    #[test]
    fn datetime_from_utc() {
        let t = DateTime::parse_from_rfc3339("2026-03-01T12:30:45Z")
            .unwrap()
            .with_timezone(&Utc);
        let d = DateTimeValue::from_utc(t);
        assert_eq!(d.year, 2026);
        assert_eq!(d.month, 3);
        assert_eq!(d.hour, 12);
        assert_eq!(d.utc_dir, b'+');
    }
}
