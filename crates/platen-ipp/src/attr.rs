// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Attributes and attribute groups: the set operations every other
// component is built on (find, copy, filter, mutate, validate).
//
// Attribute name equality is byte-exact ASCII throughout.

use platen_core::error::{PlatenError, Result};

use crate::model::{DelimiterTag, ValueTag};
use crate::value::Value;

/// One attribute: a name and 1..N typed values.
///
/// A single value is the common case; more than one value is the wire's
/// `1setOf` form. An attribute never has zero values.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<Value>,
}

impl Attribute {
    pub fn new(name: &str, value: Value) -> Self {
        Self {
            name: name.to_string(),
            values: vec![value],
        }
    }

    pub fn with_values(name: &str, values: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }

    // Typed constructors keep handler code short.

    pub fn integer(name: &str, v: i32) -> Self {
        Self::new(name, Value::Integer(v))
    }

    pub fn boolean(name: &str, v: bool) -> Self {
        Self::new(name, Value::Boolean(v))
    }

    pub fn enum_value(name: &str, v: i32) -> Self {
        Self::new(name, Value::Enum(v))
    }

    pub fn keyword(name: &str, v: &str) -> Self {
        Self::new(name, Value::Keyword(v.to_string()))
    }

    pub fn keywords(name: &str, vs: &[&str]) -> Self {
        Self::with_values(
            name,
            vs.iter().map(|v| Value::Keyword(v.to_string())).collect(),
        )
    }

    pub fn name_value(name: &str, v: &str) -> Self {
        Self::new(name, Value::Name(v.to_string()))
    }

    pub fn text(name: &str, v: &str) -> Self {
        Self::new(name, Value::Text(v.to_string()))
    }

    pub fn uri(name: &str, v: &str) -> Self {
        Self::new(name, Value::Uri(v.to_string()))
    }

    pub fn charset(name: &str, v: &str) -> Self {
        Self::new(name, Value::Charset(v.to_string()))
    }

    pub fn language(name: &str, v: &str) -> Self {
        Self::new(name, Value::Language(v.to_string()))
    }

    pub fn mime_type(name: &str, v: &str) -> Self {
        Self::new(name, Value::MimeType(v.to_string()))
    }

    /// The syntax tag of the first value (the attribute's declared kind
    /// as far as the wire is concerned).
    pub fn tag(&self) -> ValueTag {
        self.values.first().map(|v| v.tag()).unwrap_or(ValueTag::Unknown)
    }

    /// First value, for single-valued access.
    pub fn value(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.value().and_then(|v| v.as_i32())
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value().and_then(|v| v.as_str())
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value().and_then(|v| v.as_bool())
    }

    /// All string payloads, for 1setOf keyword/name attributes.
    pub fn strings(&self) -> Vec<&str> {
        self.values.iter().filter_map(|v| v.as_str()).collect()
    }

    /// Replace the value at `index`, extending by one slot if `index`
    /// is the current length.
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<()> {
        if index < self.values.len() {
            self.values[index] = value;
            Ok(())
        } else if index == self.values.len() {
            self.values.push(value);
            Ok(())
        } else {
            Err(PlatenError::BadRequest(format!(
                "value index {index} out of range for '{}'",
                self.name
            )))
        }
    }

    /// Structural well-formedness: non-empty printable-ASCII name without
    /// spaces, at least one value, values of one kind (out-of-band values
    /// are single), language present in *WithLang variants.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(PlatenError::BadRequest(format!(
                "bad attribute name length {}",
                self.name.len()
            )));
        }
        if !self
            .name
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b'\'' && b != b'"')
        {
            return Err(PlatenError::BadRequest(format!(
                "bad attribute name '{}'",
                self.name
            )));
        }
        let Some(first) = self.values.first() else {
            return Err(PlatenError::BadRequest(format!(
                "attribute '{}' has no values",
                self.name
            )));
        };
        if first.is_out_of_band() && self.values.len() > 1 {
            return Err(PlatenError::BadRequest(format!(
                "out-of-band attribute '{}' has multiple values",
                self.name
            )));
        }
        for value in &self.values {
            if value.tag() != first.tag() {
                return Err(PlatenError::BadRequest(format!(
                    "mixed value syntaxes in '{}'",
                    self.name
                )));
            }
            match value {
                Value::NameWithLang { lang, .. } | Value::TextWithLang { lang, .. } => {
                    if lang.is_empty() {
                        return Err(PlatenError::BadRequest(format!(
                            "empty language tag in '{}'",
                            self.name
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A delimiter-tagged run of attributes.
///
/// A message may carry several groups with the same tag (one per job in a
/// Get-Jobs response, one per event in a notification); order is the wire
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeGroup {
    pub tag: DelimiterTag,
    pub attrs: Vec<Attribute>,
}

impl AttributeGroup {
    pub fn new(tag: DelimiterTag) -> Self {
        Self {
            tag,
            attrs: Vec::new(),
        }
    }

    /// First attribute with the given name.
    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attrs.iter_mut().find(|a| a.name == name)
    }

    /// First attribute with the given name whose first value carries the
    /// requested syntax tag.
    pub fn find_with_tag(&self, name: &str, tag: ValueTag) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name == name && a.tag() == tag)
    }

    /// Append, without replacing an existing attribute of the same name.
    pub fn add(&mut self, attr: Attribute) {
        self.attrs.push(attr);
    }

    /// Replace in place if present (keeping position), else append.
    pub fn replace(&mut self, attr: Attribute) {
        match self.find_mut(&attr.name) {
            Some(existing) => *existing = attr,
            None => self.attrs.push(attr),
        }
    }

    /// Remove every attribute with the given name; true if any removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|a| a.name != name);
        self.attrs.len() != before
    }

    /// Deep-copy the attributes selected by `filter` into a new group
    /// with the given tag. Used for requested-attributes responses and
    /// privacy filtering.
    pub fn copy_filtered<F>(&self, tag: DelimiterTag, filter: F) -> AttributeGroup
    where
        F: Fn(&Attribute) -> bool,
    {
        AttributeGroup {
            tag,
            attrs: self.attrs.iter().filter(|a| filter(a)).cloned().collect(),
        }
    }

    /// Structural validation over the whole group.
    pub fn validate(&self) -> Result<()> {
        for attr in &self.attrs {
            attr.validate()?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }
}

/// True when `requested` (the values of a `requested-attributes` operation
/// attribute) selects `name`. `all` selects everything; group keywords
/// select their conventional subsets by prefix match on the stored list.
pub fn requested_selects(requested: Option<&[&str]>, name: &str) -> bool {
    match requested {
        None => true,
        Some(keys) => keys.iter().any(|k| {
            *k == "all"
                || *k == name
                || (*k == "job-template" && name.ends_with("-default"))
                || (*k == "printer-description" && name.starts_with("printer-"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_with(attrs: Vec<Attribute>) -> AttributeGroup {
        AttributeGroup {
            tag: DelimiterTag::OperationAttributes,
            attrs,
        }
    }

    #[test]
    fn find_is_byte_exact() {
        let g = group_with(vec![Attribute::keyword("document-format", "application/pdf")]);
        assert!(g.find("document-format").is_some());
        assert!(g.find("Document-Format").is_none());
        assert!(g.find("document-format ").is_none());
    }

    #[test]
    fn find_with_tag_filters_syntax() {
        let g = group_with(vec![
            Attribute::keyword("media", "iso_a4_210x297mm"),
            Attribute::new("media", Value::Collection(Vec::new())),
        ]);
        assert_eq!(
            g.find_with_tag("media", ValueTag::BegCollection)
                .map(|a| a.tag()),
            Some(ValueTag::BegCollection)
        );
        assert_eq!(
            g.find_with_tag("media", ValueTag::Keyword).map(|a| a.tag()),
            Some(ValueTag::Keyword)
        );
        assert!(g.find_with_tag("media", ValueTag::Integer).is_none());
    }

    #[test]
    fn replace_keeps_position() {
        let mut g = group_with(vec![
            Attribute::integer("copies", 1),
            Attribute::keyword("sides", "one-sided"),
        ]);
        g.replace(Attribute::integer("copies", 3));
        assert_eq!(g.attrs[0].as_i32(), Some(3));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn copy_filtered_retargets_group() {
        let g = group_with(vec![
            Attribute::integer("copies", 0),
            Attribute::keyword("sides", "one-sided"),
        ]);
        let out = g.copy_filtered(DelimiterTag::UnsupportedAttributes, |a| a.name == "copies");
        assert_eq!(out.tag, DelimiterTag::UnsupportedAttributes);
        assert_eq!(out.len(), 1);
        assert_eq!(out.attrs[0].as_i32(), Some(0));
    }

    #[test]
    fn out_of_band_participates_in_find_and_copy() {
        let g = group_with(vec![Attribute::new("job-hold-until", Value::NoValue)]);
        assert!(g.find("job-hold-until").is_some());
        let out = g.copy_filtered(DelimiterTag::JobAttributes, |_| true);
        assert_eq!(out.attrs[0].value(), Some(&Value::NoValue));
    }

    #[test]
    fn validate_rejects_mixed_syntaxes() {
        let attr = Attribute::with_values(
            "copies",
            vec![Value::Integer(1), Value::Keyword("two".into())],
        );
        assert!(attr.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_language() {
        let attr = Attribute::new(
            "job-name",
            Value::NameWithLang {
                lang: String::new(),
                name: "x".into(),
            },
        );
        assert!(attr.validate().is_err());
    }

    #[test]
    fn validate_accepts_1setof() {
        let attr = Attribute::keywords("notify-events", &["job-created", "job-completed"]);
        assert!(attr.validate().is_ok());
    }

    #[test]
    fn requested_attributes_selection() {
        assert!(requested_selects(None, "printer-name"));
        assert!(requested_selects(Some(&["all"]), "anything"));
        assert!(requested_selects(Some(&["printer-name"]), "printer-name"));
        assert!(!requested_selects(Some(&["printer-name"]), "printer-state"));
    }
}
