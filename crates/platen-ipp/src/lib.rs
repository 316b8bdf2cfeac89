// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platen — IPP attribute kernel and binary message codec (RFC 8010/8011).
//
// The kernel models attributes as tagged records (value tag + name +
// 1..N typed values) collected into delimiter-tagged groups; the codec
// maps messages to and from the RFC 8010 binary encoding. Everything
// above this crate (validator, dispatcher, handlers) works on these
// types and never touches wire bytes.

pub mod attr;
pub mod message;
pub mod model;
pub mod value;
pub mod wire;

pub use attr::{Attribute, AttributeGroup};
pub use message::Message;
pub use model::{DelimiterTag, Operation, StatusCode, ValueTag};
pub use value::{DateTimeValue, Member, Value};
