// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platen — Core types, error and configuration definitions shared across all crates.

pub mod config;
pub mod error;
pub mod sync;
pub mod types;

pub use config::ServerConfig;
pub use error::PlatenError;
pub use sync::LockExt;
pub use types::*;
