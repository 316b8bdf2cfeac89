// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platen — IPP server core: object store, request dispatch, operation
// handlers, job engine, event subsystem, and the TCP serving loop.

pub mod auth;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod job;
pub mod ops;
pub mod printer;
pub mod resource;
pub mod serve;
pub mod store;
pub mod uri;
pub mod validate;

pub use dispatch::dispatch;
pub use serve::IppServer;
pub use store::System;
