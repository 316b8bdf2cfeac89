// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Platen.

use thiserror::Error;

/// Top-level error type for all Platen operations.
///
/// The protocol-facing variants map onto IPP status codes in the server
/// crate; the HTTP-facing variants (`Unauthorized`, `Forbidden`) are
/// surfaced as bare HTTP statuses with no IPP body.
#[derive(Debug, Error)]
pub enum PlatenError {
    // -- Request errors --
    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("IPP version not supported: {0}")]
    VersionNotSupported(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported attributes or values: {0}")]
    Unsupported(String),

    #[error("operation not supported: 0x{0:04x}")]
    OperationNotSupported(u16),

    #[error("not possible: {0}")]
    NotPossible(String),

    #[error("attributes not settable: {0}")]
    NotSettable(String),

    // -- Authorization --
    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    // -- Job intake --
    #[error("too many jobs")]
    TooManyJobs,

    #[error("printer is not accepting jobs")]
    NotAcceptingJobs,

    #[error("document access failed: {0}")]
    DocumentAccess(String),

    // -- Processing --
    #[error("transform failed: {0}")]
    Transform(String),

    #[error("locking invariant violated: {0}")]
    InvariantViolated(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    // -- Ambient --
    #[error("internal error: {0}")]
    Internal(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PlatenError>;
