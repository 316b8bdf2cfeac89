// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Platen IPP server: object states, state-reason
// bitsets, and event masks, each with its IPP keyword mapping.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Object states
// ---------------------------------------------------------------------------

/// Lifecycle states of a job (RFC 8011 §5.3.7 `job-state` enum values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Queued, eligible for scheduling.
    Pending,
    /// Held back (job-hold-until or printer hold-new-jobs).
    Held,
    /// The transform is running for this job.
    Processing,
    /// Processing interrupted; resumes or goes terminal.
    Stopped,
    /// Canceled by a client or administrator.
    Canceled,
    /// Terminated by the server after an error.
    Aborted,
    /// Finished successfully.
    Completed,
}

impl JobState {
    /// Wire value for the `job-state` enum attribute.
    pub fn ipp_enum(self) -> i32 {
        match self {
            Self::Pending => 3,
            Self::Held => 4,
            Self::Processing => 5,
            Self::Stopped => 6,
            Self::Canceled => 7,
            Self::Aborted => 8,
            Self::Completed => 9,
        }
    }

    /// Terminal states permit no further observable mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted | Self::Completed)
    }

    pub fn from_ipp_enum(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Pending),
            4 => Some(Self::Held),
            5 => Some(Self::Processing),
            6 => Some(Self::Stopped),
            7 => Some(Self::Canceled),
            8 => Some(Self::Aborted),
            9 => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Printer states (RFC 8011 §5.4.11 `printer-state` enum values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrinterState {
    Idle,
    Processing,
    Stopped,
}

impl PrinterState {
    pub fn ipp_enum(self) -> i32 {
        match self {
            Self::Idle => 3,
            Self::Processing => 4,
            Self::Stopped => 5,
        }
    }
}

/// Resource states (PWG 5100.22 `resource-state` enum values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    Pending,
    Available,
    Installed,
    Canceled,
    Aborted,
}

impl ResourceState {
    pub fn ipp_enum(self) -> i32 {
        match self {
            Self::Pending => 3,
            Self::Available => 4,
            Self::Installed => 5,
            Self::Canceled => 6,
            Self::Aborted => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted)
    }
}

/// System service states mirror printer states (PWG 5100.22 `system-state`).
pub type SystemState = PrinterState;

// ---------------------------------------------------------------------------
// Job state reasons
// ---------------------------------------------------------------------------

/// Bitset of `job-state-reasons` keywords.
///
/// Reasons are manipulated additively and subtractively (never replaced
/// wholesale, unlike printer reasons); the keyword table below is the
/// public vocabulary.
pub type JobReasons = u64;

pub const JREASON_NONE: JobReasons = 0;
pub const JREASON_ABORTED_BY_SYSTEM: JobReasons = 1 << 0;
pub const JREASON_COMPRESSION_ERROR: JobReasons = 1 << 1;
pub const JREASON_DOCUMENT_ACCESS_ERROR: JobReasons = 1 << 2;
pub const JREASON_DOCUMENT_FORMAT_ERROR: JobReasons = 1 << 3;
pub const JREASON_DOCUMENT_PASSWORD_ERROR: JobReasons = 1 << 4;
pub const JREASON_DOCUMENT_PERMISSION_ERROR: JobReasons = 1 << 5;
pub const JREASON_DOCUMENT_UNPRINTABLE_ERROR: JobReasons = 1 << 6;
pub const JREASON_ERRORS_DETECTED: JobReasons = 1 << 7;
pub const JREASON_JOB_CANCELED_AT_DEVICE: JobReasons = 1 << 8;
pub const JREASON_JOB_CANCELED_BY_USER: JobReasons = 1 << 9;
pub const JREASON_JOB_COMPLETED_SUCCESSFULLY: JobReasons = 1 << 10;
pub const JREASON_JOB_COMPLETED_WITH_ERRORS: JobReasons = 1 << 11;
pub const JREASON_JOB_COMPLETED_WITH_WARNINGS: JobReasons = 1 << 12;
pub const JREASON_JOB_DATA_INSUFFICIENT: JobReasons = 1 << 13;
pub const JREASON_JOB_FETCHABLE: JobReasons = 1 << 14;
pub const JREASON_JOB_HOLD_UNTIL_SPECIFIED: JobReasons = 1 << 15;
pub const JREASON_JOB_INCOMING: JobReasons = 1 << 16;
pub const JREASON_JOB_PRINTING: JobReasons = 1 << 17;
pub const JREASON_JOB_QUEUED: JobReasons = 1 << 18;
pub const JREASON_JOB_SPOOLING: JobReasons = 1 << 19;
pub const JREASON_JOB_STOPPED: JobReasons = 1 << 20;
pub const JREASON_JOB_TRANSFORMING: JobReasons = 1 << 21;
pub const JREASON_PRINTER_STOPPED: JobReasons = 1 << 22;
pub const JREASON_PROCESSING_TO_STOP_POINT: JobReasons = 1 << 23;
pub const JREASON_QUEUED_IN_DEVICE: JobReasons = 1 << 24;
pub const JREASON_WARNINGS_DETECTED: JobReasons = 1 << 25;

/// Keyword ↔ bit table for job-state-reasons, in keyword order.
pub const JOB_REASON_KEYWORDS: &[(JobReasons, &str)] = &[
    (JREASON_ABORTED_BY_SYSTEM, "aborted-by-system"),
    (JREASON_COMPRESSION_ERROR, "compression-error"),
    (JREASON_DOCUMENT_ACCESS_ERROR, "document-access-error"),
    (JREASON_DOCUMENT_FORMAT_ERROR, "document-format-error"),
    (JREASON_DOCUMENT_PASSWORD_ERROR, "document-password-error"),
    (JREASON_DOCUMENT_PERMISSION_ERROR, "document-permission-error"),
    (JREASON_DOCUMENT_UNPRINTABLE_ERROR, "document-unprintable-error"),
    (JREASON_ERRORS_DETECTED, "errors-detected"),
    (JREASON_JOB_CANCELED_AT_DEVICE, "job-canceled-at-device"),
    (JREASON_JOB_CANCELED_BY_USER, "job-canceled-by-user"),
    (JREASON_JOB_COMPLETED_SUCCESSFULLY, "job-completed-successfully"),
    (JREASON_JOB_COMPLETED_WITH_ERRORS, "job-completed-with-errors"),
    (JREASON_JOB_COMPLETED_WITH_WARNINGS, "job-completed-with-warnings"),
    (JREASON_JOB_DATA_INSUFFICIENT, "job-data-insufficient"),
    (JREASON_JOB_FETCHABLE, "job-fetchable"),
    (JREASON_JOB_HOLD_UNTIL_SPECIFIED, "job-hold-until-specified"),
    (JREASON_JOB_INCOMING, "job-incoming"),
    (JREASON_JOB_PRINTING, "job-printing"),
    (JREASON_JOB_QUEUED, "job-queued"),
    (JREASON_JOB_SPOOLING, "job-spooling"),
    (JREASON_JOB_STOPPED, "job-stopped"),
    (JREASON_JOB_TRANSFORMING, "job-transforming"),
    (JREASON_PRINTER_STOPPED, "printer-stopped"),
    (JREASON_PROCESSING_TO_STOP_POINT, "processing-to-stop-point"),
    (JREASON_QUEUED_IN_DEVICE, "queued-in-device"),
    (JREASON_WARNINGS_DETECTED, "warnings-detected"),
];

/// Look up a job reason bit by its keyword.
pub fn job_reason_bit(keyword: &str) -> Option<JobReasons> {
    JOB_REASON_KEYWORDS
        .iter()
        .find(|(_, kw)| *kw == keyword)
        .map(|(bit, _)| *bit)
}

/// Expand a job reason bitset into keywords; empty sets yield `["none"]`.
pub fn job_reason_keywords(reasons: JobReasons) -> Vec<&'static str> {
    let found: Vec<&'static str> = JOB_REASON_KEYWORDS
        .iter()
        .filter(|(bit, _)| reasons & bit != 0)
        .map(|(_, kw)| *kw)
        .collect();
    if found.is_empty() { vec!["none"] } else { found }
}

// ---------------------------------------------------------------------------
// Printer state reasons
// ---------------------------------------------------------------------------

/// Bitset of `printer-state-reasons` keywords.
pub type PrinterReasons = u64;

pub const PREASON_NONE: PrinterReasons = 0;
pub const PREASON_OTHER: PrinterReasons = 1 << 0;
pub const PREASON_COVER_OPEN: PrinterReasons = 1 << 1;
pub const PREASON_DELETING: PrinterReasons = 1 << 2;
pub const PREASON_DOOR_OPEN: PrinterReasons = 1 << 3;
pub const PREASON_HOLD_NEW_JOBS: PrinterReasons = 1 << 4;
pub const PREASON_IDENTIFY_PRINTER_REQUESTED: PrinterReasons = 1 << 5;
pub const PREASON_INPUT_TRAY_MISSING: PrinterReasons = 1 << 6;
pub const PREASON_MARKER_SUPPLY_EMPTY: PrinterReasons = 1 << 7;
pub const PREASON_MARKER_SUPPLY_LOW: PrinterReasons = 1 << 8;
pub const PREASON_MARKER_WASTE_ALMOST_FULL: PrinterReasons = 1 << 9;
pub const PREASON_MARKER_WASTE_FULL: PrinterReasons = 1 << 10;
pub const PREASON_MEDIA_EMPTY: PrinterReasons = 1 << 11;
pub const PREASON_MEDIA_JAM: PrinterReasons = 1 << 12;
pub const PREASON_MEDIA_LOW: PrinterReasons = 1 << 13;
pub const PREASON_MEDIA_NEEDED: PrinterReasons = 1 << 14;
pub const PREASON_MOVING_TO_PAUSED: PrinterReasons = 1 << 15;
pub const PREASON_PAUSED: PrinterReasons = 1 << 16;
pub const PREASON_SPOOL_AREA_FULL: PrinterReasons = 1 << 17;
pub const PREASON_TONER_EMPTY: PrinterReasons = 1 << 18;
pub const PREASON_TONER_LOW: PrinterReasons = 1 << 19;

/// Keyword ↔ bit table for printer-state-reasons.
pub const PRINTER_REASON_KEYWORDS: &[(PrinterReasons, &str)] = &[
    (PREASON_OTHER, "other"),
    (PREASON_COVER_OPEN, "cover-open"),
    (PREASON_DELETING, "deleting"),
    (PREASON_DOOR_OPEN, "door-open"),
    (PREASON_HOLD_NEW_JOBS, "hold-new-jobs"),
    (PREASON_IDENTIFY_PRINTER_REQUESTED, "identify-printer-requested"),
    (PREASON_INPUT_TRAY_MISSING, "input-tray-missing"),
    (PREASON_MARKER_SUPPLY_EMPTY, "marker-supply-empty"),
    (PREASON_MARKER_SUPPLY_LOW, "marker-supply-low"),
    (PREASON_MARKER_WASTE_ALMOST_FULL, "marker-waste-almost-full"),
    (PREASON_MARKER_WASTE_FULL, "marker-waste-full"),
    (PREASON_MEDIA_EMPTY, "media-empty"),
    (PREASON_MEDIA_JAM, "media-jam"),
    (PREASON_MEDIA_LOW, "media-low"),
    (PREASON_MEDIA_NEEDED, "media-needed"),
    (PREASON_MOVING_TO_PAUSED, "moving-to-paused"),
    (PREASON_PAUSED, "paused"),
    (PREASON_SPOOL_AREA_FULL, "spool-area-full"),
    (PREASON_TONER_EMPTY, "toner-empty"),
    (PREASON_TONER_LOW, "toner-low"),
];

/// Look up a printer reason bit by keyword.
pub fn printer_reason_bit(keyword: &str) -> Option<PrinterReasons> {
    PRINTER_REASON_KEYWORDS
        .iter()
        .find(|(_, kw)| *kw == keyword)
        .map(|(bit, _)| *bit)
}

/// Expand a printer reason bitset into keywords; empty sets yield `["none"]`.
pub fn printer_reason_keywords(reasons: PrinterReasons) -> Vec<&'static str> {
    let found: Vec<&'static str> = PRINTER_REASON_KEYWORDS
        .iter()
        .filter(|(bit, _)| reasons & bit != 0)
        .map(|(_, kw)| *kw)
        .collect();
    if found.is_empty() { vec!["none"] } else { found }
}

// ---------------------------------------------------------------------------
// Notification events
// ---------------------------------------------------------------------------

/// Bitset of `notify-events` keywords a subscription listens for.
pub type EventMask = u64;

pub const EVENT_DOCUMENT_COMPLETED: EventMask = 1 << 0;
pub const EVENT_DOCUMENT_CONFIG_CHANGED: EventMask = 1 << 1;
pub const EVENT_DOCUMENT_CREATED: EventMask = 1 << 2;
pub const EVENT_DOCUMENT_STATE_CHANGED: EventMask = 1 << 3;
pub const EVENT_JOB_COMPLETED: EventMask = 1 << 4;
pub const EVENT_JOB_CONFIG_CHANGED: EventMask = 1 << 5;
pub const EVENT_JOB_CREATED: EventMask = 1 << 6;
pub const EVENT_JOB_FETCHABLE: EventMask = 1 << 7;
pub const EVENT_JOB_PROGRESS: EventMask = 1 << 8;
pub const EVENT_JOB_STATE_CHANGED: EventMask = 1 << 9;
pub const EVENT_PRINTER_CONFIG_CHANGED: EventMask = 1 << 10;
pub const EVENT_PRINTER_CREATED: EventMask = 1 << 11;
pub const EVENT_PRINTER_DELETED: EventMask = 1 << 12;
pub const EVENT_PRINTER_RESTARTED: EventMask = 1 << 13;
pub const EVENT_PRINTER_SHUTDOWN: EventMask = 1 << 14;
pub const EVENT_PRINTER_STATE_CHANGED: EventMask = 1 << 15;
pub const EVENT_PRINTER_STOPPED: EventMask = 1 << 16;
pub const EVENT_RESOURCE_CANCELED: EventMask = 1 << 17;
pub const EVENT_RESOURCE_CONFIG_CHANGED: EventMask = 1 << 18;
pub const EVENT_RESOURCE_CREATED: EventMask = 1 << 19;
pub const EVENT_RESOURCE_INSTALLED: EventMask = 1 << 20;
pub const EVENT_SYSTEM_CONFIG_CHANGED: EventMask = 1 << 21;
pub const EVENT_SYSTEM_STATE_CHANGED: EventMask = 1 << 22;
pub const EVENT_SYSTEM_STOPPED: EventMask = 1 << 23;

/// Every event bit; the `all` keyword expands to this.
pub const EVENT_ALL: EventMask = (1 << 24) - 1;

/// Keyword ↔ bit table for notify-events.
pub const EVENT_KEYWORDS: &[(EventMask, &str)] = &[
    (EVENT_DOCUMENT_COMPLETED, "document-completed"),
    (EVENT_DOCUMENT_CONFIG_CHANGED, "document-config-changed"),
    (EVENT_DOCUMENT_CREATED, "document-created"),
    (EVENT_DOCUMENT_STATE_CHANGED, "document-state-changed"),
    (EVENT_JOB_COMPLETED, "job-completed"),
    (EVENT_JOB_CONFIG_CHANGED, "job-config-changed"),
    (EVENT_JOB_CREATED, "job-created"),
    (EVENT_JOB_FETCHABLE, "job-fetchable"),
    (EVENT_JOB_PROGRESS, "job-progress"),
    (EVENT_JOB_STATE_CHANGED, "job-state-changed"),
    (EVENT_PRINTER_CONFIG_CHANGED, "printer-config-changed"),
    (EVENT_PRINTER_CREATED, "printer-created"),
    (EVENT_PRINTER_DELETED, "printer-deleted"),
    (EVENT_PRINTER_RESTARTED, "printer-restarted"),
    (EVENT_PRINTER_SHUTDOWN, "printer-shutdown"),
    (EVENT_PRINTER_STATE_CHANGED, "printer-state-changed"),
    (EVENT_PRINTER_STOPPED, "printer-stopped"),
    (EVENT_RESOURCE_CANCELED, "resource-canceled"),
    (EVENT_RESOURCE_CONFIG_CHANGED, "resource-config-changed"),
    (EVENT_RESOURCE_CREATED, "resource-created"),
    (EVENT_RESOURCE_INSTALLED, "resource-installed"),
    (EVENT_SYSTEM_CONFIG_CHANGED, "system-config-changed"),
    (EVENT_SYSTEM_STATE_CHANGED, "system-state-changed"),
    (EVENT_SYSTEM_STOPPED, "system-stopped"),
];

/// Look up an event bit by keyword; `all` yields the full mask.
pub fn event_bit(keyword: &str) -> Option<EventMask> {
    if keyword == "all" {
        return Some(EVENT_ALL);
    }
    EVENT_KEYWORDS
        .iter()
        .find(|(_, kw)| *kw == keyword)
        .map(|(bit, _)| *bit)
}

/// Expand an event bitset into keywords.
pub fn event_keywords(mask: EventMask) -> Vec<&'static str> {
    EVENT_KEYWORDS
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, kw)| *kw)
        .collect()
}

// ---------------------------------------------------------------------------
// Server lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle states of the serving loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
}

// ---------------------------------------------------------------------------
// Transform output routing
// ---------------------------------------------------------------------------

/// Where the transform's stdout is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Stream into the HTTP response (proxy Fetch-Document).
    Client,
    /// Write a new spool file next to the input document.
    File,
    /// Route to the null device.
    Discard,
}

// ---------------------------------------------------------------------------
// Spool file naming
// ---------------------------------------------------------------------------

/// File extension used for a spool or resource file of the given MIME type.
pub fn spool_extension(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "application/postscript" => "ps",
        "application/ipp" => "ipp",
        "application/vnd.iccprofile" => "icc",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/pwg-raster" => "pwg",
        "image/urf" => "urf",
        "text/plain" => "txt",
        "text/strings" => "strings",
        _ => "dat",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_enum_values_match_rfc8011() {
        assert_eq!(JobState::Pending.ipp_enum(), 3);
        assert_eq!(JobState::Held.ipp_enum(), 4);
        assert_eq!(JobState::Processing.ipp_enum(), 5);
        assert_eq!(JobState::Stopped.ipp_enum(), 6);
        assert_eq!(JobState::Canceled.ipp_enum(), 7);
        assert_eq!(JobState::Aborted.ipp_enum(), 8);
        assert_eq!(JobState::Completed.ipp_enum(), 9);
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Canceled.is_terminal());
        assert!(JobState::Aborted.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Stopped.is_terminal());
    }

    #[test]
    fn job_reason_keyword_roundtrip() {
        for (bit, kw) in JOB_REASON_KEYWORDS {
            assert_eq!(job_reason_bit(kw), Some(*bit));
            assert_eq!(job_reason_keywords(*bit), vec![*kw]);
        }
    }

    #[test]
    fn empty_reason_sets_render_none() {
        assert_eq!(job_reason_keywords(JREASON_NONE), vec!["none"]);
        assert_eq!(printer_reason_keywords(PREASON_NONE), vec!["none"]);
    }

    #[test]
    fn printer_reason_keyword_roundtrip() {
        for (bit, kw) in PRINTER_REASON_KEYWORDS {
            assert_eq!(printer_reason_bit(kw), Some(*bit));
        }
    }

    #[test]
    fn event_all_covers_every_keyword() {
        assert_eq!(event_bit("all"), Some(EVENT_ALL));
        assert_eq!(event_keywords(EVENT_ALL).len(), EVENT_KEYWORDS.len());
    }

    #[test]
    fn spool_extension_known_formats() {
        assert_eq!(spool_extension("application/pdf"), "pdf");
        assert_eq!(spool_extension("application/postscript"), "ps");
        assert_eq!(spool_extension("image/pwg-raster"), "pwg");
        assert_eq!(spool_extension("application/octet-stream"), "dat");
    }
}
