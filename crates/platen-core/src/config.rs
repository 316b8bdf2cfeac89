// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server configuration.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::OutputMode;

/// One printer to bring up at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterEntry {
    pub name: String,
    /// Service keyword: print, print3d, or faxout.
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default)]
    pub device_uri: Option<String>,
}

fn default_service() -> String {
    "print".into()
}

/// Persistent server settings.
///
/// Loaded from a JSON file by the `platend` binary; every field has a
/// default so a missing file yields a usable single-printer test server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port for the IPP listener (default 631).
    pub bind_port: u16,
    /// Hostname advertised in printer-uri / job-uri values.
    pub hostname: String,
    /// Directory for job spool files and resource payloads.
    pub spool_dir: PathBuf,
    /// External transform (RIP) command; `None` disables processing.
    pub transform_command: Option<PathBuf>,
    /// Where transform stdout goes when a proxy is not streaming it.
    pub output_mode: OutputMode,
    /// Upper bound on non-terminal jobs per printer.
    pub max_jobs_per_printer: usize,
    /// Upper bound on resources allocated to one printer.
    pub max_resources_per_printer: usize,
    /// Events retained per subscription before the oldest are evicted.
    pub event_queue_depth: usize,
    /// Per-iteration bound for the Get-Notifications blocking wait (seconds).
    pub notify_wait_secs: u64,
    /// Longest lease a subscription may hold or renew to (seconds).
    pub max_lease_secs: u32,
    /// Accept the target URI anywhere in the operation group instead of
    /// requiring it third.
    pub relaxed_target_uri: bool,
    /// Group required to submit jobs; `None` leaves submission public.
    pub print_group: Option<String>,
    /// Group required for output-device (proxy) operations.
    pub proxy_group: Option<String>,
    /// Group required for administrative operations.
    pub admin_group: Option<String>,
    /// Static username → group memberships table. Stands in for the
    /// platform's account database behind the same lookup interface.
    pub users: HashMap<String, Vec<String>>,
    /// Directory prefixes a `file:` document URI may resolve under.
    pub file_fetch_roots: Vec<PathBuf>,
    /// Log level handed to the transform via SERVER_LOGLEVEL.
    pub log_level: String,
    /// Printers created at startup.
    pub printers: Vec<PrinterEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 631,
            hostname: "localhost".into(),
            spool_dir: PathBuf::from("/var/spool/platen"),
            transform_command: None,
            output_mode: OutputMode::Discard,
            max_jobs_per_printer: 100,
            max_resources_per_printer: 8,
            event_queue_depth: 100,
            notify_wait_secs: 30,
            max_lease_secs: 86400,
            relaxed_target_uri: false,
            print_group: None,
            proxy_group: None,
            admin_group: None,
            users: HashMap::new(),
            file_fetch_roots: Vec::new(),
            log_level: "info".into(),
            printers: vec![PrinterEntry {
                name: "print".into(),
                service: "print".into(),
                device_uri: None,
            }],
        }
    }
}

impl ServerConfig {
    /// True when `user` belongs to `group` per the static table.
    pub fn user_in_group(&self, user: &str, group: &str) -> bool {
        self.users
            .get(user)
            .map(|groups| groups.iter().any(|g| g == group))
            .unwrap_or(false)
    }
}
