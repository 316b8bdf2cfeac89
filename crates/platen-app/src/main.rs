// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platen — reference IPP server.
//
// Entry point. Initialises logging, loads the configuration, brings up
// the configured printers with their scheduler tasks, and serves IPP
// until interrupted.

use std::sync::Arc;

use platen_core::config::ServerConfig;
use platen_core::sync::LockExt;
use platen_server::printer::Printer;
use platen_server::uri::printer_path_for;
use platen_server::{IppServer, System, engine, events};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("platend starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "platen.json".into());
    let config = load_config(&config_path);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start the async runtime");
            return;
        }
    };
    runtime.block_on(run(config));
}

/// Read the configuration file, falling back to defaults when absent.
fn load_config(path: &str) -> ServerConfig {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(config) => {
                tracing::info!(path, "configuration loaded");
                config
            }
            Err(e) => {
                tracing::error!(path, error = %e, "bad configuration file, using defaults");
                ServerConfig::default()
            }
        },
        Err(_) => {
            tracing::info!(path, "no configuration file, using defaults");
            ServerConfig::default()
        }
    }
}

async fn run(config: ServerConfig) {
    if let Err(e) = std::fs::create_dir_all(&config.spool_dir) {
        tracing::error!(
            dir = %config.spool_dir.display(),
            error = %e,
            "cannot create spool directory"
        );
        return;
    }

    let port = config.bind_port;
    let entries = config.printers.clone();
    let system = System::new(config);

    for entry in &entries {
        let path = printer_path_for(&entry.service, &entry.name);
        let printer = Printer::create(
            system.next_printer_id(),
            &entry.name,
            &path,
            &system.config,
        );
        if let Some(device_uri) = &entry.device_uri {
            printer.inner.write_lock().device_uri = device_uri.clone();
        }
        system.add_printer(Arc::clone(&printer));
        tokio::spawn(engine::printer_loop(Arc::clone(&system), Arc::clone(&printer)));
        tracing::info!(name = %entry.name, path = %path, "printer configured");
    }

    tokio::spawn(events::lease_sweeper(Arc::clone(&system)));

    let mut server = IppServer::new(port);
    if let Err(e) = server.start(Arc::clone(&system)).await {
        tracing::error!(error = %e, "server failed to start");
        return;
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("interrupt received, shutting down"),
        Err(e) => tracing::error!(error = %e, "signal handler failed"),
    }
    if let Err(e) = server.stop().await {
        tracing::error!(error = %e, "shutdown error");
    }
}
