// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Target URI resolution and document fetch for Print-URI / Send-URI.
//
// Printer targets live under /ipp/print, /ipp/print3d, and /ipp/faxout;
// the system target is /ipp/system; a job target appends /<job-id> to
// its printer's path.
//
// Document fetch follows only file:, http:, and https: URIs. file: paths
// must resolve under a configured allow-list root and may not contain
// dot or dot-dot segments; http(s) fetches ride reqwest with a bounded
// redirect chain and a 30-second connect timeout.

use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use platen_core::config::ServerConfig;
use platen_core::error::{PlatenError, Result};

use crate::printer::Printer;
use crate::store::System;

/// Printer service path prefixes.
pub const SERVICE_PREFIXES: &[&str] = &["/ipp/print/", "/ipp/print3d/", "/ipp/faxout/"];

/// The system service path.
pub const SYSTEM_PATH: &str = "/ipp/system";

/// Redirect hop bound for http(s) document fetch.
const MAX_REDIRECTS: usize = 10;

/// Connect timeout for document fetch.
const FETCH_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// What a target URI resolved to.
pub enum Target {
    System,
    Printer(Arc<Printer>),
    /// A job URI: the owning printer and the trailing job id.
    Job(Arc<Printer>, i32),
}

/// Extract the resource path from an ipp/ipps/http/https URI string.
pub fn resource_path(uri: &str) -> Option<String> {
    let rest = uri.split_once("://").map(|(_, rest)| rest)?;
    let path = match rest.find('/') {
        Some(index) => &rest[index..],
        None => "/",
    };
    // Strip any query component.
    let path = path.split('?').next().unwrap_or(path);
    Some(path.to_string())
}

/// Resolve a resource path to its target object.
pub fn resolve_target(system: &System, path: &str) -> Option<Target> {
    let path = path.trim_end_matches('/');
    if path == SYSTEM_PATH {
        return Some(Target::System);
    }
    if let Some(printer) = system.printer_by_path(path) {
        return Some(Target::Printer(printer));
    }
    // A job URI: strip the trailing numeric segment and retry the
    // printer lookup (faxout paths strip the same way; their service
    // prefix is the fixed /ipp/faxout/ root).
    if let Some((printer_path, id)) = path.rsplit_once('/') {
        if let Ok(job_id) = id.parse::<i32>() {
            if SERVICE_PREFIXES
                .iter()
                .any(|prefix| path.starts_with(prefix))
            {
                if let Some(printer) = system.printer_by_path(printer_path) {
                    return Some(Target::Job(printer, job_id));
                }
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Document fetch
// ---------------------------------------------------------------------------

/// Fetch `uri` into `dest`. Returns the Content-Type reported by the
/// server, when there was one.
pub async fn fetch_document(
    config: &ServerConfig,
    uri: &str,
    dest: &Path,
) -> Result<Option<String>> {
    if let Some(path) = uri.strip_prefix("file://") {
        fetch_file(config, path, dest).await?;
        return Ok(None);
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return fetch_http(uri, dest).await;
    }
    Err(PlatenError::Unsupported(format!(
        "unsupported document URI scheme in '{uri}'"
    )))
}

/// Copy a local file after checking it against the allow-list.
async fn fetch_file(config: &ServerConfig, path: &str, dest: &Path) -> Result<()> {
    let path = Path::new(path);

    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return Err(PlatenError::DocumentAccess(format!(
            "file URI path '{}' contains dot segments",
            path.display()
        )));
    }
    let allowed = config
        .file_fetch_roots
        .iter()
        .any(|root| path.starts_with(root));
    if !allowed {
        return Err(PlatenError::DocumentAccess(format!(
            "file URI path '{}' is outside the allowed directories",
            path.display()
        )));
    }

    let bytes = tokio::fs::copy(path, dest).await.map_err(|e| {
        PlatenError::DocumentAccess(format!("read '{}': {e}", path.display()))
    })?;
    debug!(path = %path.display(), bytes, "file document fetched");
    Ok(())
}

/// Stream an http(s) document into the spool file.
async fn fetch_http(uri: &str, dest: &Path) -> Result<Option<String>> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .connect_timeout(FETCH_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| PlatenError::Internal(format!("http client: {e}")))?;

    let response = client
        .get(uri)
        .header(reqwest::header::ACCEPT_LANGUAGE, "en")
        .send()
        .await
        .map_err(|e| PlatenError::DocumentAccess(format!("GET {uri}: {e}")))?;

    if !response.status().is_success() {
        return Err(PlatenError::DocumentAccess(format!(
            "GET {uri}: HTTP {}",
            response.status()
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| PlatenError::Internal(format!("create '{}': {e}", dest.display())))?;

    let mut response = response;
    let mut total = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| PlatenError::DocumentAccess(format!("read {uri}: {e}")))?
    {
        total += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .map_err(|e| PlatenError::Internal(format!("write spool: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| PlatenError::Internal(format!("flush spool: {e}")))?;

    debug!(uri, bytes = total, content_type = ?content_type, "http document fetched");
    Ok(content_type)
}

/// Pick the service prefix for a new printer path, warning on an
/// unknown service keyword.
pub fn printer_path_for(service: &str, name: &str) -> String {
    let prefix = match service {
        "print" => "/ipp/print/",
        "print3d" => "/ipp/print3d/",
        "faxout" => "/ipp/faxout/",
        other => {
            warn!(service = other, "unknown service type, using print");
            "/ipp/print/"
        }
    };
    let mut path = String::from(prefix);
    path.extend(name.chars().map(|c| {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
            c
        } else {
            '_'
        }
    }));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use platen_core::config::ServerConfig;
    use std::path::PathBuf;

    fn fixture() -> Arc<System> {
        let system = System::new(ServerConfig::default());
        let printer = Printer::create(1, "p", "/ipp/print/p", &system.config);
        system.add_printer(printer);
        system
    }

    #[test]
    fn resource_path_extraction() {
        assert_eq!(
            resource_path("ipp://host:631/ipp/print/p").as_deref(),
            Some("/ipp/print/p")
        );
        assert_eq!(resource_path("ipp://host").as_deref(), Some("/"));
        assert_eq!(
            resource_path("ipps://host/ipp/system?x=1").as_deref(),
            Some("/ipp/system")
        );
        assert_eq!(resource_path("not a uri"), None);
    }

    #[test]
    fn resolve_system_and_printer() {
        let system = fixture();
        assert!(matches!(
            resolve_target(&system, "/ipp/system"),
            Some(Target::System)
        ));
        assert!(matches!(
            resolve_target(&system, "/ipp/print/p"),
            Some(Target::Printer(_))
        ));
        assert!(resolve_target(&system, "/ipp/print/q").is_none());
    }

    #[test]
    fn resolve_job_uri_strips_id() {
        let system = fixture();
        match resolve_target(&system, "/ipp/print/p/42") {
            Some(Target::Job(printer, id)) => {
                assert_eq!(printer.id, 1);
                assert_eq!(id, 42);
            }
            _ => panic!("expected job target"),
        }
        // Non-numeric tails are not jobs.
        assert!(resolve_target(&system, "/ipp/print/p/sub").is_none());
    }

    #[tokio::test]
    async fn file_fetch_requires_allow_list() {
        let config = ServerConfig::default();
        let dest = std::env::temp_dir().join("platen-uri-test-out");
        let err = fetch_document(&config, "file:///etc/hostname", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, PlatenError::DocumentAccess(_)));
    }

    #[tokio::test]
    async fn file_fetch_rejects_dot_segments() {
        let mut config = ServerConfig::default();
        config.file_fetch_roots.push(PathBuf::from("/tmp"));
        let dest = std::env::temp_dir().join("platen-uri-test-out2");
        let err = fetch_document(&config, "file:///tmp/../etc/passwd", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, PlatenError::DocumentAccess(_)));
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let config = ServerConfig::default();
        let dest = std::env::temp_dir().join("platen-uri-test-out3");
        let err = fetch_document(&config, "ftp://host/file", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, PlatenError::Unsupported(_)));
    }

    #[test]
    fn printer_paths_are_sanitized() {
        assert_eq!(printer_path_for("print", "Front Desk"), "/ipp/print/Front_Desk");
        assert_eq!(printer_path_for("faxout", "fax1"), "/ipp/faxout/fax1");
    }
}
