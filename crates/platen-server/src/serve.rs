// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The TCP serving loop.
//
// IPP rides HTTP POST (RFC 8010 §3) with `application/ipp` bodies. The
// loop parses just enough HTTP framing to find the body and the Basic
// credentials, feeds the decoded message to the dispatcher, and writes
// the response back in a minimal HTTP/1.1 envelope. One task per
// accepted connection; a connection carries one request and closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use platen_core::error::{PlatenError, Result};
use platen_core::types::ServerStatus;
use platen_ipp::wire;

use crate::dispatch;
use crate::store::System;

/// Maximum bytes accepted from one connection.
const MAX_REQUEST_BYTES: usize = 64 * 1024 * 1024; // 64 MiB

/// The IPP-over-HTTP server.
pub struct IppServer {
    port: u16,
    status: ServerStatus,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
}

impl IppServer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            status: ServerStatus::Stopped,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind and start accepting connections.
    pub async fn start(&mut self, system: Arc<System>) -> Result<()> {
        if self.status == ServerStatus::Running {
            debug!(port = self.port, "IPP server already running");
            return Ok(());
        }
        self.status = ServerStatus::Starting;

        let bind_addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            PlatenError::Internal(format!("bind {bind_addr}: {e}"))
        })?;
        info!(port = self.port, "IPP server listening");

        let shutdown = Arc::clone(&self.shutdown_signal);
        let connections = Arc::clone(&self.active_connections);
        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, connections, system).await;
        });

        self.task_handle = Some(handle);
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Stop accepting; in-flight connections finish on their own tasks.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }
        info!(port = self.port, "stopping IPP server");
        self.shutdown_signal.notify_one();
        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| PlatenError::Internal(format!("task join: {e}")))?;
        }
        self.status = ServerStatus::Stopped;
        Ok(())
    }

    async fn accept_loop(
        listener: TcpListener,
        shutdown: Arc<Notify>,
        connections: Arc<AtomicU32>,
        system: Arc<System>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "incoming IPP connection");
                            let system = Arc::clone(&system);
                            let connections = Arc::clone(&connections);
                            tokio::spawn(async move {
                                connections.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) = handle_connection(stream, peer, system).await {
                                    warn!(peer = %peer, error = %e, "connection handler error");
                                }
                                connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }
}

/// Serve one connection: read the request, dispatch, reply, close.
async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    peer: SocketAddr,
    system: Arc<System>,
) -> Result<()> {
    let mut buf = Vec::with_capacity(8192);
    let mut limited = (&mut stream).take(MAX_REQUEST_BYTES as u64);
    let bytes_read = limited
        .read_to_end(&mut buf)
        .await
        .map_err(|e| PlatenError::Internal(format!("read from {peer}: {e}")))?;
    if bytes_read == 0 {
        debug!(peer = %peer, "empty request");
        return Ok(());
    }

    let envelope = match parse_http_envelope(&buf) {
        Some(envelope) => envelope,
        None => {
            // Raw IPP over TCP (test clients); no credentials available.
            debug!(peer = %peer, "no HTTP envelope, treating as raw IPP");
            HttpEnvelope {
                body_offset: 0,
                content_length: None,
                username: None,
            }
        }
    };

    let body_end = envelope
        .content_length
        .map(|len| (envelope.body_offset + len).min(buf.len()))
        .unwrap_or(buf.len());
    let body = &buf[envelope.body_offset..body_end];

    let request = match wire::parse(body) {
        Ok(request) => request,
        Err(e) => {
            warn!(peer = %peer, error = %e, "malformed IPP request");
            let resp = http_wrap(400, "Bad Request", None);
            stream.write_all(&resp).await?;
            return Ok(());
        }
    };

    debug!(
        peer = %peer,
        operation = %format!("0x{:04x}", request.code),
        request_id = request.request_id,
        groups = request.groups.len(),
        payload = request.payload.len(),
        "parsed IPP request"
    );

    match dispatch::dispatch(&system, envelope.username.as_deref(), request).await {
        Ok(response) => {
            let body = wire::encode(&response);
            let resp = http_wrap(200, "OK", Some(&body));
            stream.write_all(&resp).await?;
        }
        Err(PlatenError::Unauthorized) => {
            let resp = http_wrap(401, "Unauthorized", None);
            stream.write_all(&resp).await?;
        }
        Err(PlatenError::Forbidden) => {
            let resp = http_wrap(403, "Forbidden", None);
            stream.write_all(&resp).await?;
        }
        Err(e) => {
            error!(peer = %peer, error = %e, "dispatch failure");
            let resp = http_wrap(500, "Internal Server Error", None);
            stream.write_all(&resp).await?;
        }
    }
    stream.flush().await?;
    Ok(())
}

/// Wrap an IPP body (or nothing) in a minimal HTTP/1.1 response.
fn http_wrap(code: u16, reason: &str, body: Option<&[u8]>) -> Vec<u8> {
    let body = body.unwrap_or_default();
    let mut head = format!(
        "HTTP/1.1 {code} {reason}\r\n\
         Content-Type: application/ipp\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n",
        body.len()
    );
    if code == 401 {
        head.push_str("WWW-Authenticate: Basic realm=\"Platen\"\r\n");
    }
    head.push_str("\r\n");
    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

struct HttpEnvelope {
    body_offset: usize,
    content_length: Option<usize>,
    /// Username from Basic credentials; password verification belongs to
    /// the platform layer this server treats as external.
    username: Option<String>,
}

/// Parse the minimum HTTP framing: header end, Content-Length, and the
/// Authorization username. Returns `None` when the bytes do not look
/// like HTTP at all.
fn parse_http_envelope(data: &[u8]) -> Option<HttpEnvelope> {
    let header_end = find_subsequence(data, b"\r\n\r\n")?;
    let headers = String::from_utf8_lossy(&data[..header_end]);
    if !headers.starts_with("POST") {
        return None;
    }

    let mut content_length = None;
    let mut username = None;
    for line in headers.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().ok();
        } else if name.eq_ignore_ascii_case("authorization") {
            username = basic_username(value);
        }
    }

    Some(HttpEnvelope {
        body_offset: header_end + 4,
        content_length,
        username,
    })
}

/// Extract the username from a `Basic` credential.
fn basic_username(value: &str) -> Option<String> {
    let encoded = value.strip_prefix("Basic ")?.trim();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, _password) = text.split_once(':')?;
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_starts_stopped() {
        let server = IppServer::new(631);
        assert_eq!(server.status(), ServerStatus::Stopped);
        assert_eq!(server.port(), 631);
        assert_eq!(server.active_connections(), 0);
    }

    #[test]
    fn envelope_parsing_finds_body_and_credentials() {
        // "alice:secret"
        let http = b"POST /ipp/print/p HTTP/1.1\r\n\
                     Host: h:631\r\n\
                     Content-Type: application/ipp\r\n\
                     Content-Length: 9\r\n\
                     Authorization: Basic YWxpY2U6c2VjcmV0\r\n\
                     \r\n\
                     ipp-bytes";
        let envelope = parse_http_envelope(http).expect("envelope");
        assert_eq!(envelope.content_length, Some(9));
        assert_eq!(envelope.username.as_deref(), Some("alice"));
        assert_eq!(&http[envelope.body_offset..], b"ipp-bytes");
    }

    #[test]
    fn raw_ipp_is_not_an_envelope() {
        let raw = [0x02u8, 0x00, 0x00, 0x02, 0, 0, 0, 1, 0x03];
        assert!(parse_http_envelope(&raw).is_none());
    }

    #[test]
    fn basic_credentials_must_have_user() {
        assert_eq!(basic_username("Basic YWxpY2U6c2VjcmV0").as_deref(), Some("alice"));
        // ":password" — empty user.
        assert_eq!(basic_username("Basic OnBhc3N3b3Jk"), None);
        assert_eq!(basic_username("Bearer token"), None);
        assert_eq!(basic_username("Basic not-base64!!"), None);
    }

    #[test]
    fn http_wrap_shapes_the_response() {
        let out = http_wrap(200, "OK", Some(b"abc"));
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.ends_with("abc"));

        let unauthorized = http_wrap(401, "Unauthorized", None);
        let text = String::from_utf8_lossy(&unauthorized);
        assert!(text.contains("WWW-Authenticate: Basic"));
    }
}
