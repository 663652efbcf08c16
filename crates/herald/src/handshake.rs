// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket opening handshake: request parsing, path identity extraction,
//! accept token computation, and the upgrade response.

use std::fmt;

use base64::Engine;
use indexmap::IndexMap;
use regex::Regex;
use ring::digest;

use crate::identity::Identity;

/// GUID appended to the client key before hashing (RFC 6455 §1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A parsed upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request target with the leading slash removed.
    pub path: String,
    pub headers: IndexMap<String, String>,
}

impl Request {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn websocket_key(&self) -> Option<&str> {
        self.header("Sec-WebSocket-Key").map(str::trim).filter(|k| !k.is_empty())
    }
}

/// The payload is not an HTTP GET request with headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotAHandshake;

impl fmt::Display for NotAHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("payload is not an HTTP upgrade request")
    }
}

impl std::error::Error for NotAHandshake {}

/// Line-oriented parser for upgrade requests.
#[derive(Debug, Clone)]
pub struct RequestParser {
    request_line: Regex,
    header_line: Regex,
}

impl RequestParser {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            request_line: Regex::new(r"(?i)^GET /(\S*) HTTP/1\.1$")?,
            header_line: Regex::new(r"^(\S+): (.*)$")?,
        })
    }

    /// Parse `raw` as an upgrade request.
    ///
    /// A GET request line is required, and at least one `Key: Value` header
    /// line must follow it. Anything else is [`NotAHandshake`].
    pub fn parse(&self, raw: &[u8]) -> Result<Request, NotAHandshake> {
        let text = String::from_utf8_lossy(raw);
        let mut path = None;
        let mut headers = IndexMap::new();

        for line in text.split("\r\n") {
            let line = line.trim_end();
            if path.is_none() {
                if let Some(caps) = self.request_line.captures(line) {
                    path = Some(caps[1].to_owned());
                }
                continue;
            }
            if let Some(caps) = self.header_line.captures(line) {
                headers.insert(caps[1].to_owned(), caps[2].to_owned());
            }
        }

        match path {
            Some(path) if !headers.is_empty() => Ok(Request { path, headers }),
            _ => Err(NotAHandshake),
        }
    }
}

/// Extract identity attributes from a request path.
///
/// Strips `prefix` (and any query string), then pairs even-indexed segments
/// as keys with the odd-indexed segment that follows. Returns `None` when a
/// key has no value.
pub fn parse_path_identity(path: &str, prefix: &str) -> Option<Identity> {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.len() % 2 != 0 {
        return None;
    }
    Some(segments.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect())
}

/// Compute `Sec-WebSocket-Accept` for a client key.
pub fn compute_accept_token(key: &str) -> String {
    let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
    ctx.update(key.as_bytes());
    ctx.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(ctx.finish())
}

/// Build the `101` upgrade response.
///
/// `secure` only changes the advertised schemes; no TLS is performed.
pub fn build_upgrade_response(host: &str, path: &str, secure: bool, accept: &str) -> String {
    let (http, ws) = if secure { ("https", "wss") } else { ("http", "ws") };
    format!(
        "HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         WebSocket-Origin: {http}://{host}\r\n\
         WebSocket-Location: {ws}://{host}/{path}\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

#[cfg(test)]
#[path = "handshake_tests.rs"]
mod tests;
