// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Classification of a freshly accepted connection.
//!
//! Subscribers and publishers share one listening port. The first bytes a
//! connection sends decide its role: anything that parses as an HTTP GET
//! upgrade request is a subscriber, anything else is tried as a publisher
//! envelope. All of that decision lives in [`Classifier::classify`].

use serde::de::IgnoredAny;

use crate::envelope::{decode_envelope, Envelope};
use crate::error::{Fault, FaultKind};
use crate::handshake::{parse_path_identity, RequestParser};
use crate::identity::Identity;

/// What to do with a new connection.
#[derive(Debug)]
pub enum Inbound {
    /// Complete the handshake and register the subscriber.
    Subscribe { identity: Identity, key: String },
    /// Route the envelope, then let the connection go.
    Publish(Envelope),
    /// Close without responding.
    Drop(Fault),
}

#[derive(Debug, Clone)]
pub struct Classifier {
    parser: RequestParser,
    path_prefix: String,
    identity_key: String,
}

impl Classifier {
    pub fn new(path_prefix: impl Into<String>, identity_key: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            parser: RequestParser::new()?,
            path_prefix: path_prefix.into(),
            identity_key: identity_key.into(),
        })
    }

    pub fn classify(&self, raw: &[u8]) -> Inbound {
        let Ok(request) = self.parser.parse(raw) else {
            return match decode_envelope(raw) {
                Ok(envelope) => Inbound::Publish(envelope),
                Err(e) => Inbound::Drop(FaultKind::MalformedEnvelope.fault(e)),
            };
        };

        let Some(identity) = parse_path_identity(&request.path, &self.path_prefix) else {
            return malformed(format!("unpaired path segment in /{}", request.path));
        };
        if !identity.contains_key(&self.identity_key) {
            return malformed(format!("path /{} has no {:?} attribute", request.path, self.identity_key));
        }
        let Some(key) = request.websocket_key() else {
            return malformed("missing Sec-WebSocket-Key".to_owned());
        };
        Inbound::Subscribe { identity, key: key.to_owned() }
    }
}

fn malformed(reason: String) -> Inbound {
    Inbound::Drop(FaultKind::MalformedHandshake.fault(anyhow::anyhow!(reason)))
}

/// Whether `raw` already holds a whole request head or a whole JSON object,
/// so the initial read can stop without waiting for EOF.
///
/// `fresh` is the number of bytes at the end of `raw` that arrived in the
/// latest read. Only those (plus three bytes of overlap) are searched for the
/// end of a request head, and the JSON parse is attempted only when the
/// buffer ends with `}`.
pub fn is_complete(raw: &[u8], fresh: usize) -> bool {
    let tail = &raw[raw.len().saturating_sub(fresh.saturating_add(3))..];
    if tail.windows(4).any(|w| w == b"\r\n\r\n") {
        return true;
    }
    let closes_object = raw.iter().rev().find(|b| !b.is_ascii_whitespace()) == Some(&b'}');
    closes_object && serde_json::from_slice::<IgnoredAny>(raw).is_ok()
}

#[cfg(test)]
#[path = "inbound_tests.rs"]
mod tests;
