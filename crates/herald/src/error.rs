// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fault categories a reactor pass can run into.
///
/// Only `UnexpectedFault` ever reaches the `error` event. The others are
/// resolved inside the pass: malformed input is dropped and socket faults on
/// tracked connections become disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    MalformedHandshake,
    MalformedEnvelope,
    SocketFault,
    UnexpectedFault,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedHandshake => "MALFORMED_HANDSHAKE",
            Self::MalformedEnvelope => "MALFORMED_ENVELOPE",
            Self::SocketFault => "SOCKET_FAULT",
            Self::UnexpectedFault => "UNEXPECTED_FAULT",
        }
    }

    /// Whether this kind is surfaced through the `error` event.
    pub fn is_reported(&self) -> bool {
        matches!(self, Self::UnexpectedFault)
    }

    /// Wrap an error into a [`Fault`] of this kind.
    pub fn fault(self, error: impl Into<anyhow::Error>) -> Fault {
        Fault { kind: self, error: error.into() }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of the `error` event.
#[derive(Debug)]
pub struct Fault {
    pub kind: FaultKind,
    pub error: anyhow::Error,
}

impl Fault {
    /// Build an `UnexpectedFault` from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = panic_message(payload);
        FaultKind::UnexpectedFault.fault(anyhow::anyhow!("panic during reactor pass: {detail}"))
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.kind, self.error)
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
