// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connecting role: deliver one envelope to a running broker.

use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::{Endpoint, NotifyConfig};
use crate::envelope::{Envelope, Target};

/// Publishes envelopes over short-lived TCP connections.
///
/// Each call opens a connection, writes the envelope and closes. The broker
/// sends nothing back, so success means the bytes were handed to the kernel,
/// not that any subscriber received them.
#[derive(Debug, Clone)]
pub struct Notifier {
    endpoint: Endpoint,
    connect_timeout: Duration,
}

impl Notifier {
    pub fn new(endpoint: Endpoint, connect_timeout: Duration) -> Self {
        Self { endpoint, connect_timeout }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new(config.endpoint(), config.connect_timeout())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Publish `message` to the subscribers selected by `to`.
    pub async fn notify(&self, message: Value, to: Target) -> anyhow::Result<()> {
        self.send(&Envelope::new(message, to)).await
    }

    pub async fn send(&self, envelope: &Envelope) -> anyhow::Result<()> {
        let bytes = envelope.encode()?;
        let addr = (self.endpoint.host.as_str(), self.endpoint.port);
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .with_context(|| format!("connect to {} timed out", self.endpoint))?
            .with_context(|| format!("connect to {}", self.endpoint))?;

        stream.write_all(&bytes).await.context("write envelope")?;
        stream.shutdown().await.context("close connection")?;
        debug!(endpoint = %self.endpoint, bytes = bytes.len(), "envelope sent");
        Ok(())
    }
}

#[cfg(test)]
#[path = "notifier_tests.rs"]
mod tests;
