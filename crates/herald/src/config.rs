// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::envelope::{Envelope, Target};

/// Identity-addressed WebSocket fan-out broker.
#[derive(Debug, Parser)]
#[command(name = "herald", version, about)]
pub struct Cli {
    /// Log format (json or text).
    #[arg(long, env = "HERALD_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log level or filter directive (trace, debug, info, warn, error).
    #[arg(long, env = "HERALD_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the broker.
    Listen(ListenConfig),
    /// Publish one message to a running broker.
    Notify(NotifyConfig),
}

impl Cli {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
        match &self.command {
            Command::Listen(config) => config.validate(),
            Command::Notify(config) => config.validate(),
        }
    }
}

/// A host/port pair. The broker binds one, the notifier connects to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Broker configuration.
#[derive(Debug, Clone, clap::Args)]
pub struct ListenConfig {
    /// Host advertised in the handshake origin and location headers.
    #[arg(long, env = "HERALD_HOST", default_value = "localhost")]
    pub host: String,

    /// Address to bind on.
    #[arg(long, env = "HERALD_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port shared by subscribers and publishers.
    #[arg(long, env = "HERALD_PORT", default_value_t = 8090)]
    pub port: u16,

    /// Path prefix stripped before identity parsing (e.g. "socket/").
    #[arg(long, env = "HERALD_PATH", default_value = "")]
    pub path: String,

    /// Identity attribute publishes are addressed by.
    #[arg(long, env = "HERALD_IDENTITY_KEY", default_value = "user")]
    pub identity_key: String,

    /// Advertise wss/https instead of ws/http. No TLS is terminated.
    #[arg(long, env = "HERALD_SECURE")]
    pub secure: bool,

    // -- Tuning knobs (skip from CLI; set in ListenConfig::test()) --------
    #[clap(skip)]
    pub poll_ms: Option<u64>,
    #[clap(skip)]
    pub read_timeout_ms: Option<u64>,
    #[clap(skip)]
    pub write_timeout_ms: Option<u64>,
    #[clap(skip)]
    pub max_request_bytes: Option<usize>,
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

/// Smallest initial read buffer accepted; a browser handshake needs a few
/// hundred bytes.
pub const MIN_REQUEST_BYTES: usize = 1024;

impl ListenConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.identity_key.trim().is_empty() {
            anyhow::bail!("--identity-key must not be empty");
        }
        if self.identity_key.contains('/') {
            anyhow::bail!("--identity-key must not contain '/'");
        }
        if self.max_request_bytes() < MIN_REQUEST_BYTES {
            anyhow::bail!("max request bytes must be at least {MIN_REQUEST_BYTES}");
        }
        Ok(())
    }

    /// Path prefix with any leading slashes removed, as it appears after
    /// `GET /` in a request line.
    pub fn path_prefix(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    pub fn bind_endpoint(&self) -> Endpoint {
        Endpoint { host: self.bind.clone(), port: self.port }
    }

    // -- Tuning knobs (field override → env var → compiled default) --------

    duration_field!(poll_interval, poll_ms, "HERALD_POLL_MS", 10);
    duration_field!(read_timeout, read_timeout_ms, "HERALD_READ_TIMEOUT_MS", 1_000);
    duration_field!(write_timeout, write_timeout_ms, "HERALD_WRITE_TIMEOUT_MS", 1_000);

    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes.unwrap_or_else(|| {
            std::env::var("HERALD_MAX_REQUEST_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64 * 1024)
        })
    }

    /// Build a minimal `ListenConfig` for tests (loopback, port 0).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host: "localhost".into(),
            bind: "127.0.0.1".into(),
            port: 0,
            path: String::new(),
            identity_key: "user".into(),
            secure: false,
            poll_ms: Some(5),
            read_timeout_ms: Some(500),
            write_timeout_ms: Some(500),
            max_request_bytes: Some(64 * 1024),
        }
    }
}

/// Publisher configuration for `herald notify`.
#[derive(Debug, Clone, clap::Args)]
pub struct NotifyConfig {
    /// Broker host.
    #[arg(long, env = "HERALD_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Broker port.
    #[arg(long, env = "HERALD_PORT", default_value_t = 8090)]
    pub port: u16,

    /// Identity value to address (repeatable). Omit to broadcast.
    #[arg(long = "to")]
    pub to: Vec<String>,

    /// Connect timeout in milliseconds.
    #[arg(long, env = "HERALD_CONNECT_TIMEOUT_MS", default_value_t = 5_000)]
    pub connect_timeout_ms: u64,

    /// Message to deliver. Parsed as JSON when possible, otherwise sent as a
    /// JSON string.
    pub message: String,
}

impl NotifyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            anyhow::bail!("--host must not be empty");
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint { host: self.host.clone(), port: self.port }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn envelope(&self) -> Envelope {
        let message = serde_json::from_str::<Value>(&self.message)
            .unwrap_or_else(|_| Value::String(self.message.clone()));
        Envelope::new(message, Target::only(self.to.iter().cloned()))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
