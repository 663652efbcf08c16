// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `herald` binary as a subprocess, subscribes over
//! WebSocket and publishes with `herald notify`.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `herald` binary.
pub fn herald_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("herald")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Run `herald notify` against `port` and wait for it to finish.
pub fn notify(port: u16, to: &[&str], message: &str) -> anyhow::Result<Output> {
    let binary = herald_binary();
    anyhow::ensure!(binary.exists(), "herald binary not found at {}", binary.display());

    let mut args: Vec<String> =
        vec!["notify".into(), "--host".into(), "127.0.0.1".into(), "--port".into(), port.to_string()];
    for value in to {
        args.extend(["--to".into(), (*value).to_owned()]);
    }
    args.push(message.to_owned());

    Ok(Command::new(&binary).args(&args).env("HERALD_LOG_LEVEL", "warn").output()?)
}

/// A running `herald listen` process that is killed on drop.
pub struct HeraldProcess {
    child: Child,
    port: u16,
}

/// Builder for the broker's command-line options.
#[derive(Default)]
pub struct HeraldBuilder {
    path: Option<String>,
    identity_key: Option<String>,
}

impl HeraldBuilder {
    /// Serve subscribers under a path prefix (`--path`).
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_owned());
        self
    }

    /// Address publishes by a different identity attribute (`--identity-key`).
    pub fn identity_key(mut self, key: &str) -> Self {
        self.identity_key = Some(key.to_owned());
        self
    }

    pub fn spawn(self) -> anyhow::Result<HeraldProcess> {
        let binary = herald_binary();
        anyhow::ensure!(binary.exists(), "herald binary not found at {}", binary.display());

        let port = free_port()?;
        let mut args: Vec<String> = vec![
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
            "listen".into(),
            "--bind".into(),
            "127.0.0.1".into(),
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
        ];
        if let Some(path) = self.path {
            args.extend(["--path".into(), path]);
        }
        if let Some(key) = self.identity_key {
            args.extend(["--identity-key".into(), key]);
        }

        let child = Command::new(&binary)
            .args(&args)
            .env("HERALD_POLL_MS", "5")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(HeraldProcess { child, port })
    }
}

impl HeraldProcess {
    pub fn build() -> HeraldBuilder {
        HeraldBuilder::default()
    }

    /// Spawn a broker with default options.
    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// WebSocket URL for a subscriber path (without leading slash).
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}/{path}", self.port)
    }

    /// Poll the port until the broker accepts connections.
    ///
    /// Each probe connects and closes without sending, which the broker
    /// drops as soon as it sees EOF.
    pub async fn wait_listening(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("herald did not start listening within {timeout:?}");
            }
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port)).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("herald did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for HeraldProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
