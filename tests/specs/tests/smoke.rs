// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `herald` binary, subscribe
//! over WebSocket and publish with `herald notify`.

use std::process::Command;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use herald_specs::{free_port, herald_binary, notify, HeraldProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn subscribe(herald: &HeraldProcess, path: &str) -> anyhow::Result<WsStream> {
    let (ws, _) = tokio_tungstenite::connect_async(herald.ws_url(path))
        .await
        .map_err(|e| anyhow::anyhow!("ws connect: {e}"))?;
    Ok(ws)
}

async fn recv_text(ws: &mut WsStream) -> anyhow::Result<String> {
    let msg = tokio::time::timeout(TIMEOUT, ws.next())
        .await
        .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
        .ok_or_else(|| anyhow::anyhow!("ws stream closed"))??;
    match msg {
        Message::Text(text) => Ok(text.to_string()),
        other => anyhow::bail!("expected Text message, got {other:?}"),
    }
}

// -- Publish ------------------------------------------------------------------

#[tokio::test]
async fn notify_reaches_targeted_subscriber() -> anyhow::Result<()> {
    let herald = HeraldProcess::start()?;
    herald.wait_listening(TIMEOUT).await?;

    let mut alice = subscribe(&herald, "user/alice").await?;
    let mut bob = subscribe(&herald, "user/bob").await?;

    let output = notify(herald.port(), &["alice"], r#"{"event":"build","ok":true}"#)?;
    assert!(output.status.success(), "notify failed: {output:?}");

    let text = recv_text(&mut alice).await?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(value, serde_json::json!({"event": "build", "ok": true}));

    let quiet = tokio::time::timeout(Duration::from_millis(300), bob.next()).await;
    assert!(quiet.is_err(), "bob should not receive alice's message");
    Ok(())
}

#[tokio::test]
async fn notify_plain_text_broadcasts_json_string() -> anyhow::Result<()> {
    let herald = HeraldProcess::start()?;
    herald.wait_listening(TIMEOUT).await?;

    let mut first = subscribe(&herald, "user/1").await?;
    let mut second = subscribe(&herald, "user/2").await?;

    let output = notify(herald.port(), &[], "maintenance at noon")?;
    assert!(output.status.success(), "notify failed: {output:?}");

    assert_eq!(recv_text(&mut first).await?, r#""maintenance at noon""#);
    assert_eq!(recv_text(&mut second).await?, r#""maintenance at noon""#);
    Ok(())
}

#[tokio::test]
async fn custom_path_and_identity_key() -> anyhow::Result<()> {
    let herald = HeraldProcess::build().path("/live/").identity_key("room").spawn()?;
    herald.wait_listening(TIMEOUT).await?;

    let mut ws = subscribe(&herald, "live/room/lobby/user/7").await?;
    let output = notify(herald.port(), &["lobby"], "42")?;
    assert!(output.status.success(), "notify failed: {output:?}");
    assert_eq!(recv_text(&mut ws).await?, "42");
    Ok(())
}

// -- Process ------------------------------------------------------------------

#[tokio::test]
async fn notify_without_broker_fails() -> anyhow::Result<()> {
    let output = notify(free_port()?, &[], "nobody listening")?;
    assert_eq!(output.status.code(), Some(1));
    Ok(())
}

#[tokio::test]
async fn invalid_identity_key_exits_with_usage_error() -> anyhow::Result<()> {
    let output =
        Command::new(herald_binary()).args(["listen", "--identity-key", "a/b"]).output()?;
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("identity-key"));
    Ok(())
}

#[tokio::test]
async fn sigterm_stops_broker_and_closes_subscribers() -> anyhow::Result<()> {
    let mut herald = HeraldProcess::start()?;
    herald.wait_listening(TIMEOUT).await?;
    let mut ws = subscribe(&herald, "user/zed").await?;

    let status = Command::new("kill").args(["-TERM", &herald.pid().to_string()]).status()?;
    assert!(status.success());

    let exit = herald.wait_exit(TIMEOUT).await?;
    assert!(exit.success(), "unexpected exit: {exit:?}");

    let next = tokio::time::timeout(TIMEOUT, ws.next()).await?;
    assert!(!matches!(next, Some(Ok(Message::Text(_)))), "unexpected frame: {next:?}");
    Ok(())
}
