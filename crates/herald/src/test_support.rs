// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: event recording, raw socket helpers, and
//! assertion macros.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::FaultKind;
use crate::event::{Delivery, EventBus, EventKind};
use crate::identity::Identity;

/// One captured event dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Update(Vec<Identity>),
    Connect(Identity),
    Disconnect(Identity),
    Message(Delivery),
    Error(FaultKind, String),
}

impl Recorded {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Update(_) => EventKind::Update,
            Self::Connect(_) => EventKind::Connect,
            Self::Disconnect(_) => EventKind::Disconnect,
            Self::Message(_) => EventKind::Message,
            Self::Error(..) => EventKind::Error,
        }
    }
}

/// Captures every event dispatched on the buses it is attached to, in
/// dispatch order.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every event kind on `bus`.
    pub fn attach(&self, bus: &mut EventBus) {
        let events = Arc::clone(&self.events);
        bus.on_update(move |roster| push(&events, Recorded::Update(roster.to_vec())));
        let events = Arc::clone(&self.events);
        bus.on_client_connect(move |identity| push(&events, Recorded::Connect(identity.clone())));
        let events = Arc::clone(&self.events);
        bus.on_client_disconnect(move |identity| {
            push(&events, Recorded::Disconnect(identity.clone()))
        });
        let events = Arc::clone(&self.events);
        bus.on_message(move |delivery| push(&events, Recorded::Message(delivery.clone())));
        let events = Arc::clone(&self.events);
        bus.on_error(move |fault| push(&events, Recorded::Error(fault.kind, fault.to_string())));
    }

    /// Return and clear everything recorded so far.
    pub fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut *lock(&self.events))
    }

    pub fn snapshot(&self) -> Vec<Recorded> {
        lock(&self.events).clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        lock(&self.events).iter().map(Recorded::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        lock(&self.events).iter().filter(|e| e.kind() == kind).count()
    }
}

fn lock(events: &Mutex<Vec<Recorded>>) -> MutexGuard<'_, Vec<Recorded>> {
    events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn push(events: &Mutex<Vec<Recorded>>, event: Recorded) {
    lock(events).push(event);
}

/// Build an identity from literal pairs.
pub fn identity(pairs: &[(&str, &str)]) -> Identity {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

/// Build a raw WebSocket upgrade request for `path` (without leading slash).
pub fn handshake_request(path: &str, key: &str) -> String {
    format!(
        "GET /{path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Open a connected pair of loopback TCP streams: `(client, server)`.
pub async fn loopback_pair() -> anyhow::Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    Ok((client?, accepted?.0))
}

/// Read the HTTP response head (up to and including the blank line).
pub async fn read_response_head(stream: &mut TcpStream, timeout: Duration) -> anyhow::Result<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    tokio::time::timeout(timeout, async {
        while !head.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut byte).await?;
            anyhow::ensure!(n > 0, "connection closed before response head completed");
            head.push(byte[0]);
        }
        Ok::<_, anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow::anyhow!("response head timeout"))??;
    Ok(String::from_utf8(head)?)
}

/// Read one unmasked server frame, returning `(first byte, payload)`.
pub async fn read_frame(stream: &mut TcpStream, timeout: Duration) -> anyhow::Result<(u8, Vec<u8>)> {
    tokio::time::timeout(timeout, async {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;
        let len = match head[1] & 0x7f {
            126 => u64::from(stream.read_u16().await?),
            127 => stream.read_u64().await?,
            n => u64::from(n),
        };
        let mut payload = vec![0u8; usize::try_from(len)?];
        stream.read_exact(&mut payload).await?;
        Ok::<_, anyhow::Error>((head[0], payload))
    })
    .await
    .map_err(|_| anyhow::anyhow!("frame read timeout"))?
}

/// Write `bytes` and close the write half, the way a publisher does.
pub async fn send_and_close(stream: &mut TcpStream, bytes: &[u8]) -> anyhow::Result<()> {
    stream.write_all(bytes).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Assert that a `Result` is `Err` and its message contains a substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
