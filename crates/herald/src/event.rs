// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle event bus.
//!
//! One append-only handler list per event kind. Dispatch is synchronous and
//! runs handlers in registration order. A panicking handler is logged and
//! skipped; the rest of the dispatch still runs.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tracing::warn;

use crate::error::{panic_message, Fault};
use crate::identity::Identity;

/// Boxed event handler taking the event's payload by reference.
pub type Handler<T> = Box<dyn Fn(&T) + Send + Sync>;

/// The five lifecycle signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Update,
    Connect,
    Disconnect,
    Error,
    Message,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of the `message` event: who was addressed and what was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    /// Identities of the subscribers the publish resolved to.
    pub targets: Vec<Identity>,
    /// JSON encoding of the envelope's `message`, exactly as framed.
    pub message: String,
}

/// Typed handler lists, one per [`EventKind`].
#[derive(Default)]
pub struct EventBus {
    update: Vec<Handler<[Identity]>>,
    connect: Vec<Handler<Identity>>,
    disconnect: Vec<Handler<Identity>>,
    error: Vec<Handler<Fault>>,
    message: Vec<Handler<Delivery>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the full roster after every connect and disconnect.
    pub fn on_update(&mut self, handler: impl Fn(&[Identity]) + Send + Sync + 'static) {
        self.update.push(Box::new(handler));
    }

    /// Called with the identity of each newly registered subscriber.
    pub fn on_client_connect(&mut self, handler: impl Fn(&Identity) + Send + Sync + 'static) {
        self.connect.push(Box::new(handler));
    }

    /// Called with the identity of each evicted subscriber.
    pub fn on_client_disconnect(&mut self, handler: impl Fn(&Identity) + Send + Sync + 'static) {
        self.disconnect.push(Box::new(handler));
    }

    /// Called once per routed publish.
    pub fn on_message(&mut self, handler: impl Fn(&Delivery) + Send + Sync + 'static) {
        self.message.push(Box::new(handler));
    }

    /// Called when a pass catches an unexpected fault.
    pub fn on_error(&mut self, handler: impl Fn(&Fault) + Send + Sync + 'static) {
        self.error.push(Box::new(handler));
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Update => self.update.len(),
            EventKind::Connect => self.connect.len(),
            EventKind::Disconnect => self.disconnect.len(),
            EventKind::Error => self.error.len(),
            EventKind::Message => self.message.len(),
        }
    }

    pub fn updated(&self, roster: &[Identity]) {
        invoke(EventKind::Update, &self.update, roster);
    }

    /// Fire `connect` for `identity`, then `update` with `roster`.
    pub fn client_connected(&self, roster: &[Identity], identity: &Identity) {
        invoke(EventKind::Connect, &self.connect, identity);
        self.updated(roster);
    }

    /// Fire `disconnect` for `identity`, then `update` with `roster`.
    pub fn client_disconnected(&self, roster: &[Identity], identity: &Identity) {
        invoke(EventKind::Disconnect, &self.disconnect, identity);
        self.updated(roster);
    }

    pub fn message(&self, delivery: &Delivery) {
        invoke(EventKind::Message, &self.message, delivery);
    }

    pub fn error(&self, fault: &Fault) {
        invoke(EventKind::Error, &self.error, fault);
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("update", &self.update.len())
            .field("connect", &self.connect.len())
            .field("disconnect", &self.disconnect.len())
            .field("error", &self.error.len())
            .field("message", &self.message.len())
            .finish()
    }
}

fn invoke<T: ?Sized>(kind: EventKind, handlers: &[Handler<T>], payload: &T) {
    for (index, handler) in handlers.iter().enumerate() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            warn!(event = %kind, index, "event handler panicked: {}", panic_message(panic.as_ref()));
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
