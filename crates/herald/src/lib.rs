// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity-addressed WebSocket fan-out.
//!
//! Browsers subscribe by opening a WebSocket whose path encodes their
//! identity (`/user/42/tab/3`). Backend processes publish by connecting to
//! the same port and writing one JSON envelope. The broker forwards the
//! envelope's message to every subscriber whose identity matches.

pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod identity;
pub mod inbound;
pub mod notifier;
pub mod reactor;
pub mod registry;
pub mod test_support;

pub use notifier::Notifier;
pub use reactor::Broker;
