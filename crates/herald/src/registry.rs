// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live subscriber registry.
//!
//! Maps a generated [`ConnectionId`] to the subscriber's identity attributes
//! and its socket. The reactor is the only writer, so the registry is a plain
//! owned value with no interior locking. Removing an entry drops its socket,
//! which closes the connection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::identity::Identity;

/// Opaque connection handle. Unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client_{}", self.0)
    }
}

/// Errors returned by registry mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    NotFound(ConnectionId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "connection {id} is not registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// A registered subscriber.
#[derive(Debug)]
pub struct Entry<S> {
    pub identity: Identity,
    pub socket: S,
}

/// Subscriber registry, generic over the socket type so routing logic can be
/// exercised without real connections.
#[derive(Debug)]
pub struct Registry<S> {
    identity_key: String,
    entries: IndexMap<ConnectionId, Entry<S>>,
}

impl<S> Registry<S> {
    /// Create an empty registry that addresses subscribers by `identity_key`.
    pub fn new(identity_key: impl Into<String>) -> Self {
        Self { identity_key: identity_key.into(), entries: IndexMap::new() }
    }

    pub fn identity_key(&self) -> &str {
        &self.identity_key
    }

    /// Store a new subscriber and return its freshly generated handle.
    pub fn add(&mut self, identity: Identity, socket: S) -> ConnectionId {
        let id = ConnectionId::next();
        self.entries.insert(id, Entry { identity, socket });
        id
    }

    /// Remove a subscriber, returning its identity. The socket is dropped.
    pub fn remove(&mut self, id: ConnectionId) -> Result<Identity, RegistryError> {
        self.entries
            .shift_remove(&id)
            .map(|entry| entry.identity)
            .ok_or(RegistryError::NotFound(id))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identity(&self, id: ConnectionId) -> Option<&Identity> {
        self.entries.get(&id).map(|entry| &entry.identity)
    }

    pub fn socket(&self, id: ConnectionId) -> Option<&S> {
        self.entries.get(&id).map(|entry| &entry.socket)
    }

    pub fn socket_mut(&mut self, id: ConnectionId) -> Option<&mut S> {
        self.entries.get_mut(&id).map(|entry| &mut entry.socket)
    }

    /// Handles of every registered subscriber, in registration order.
    pub fn all_sockets(&self) -> Vec<ConnectionId> {
        self.entries.keys().copied().collect()
    }

    /// Identities of every registered subscriber, in registration order.
    pub fn all_identities(&self) -> Vec<Identity> {
        self.entries.values().map(|entry| entry.identity.clone()).collect()
    }

    /// Handles whose identity key equals `value`.
    pub fn sockets_by_identity(&self, value: &str) -> Vec<ConnectionId> {
        self.matching(value).map(|(id, _)| *id).collect()
    }

    /// Identities whose identity key equals `value`.
    pub fn attributes_by_identity(&self, value: &str) -> Vec<Identity> {
        self.matching(value).map(|(_, entry)| entry.identity.clone()).collect()
    }

    /// Iterate over every entry in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Entry<S>)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Remove every entry, closing all sockets. Returns the removed count.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    fn matching<'a>(
        &'a self,
        value: &'a str,
    ) -> impl Iterator<Item = (&'a ConnectionId, &'a Entry<S>)> + 'a {
        self.entries.iter().filter(move |(_, entry)| entry.identity.matches(&self.identity_key, value))
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
