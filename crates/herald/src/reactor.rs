// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The broker's readiness loop.
//!
//! One task owns the listener, the registry and the event bus. Each
//! [`Broker::pass`] waits briefly for the listener or any subscriber socket
//! to become ready, admits at most one new connection, then probes every
//! subscriber that was registered when the pass began. Faults never escape a
//! pass: malformed input is dropped, socket failures on subscribers become
//! disconnects, and anything else (a panic included) is raised as `error`.

use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ListenConfig;
use crate::envelope::{Envelope, Target};
use crate::error::{Fault, FaultKind};
use crate::event::{Delivery, EventBus};
use crate::frame::encode_text_frame;
use crate::handshake::{build_upgrade_response, compute_accept_token};
use crate::identity::Identity;
use crate::inbound::{is_complete, Classifier, Inbound};
use crate::registry::{ConnectionId, Registry};

/// Scratch buffer size for liveness probes. Subscriber input is discarded.
const PROBE_BUF: usize = 4096;

/// Read size for a new connection's first bytes.
const READ_CHUNK: usize = 8 * 1024;

/// How the single admitted connection of a pass was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Handshake completed and the subscriber was registered.
    Subscribed(ConnectionId),
    /// An envelope was routed. `targets` subscribers were addressed and
    /// `delivered` of them were written successfully.
    Published { targets: usize, delivered: usize },
    /// The connection was closed without being registered.
    Dropped(FaultKind),
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub admitted: Option<Admission>,
    pub evicted: Vec<ConnectionId>,
}

/// Values the upgrade response advertises.
#[derive(Debug, Clone)]
struct Advertised {
    host: String,
    path: String,
    secure: bool,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    poll: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    max_request_bytes: usize,
}

/// Listening role: accepts subscribers and publishers on one port and routes
/// publishes to subscribers.
pub struct Broker {
    listener: TcpListener,
    registry: Registry<TcpStream>,
    events: EventBus,
    classifier: Classifier,
    advertised: Advertised,
    timing: Timing,
    /// Makes the next pass panic once it starts.
    #[cfg(test)]
    fail_next_pass: bool,
}

impl Broker {
    /// Bind the configured address and build a broker around it.
    pub async fn bind(config: &ListenConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let endpoint = config.bind_endpoint();
        let listener = TcpListener::bind((endpoint.host.as_str(), endpoint.port)).await?;
        Self::with_listener(listener, config)
    }

    /// Build a broker around an already bound listener.
    pub fn with_listener(listener: TcpListener, config: &ListenConfig) -> anyhow::Result<Self> {
        let prefix = config.path_prefix().to_owned();
        Ok(Self {
            listener,
            registry: Registry::new(config.identity_key.clone()),
            events: EventBus::new(),
            classifier: Classifier::new(prefix.clone(), config.identity_key.clone())?,
            advertised: Advertised { host: config.host.clone(), path: prefix, secure: config.secure },
            timing: Timing {
                poll: config.poll_interval(),
                read_timeout: config.read_timeout(),
                write_timeout: config.write_timeout(),
                max_request_bytes: config.max_request_bytes(),
            },
            #[cfg(test)]
            fail_next_pass: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Register lifecycle handlers here before running.
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn registry(&self) -> &Registry<TcpStream> {
        &self.registry
    }

    /// Run passes until `shutdown` is cancelled, then close every subscriber.
    pub async fn run(mut self, shutdown: CancellationToken) {
        match self.local_addr() {
            Ok(addr) => info!(%addr, "herald listening"),
            Err(e) => warn!("herald listening on unknown address: {e}"),
        }
        while !shutdown.is_cancelled() {
            self.pass().await;
        }
        let closed = self.registry.clear();
        info!(closed, "broker stopped");
    }

    /// Run exactly one pass.
    pub async fn pass(&mut self) -> PassOutcome {
        match AssertUnwindSafe(self.step()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                self.report(&Fault::from_panic(panic.as_ref()));
                PassOutcome::default()
            }
        }
    }

    async fn step(&mut self) -> PassOutcome {
        #[cfg(test)]
        self.fail_if_requested();

        let mut outcome = PassOutcome::default();
        let poll_set = self.registry.all_sockets();

        match self.wait_ready().await {
            Some(Ok((stream, peer))) => {
                let admission = self.admit(stream, peer, &mut outcome.evicted).await;
                outcome.admitted = Some(admission);
            }
            Some(Err(e)) => {
                warn!("accept failed: {e}");
                outcome.admitted = Some(Admission::Dropped(FaultKind::SocketFault));
            }
            None => {}
        }

        self.scan(&poll_set, &mut outcome.evicted);
        outcome
    }

    #[cfg(test)]
    #[allow(clippy::panic)]
    fn fail_if_requested(&mut self) {
        if std::mem::take(&mut self.fail_next_pass) {
            panic!("injected pass failure");
        }
    }

    /// Wait until the listener has a pending connection, any subscriber is
    /// readable, or the poll interval elapses. Only an accepted connection is
    /// returned; subscriber readiness is handled by the scan.
    async fn wait_ready(&self) -> Option<io::Result<(TcpStream, SocketAddr)>> {
        let subscribers = async {
            let mut readable: FuturesUnordered<_> =
                self.registry.iter().map(|(_, entry)| entry.socket.readable()).collect();
            if readable.is_empty() {
                std::future::pending::<()>().await;
            }
            let _ = readable.next().await;
        };

        tokio::select! {
            biased;
            accepted = self.listener.accept() => Some(accepted),
            _ = subscribers => None,
            _ = tokio::time::sleep(self.timing.poll) => None,
        }
    }

    async fn admit(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
        evicted: &mut Vec<ConnectionId>,
    ) -> Admission {
        let raw = match read_initial(&mut stream, self.timing).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(%peer, "dropping connection: {e:#}");
                return Admission::Dropped(FaultKind::SocketFault);
            }
        };

        match self.classifier.classify(&raw) {
            Inbound::Subscribe { identity, key } => self.subscribe(stream, peer, identity, &key).await,
            Inbound::Publish(envelope) => {
                drop(stream);
                self.publish(envelope, evicted).await
            }
            Inbound::Drop(fault) => {
                if fault.kind.is_reported() {
                    self.report(&fault);
                } else {
                    debug!(%peer, kind = %fault.kind, "dropping connection: {:#}", fault.error);
                }
                Admission::Dropped(fault.kind)
            }
        }
    }

    async fn subscribe(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
        identity: Identity,
        key: &str,
    ) -> Admission {
        let response = build_upgrade_response(
            &self.advertised.host,
            &self.advertised.path,
            self.advertised.secure,
            &compute_accept_token(key),
        );
        if let Err(e) = write_bounded(&mut stream, response.as_bytes(), self.timing.write_timeout).await {
            debug!(%peer, "handshake response failed: {e:#}");
            return Admission::Dropped(FaultKind::SocketFault);
        }

        let id = self.registry.add(identity.clone(), stream);
        info!(%peer, connection = %id, %identity, "subscriber connected");
        self.events.client_connected(&self.registry.all_identities(), &identity);
        Admission::Subscribed(id)
    }

    async fn publish(&mut self, envelope: Envelope, evicted: &mut Vec<ConnectionId>) -> Admission {
        let message = match envelope.payload() {
            Ok(message) => message,
            Err(e) => {
                debug!("dropping envelope: {e:#}");
                return Admission::Dropped(FaultKind::MalformedEnvelope);
            }
        };
        let (targets, identities) = self.resolve(&envelope.to);
        let frame = encode_text_frame(message.as_bytes());
        debug!(targets = targets.len(), bytes = frame.len(), "routing publish");
        self.events.message(&Delivery { targets: identities, message });

        let mut delivered = 0;
        let mut failed = Vec::new();
        for &id in &targets {
            let Some(socket) = self.registry.socket_mut(id) else {
                continue;
            };
            match write_bounded(socket, &frame, self.timing.write_timeout).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection = %id, "write to subscriber failed: {e:#}");
                    failed.push(id);
                }
            }
        }
        for id in failed {
            if self.evict(id) {
                evicted.push(id);
            }
        }

        Admission::Published { targets: targets.len(), delivered }
    }

    /// Resolve a publish target into subscriber handles and their identities.
    fn resolve(&self, to: &Target) -> (Vec<ConnectionId>, Vec<Identity>) {
        match to {
            Target::All => (self.registry.all_sockets(), self.registry.all_identities()),
            Target::Only(values) => {
                let mut ids = Vec::new();
                let mut identities = Vec::new();
                for value in values {
                    ids.extend(self.registry.sockets_by_identity(value));
                    identities.extend(self.registry.attributes_by_identity(value));
                }
                (ids, identities)
            }
        }
    }

    /// Probe each handle in `poll_set` that is still registered.
    fn scan(&mut self, poll_set: &[ConnectionId], evicted: &mut Vec<ConnectionId>) {
        let mut scratch = [0u8; PROBE_BUF];
        for &id in poll_set {
            let Some(socket) = self.registry.socket(id) else {
                continue;
            };
            if let Err(e) = probe(socket, &mut scratch) {
                debug!(connection = %id, "subscriber gone: {e:#}");
                if self.evict(id) {
                    evicted.push(id);
                }
            }
        }
    }

    /// Remove a subscriber and fire `disconnect` then `update`.
    fn evict(&mut self, id: ConnectionId) -> bool {
        match self.registry.remove(id) {
            Ok(identity) => {
                info!(connection = %id, %identity, "subscriber disconnected");
                self.events.client_disconnected(&self.registry.all_identities(), &identity);
                true
            }
            Err(e) => {
                self.report(&FaultKind::UnexpectedFault.fault(e));
                false
            }
        }
    }

    fn report(&self, fault: &Fault) {
        error!(kind = %fault.kind, "reactor fault: {:#}", fault.error);
        self.events.error(fault);
    }
}

/// Read a new connection's first bytes.
///
/// Stops at a complete request head or JSON object, at EOF, at the size
/// cap, or when the read timeout expires. Whatever arrived by then is
/// classified; nothing at all is an error.
///
/// The whole broker waits here, so a connection that sends nothing stalls
/// every subscriber for up to the read timeout. Keep `HERALD_READ_TIMEOUT_MS`
/// short where untrusted clients can reach the port.
async fn read_initial(stream: &mut TcpStream, timing: Timing) -> anyhow::Result<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + timing.read_timeout;
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    while buf.len() < timing.max_request_bytes {
        match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
            Err(_) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                buf.extend_from_slice(&chunk[..n]);
                if is_complete(&buf, n) {
                    break;
                }
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    anyhow::ensure!(!buf.is_empty(), "no data within {}ms", timing.read_timeout.as_millis());
    buf.truncate(timing.max_request_bytes);
    Ok(buf)
}

async fn write_bounded(stream: &mut TcpStream, bytes: &[u8], timeout: Duration) -> anyhow::Result<()> {
    match tokio::time::timeout(timeout, stream.write_all(bytes)).await {
        Ok(result) => Ok(result?),
        Err(_) => anyhow::bail!("write stalled for {}ms", timeout.as_millis()),
    }
}

/// Non-blocking liveness check. Data is read and discarded.
fn probe(socket: &TcpStream, scratch: &mut [u8]) -> anyhow::Result<()> {
    match socket.try_read(scratch) {
        Ok(0) => anyhow::bail!("closed by peer"),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "reactor_tests.rs"]
mod tests;
