//! In-memory broker implementation for testing and local development.
//!
//! This provider is a complete, process-local broker:
//! - Queues deliver each message once, highest priority first, FIFO within a
//!   priority
//! - Topics fan each published message out to every open topic handle
//! - Message TTL is honoured on receive
//! - Remote hosts are reachable only when registered with
//!   [`InMemoryBroker::with_remote_host`]
//!
//! It also keeps call counters ([`BrokerStats`]) and the last connection
//! request, which makes it a convenient test double for code built on this
//! crate.

use crate::config::ProviderConnectionParams;
use crate::error::BrokerError;
use crate::message::{DestinationName, Message, MessageId, ReceivedMessage, Timestamp};
use crate::options::ParamMap;
use crate::provider::{BrokerProvider, DestinationKind, HandleKind, ProviderHandle, SessionMode};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const PROVIDER_NAME: &str = "in-memory";

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Everything the broker knows, guarded by one lock
#[derive(Default)]
struct BrokerState {
    available: bool,
    remote_hosts: HashSet<String>,
    handles: HashMap<String, HandleEntry>,
    queues: HashMap<DestinationName, VecDeque<StoredMessage>>,
    /// Per-handle inbox of topic subscriptions
    subscriptions: HashMap<String, VecDeque<StoredMessage>>,
    last_connection_params: Option<ProviderConnectionParams>,
    stats: BrokerStats,
}

/// What a live handle refers to
enum HandleEntry {
    Connection,
    Session {
        connection: String,
        mode: SessionMode,
    },
    Destination {
        connection: String,
        name: DestinationName,
        kind: DestinationKind,
    },
}

/// A message held by the broker
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    destination: DestinationName,
    message: Message,
    enqueued_at: Timestamp,
    expires_at: Option<Timestamp>,
}

impl StoredMessage {
    fn new(destination: DestinationName, message: &Message) -> Self {
        let now = Timestamp::now();
        let expires_at = message.time_to_live.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| Timestamp::from_datetime(now.as_datetime() + ttl))
        });

        Self {
            message_id: MessageId::new(),
            destination,
            message: message.clone(),
            enqueued_at: now,
            expires_at,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .as_ref()
            .map(|expires_at| Timestamp::now() >= *expires_at)
            .unwrap_or(false)
    }

    fn priority(&self) -> u8 {
        self.message.priority.unwrap_or(4)
    }

    fn into_received(self) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message_id,
            destination: self.destination,
            body: self.message.body,
            properties: self.message.properties,
            correlation_id: self.message.correlation_id,
            priority: self.message.priority,
            enqueued_at: self.enqueued_at,
            delivered_at: Timestamp::now(),
        }
    }
}

/// Insert behind every message of equal or higher priority
fn enqueue(inbox: &mut VecDeque<StoredMessage>, stored: StoredMessage) {
    let position = inbox
        .iter()
        .position(|existing| existing.priority() < stored.priority())
        .unwrap_or(inbox.len());
    inbox.insert(position, stored);
}

/// Pop the next unexpired message, discarding expired ones on the way
fn dequeue(inbox: &mut VecDeque<StoredMessage>) -> Option<StoredMessage> {
    while let Some(stored) = inbox.pop_front() {
        if !stored.is_expired() {
            return Some(stored);
        }
    }
    None
}

/// Counters of provider calls that succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub destinations_created: u64,
    pub destinations_closed: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// Process-local broker implementing [`BrokerProvider`]
pub struct InMemoryBroker {
    state: RwLock<BrokerState>,
    next_handle: AtomicU64,
    arrivals: Notify,
}

impl InMemoryBroker {
    /// Broker that accepts local connections only
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BrokerState {
                available: true,
                ..BrokerState::default()
            }),
            next_handle: AtomicU64::new(1),
            arrivals: Notify::new(),
        }
    }

    /// Also accept connections addressed to `host` (any port)
    pub fn with_remote_host(self, host: impl Into<String>) -> Self {
        self.write().remote_hosts.insert(host.into());
        self
    }

    /// Simulate the broker going down or coming back; affects new connections
    pub fn set_available(&self, available: bool) {
        self.write().available = available;
    }

    pub fn stats(&self) -> BrokerStats {
        self.read().stats.clone()
    }

    /// The request received by the most recent successful `create_connection`
    pub fn last_connection_params(&self) -> Option<ProviderConnectionParams> {
        self.read().last_connection_params.clone()
    }

    /// Number of live connection handles
    pub fn open_connections(&self) -> usize {
        self.read()
            .handles
            .values()
            .filter(|entry| matches!(entry, HandleEntry::Connection))
            .count()
    }

    /// Messages waiting on a queue
    pub fn queue_depth(&self, name: &DestinationName) -> usize {
        self.read().queues.get(name).map(VecDeque::len).unwrap_or(0)
    }

    fn read(&self) -> RwLockReadGuard<'_, BrokerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BrokerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn mint_handle(&self, kind: HandleKind) -> ProviderHandle {
        let prefix = match kind {
            HandleKind::Connection => "conn",
            HandleKind::Session => "session",
            HandleKind::Destination => "dest",
        };
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        ProviderHandle::new(format!("{}-{}", prefix, id), kind)
    }

    /// Take the next message for `destination`, if any
    fn try_take(
        &self,
        connection: &ProviderHandle,
        destination: &ProviderHandle,
    ) -> Result<Option<ReceivedMessage>, BrokerError> {
        let mut state = self.write();
        ensure_connection(&state, connection)?;
        let (name, kind) = destination_entry(&state, destination)?;

        let taken = match kind {
            DestinationKind::Queue => state.queues.get_mut(&name).and_then(dequeue),
            DestinationKind::Topic => state
                .subscriptions
                .get_mut(destination.id())
                .and_then(dequeue),
        };

        if taken.is_some() {
            state.stats.messages_received += 1;
        }
        Ok(taken.map(StoredMessage::into_received))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn handle_not_found(handle: &ProviderHandle) -> BrokerError {
    BrokerError::ProviderError {
        provider: PROVIDER_NAME.to_string(),
        code: "HandleNotFound".to_string(),
        message: format!("no live handle {}", handle),
    }
}

fn ensure_connection(state: &BrokerState, connection: &ProviderHandle) -> Result<(), BrokerError> {
    match state.handles.get(connection.id()) {
        Some(HandleEntry::Connection) => Ok(()),
        _ => Err(BrokerError::ConnectionClosed {
            connection_id: connection.id().to_string(),
        }),
    }
}

fn destination_entry(
    state: &BrokerState,
    destination: &ProviderHandle,
) -> Result<(DestinationName, DestinationKind), BrokerError> {
    match state.handles.get(destination.id()) {
        Some(HandleEntry::Destination { name, kind, .. }) => Ok((name.clone(), *kind)),
        _ => Err(handle_not_found(destination)),
    }
}

#[async_trait]
impl BrokerProvider for InMemoryBroker {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn create_connection(
        &self,
        params: &ProviderConnectionParams,
    ) -> Result<ProviderHandle, BrokerError> {
        let mut state = self.write();

        if !state.available {
            return Err(BrokerError::BrokerUnavailable {
                provider: PROVIDER_NAME.to_string(),
                message: "broker is not accepting connections".to_string(),
            });
        }

        if let Some(remote) = &params.remote {
            if !state.remote_hosts.contains(&remote.host) {
                return Err(BrokerError::BrokerUnavailable {
                    provider: PROVIDER_NAME.to_string(),
                    message: format!(
                        "cannot reach {} (reconnect attempts: {})",
                        remote, params.reconnect.max_attempts
                    ),
                });
            }
        }

        let handle = self.mint_handle(HandleKind::Connection);
        state
            .handles
            .insert(handle.id().to_string(), HandleEntry::Connection);
        state.last_connection_params = Some(params.clone());
        state.stats.connections_created += 1;

        debug!(handle = %handle, "In-memory broker accepted connection");
        Ok(handle)
    }

    async fn create_session(
        &self,
        connection: &ProviderHandle,
        mode: SessionMode,
    ) -> Result<ProviderHandle, BrokerError> {
        let mut state = self.write();
        ensure_connection(&state, connection)?;

        let handle = self.mint_handle(HandleKind::Session);
        state.handles.insert(
            handle.id().to_string(),
            HandleEntry::Session {
                connection: connection.id().to_string(),
                mode,
            },
        );
        state.stats.sessions_created += 1;
        Ok(handle)
    }

    async fn create_destination(
        &self,
        connection: &ProviderHandle,
        name: &DestinationName,
        kind: DestinationKind,
        _params: &ParamMap,
    ) -> Result<ProviderHandle, BrokerError> {
        let mut state = self.write();
        ensure_connection(&state, connection)?;

        let handle = self.mint_handle(HandleKind::Destination);
        match kind {
            DestinationKind::Queue => {
                state.queues.entry(name.clone()).or_default();
            }
            DestinationKind::Topic => {
                state
                    .subscriptions
                    .insert(handle.id().to_string(), VecDeque::new());
            }
        }
        state.handles.insert(
            handle.id().to_string(),
            HandleEntry::Destination {
                connection: connection.id().to_string(),
                name: name.clone(),
                kind,
            },
        );
        state.stats.destinations_created += 1;
        Ok(handle)
    }

    async fn send(
        &self,
        connection: &ProviderHandle,
        destination: &ProviderHandle,
        message: &Message,
    ) -> Result<MessageId, BrokerError> {
        let message_id = {
            let mut state = self.write();
            ensure_connection(&state, connection)?;
            let (name, kind) = destination_entry(&state, destination)?;

            let stored = StoredMessage::new(name.clone(), message);
            let message_id = stored.message_id.clone();

            match kind {
                DestinationKind::Queue => {
                    enqueue(state.queues.entry(name).or_default(), stored);
                }
                DestinationKind::Topic => {
                    let subscribers: Vec<String> = state
                        .handles
                        .iter()
                        .filter_map(|(id, entry)| match entry {
                            HandleEntry::Destination {
                                name: topic,
                                kind: DestinationKind::Topic,
                                ..
                            } if *topic == name => Some(id.clone()),
                            _ => None,
                        })
                        .collect();

                    for subscriber in subscribers {
                        if let Some(inbox) = state.subscriptions.get_mut(&subscriber) {
                            enqueue(inbox, stored.clone());
                        }
                    }
                }
            }

            state.stats.messages_sent += 1;
            message_id
        };

        self.arrivals.notify_waiters();
        Ok(message_id)
    }

    async fn receive(
        &self,
        connection: &ProviderHandle,
        destination: &ProviderHandle,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(received) = self.try_take(connection, destination)? {
                return Ok(Some(received));
            }

            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                // A handle closed at the deadline still reports as closed
                return self.try_take(connection, destination);
            }
        }
    }

    async fn commit(&self, session: &ProviderHandle) -> Result<(), BrokerError> {
        let mut state = self.write();
        match state.handles.get(session.id()) {
            Some(HandleEntry::Session {
                mode: SessionMode::Transacted,
                ..
            }) => {
                state.stats.commits += 1;
                Ok(())
            }
            _ => Err(handle_not_found(session)),
        }
    }

    async fn rollback(&self, session: &ProviderHandle) -> Result<(), BrokerError> {
        let mut state = self.write();
        match state.handles.get(session.id()) {
            Some(HandleEntry::Session {
                mode: SessionMode::Transacted,
                ..
            }) => {
                state.stats.rollbacks += 1;
                Ok(())
            }
            _ => Err(handle_not_found(session)),
        }
    }

    fn close(&self, handle: &ProviderHandle) -> Result<(), BrokerError> {
        {
            let mut state = self.write();
            let entry = state
                .handles
                .remove(handle.id())
                .ok_or_else(|| handle_not_found(handle))?;

            match entry {
                HandleEntry::Connection => {
                    state.stats.connections_closed += 1;
                    // Children of a closed connection are released with it
                    let children: Vec<String> = state
                        .handles
                        .iter()
                        .filter_map(|(id, entry)| match entry {
                            HandleEntry::Session { connection, .. }
                            | HandleEntry::Destination { connection, .. }
                                if connection == handle.id() =>
                            {
                                Some(id.clone())
                            }
                            _ => None,
                        })
                        .collect();
                    for child in children {
                        state.handles.remove(&child);
                        state.subscriptions.remove(&child);
                    }
                }
                HandleEntry::Session { .. } => state.stats.sessions_closed += 1,
                HandleEntry::Destination { kind, .. } => {
                    if kind == DestinationKind::Topic {
                        state.subscriptions.remove(handle.id());
                    }
                    state.stats.destinations_closed += 1;
                }
            }
        }

        // Wake receivers blocked on the released handle
        self.arrivals.notify_waiters();
        debug!(handle = %handle, "In-memory broker released handle");
        Ok(())
    }
}
