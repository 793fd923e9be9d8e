//! The broker provider boundary and the types that cross it.
//!
//! A [`BrokerProvider`] is the broker engine seen from the client: it creates
//! connection, session and destination handles and moves messages. Everything
//! above this trait (option handling, ownership, release guarantees) lives in
//! this crate; everything below it (transport, reconnect loops, storage) is the
//! provider's business.

use crate::config::ProviderConnectionParams;
use crate::error::{BrokerError, ValidationError};
use crate::message::{DestinationName, Message, MessageId, ReceivedMessage};
use crate::options::ParamMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;

/// What a provider handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Connection,
    Session,
    Destination,
}

/// Opaque reference to a resource owned by the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderHandle {
    id: String,
    kind: HandleKind,
}

impl ProviderHandle {
    pub fn new(id: impl Into<String>, kind: HandleKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl std::fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.id)
    }
}

/// Destination flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// Point-to-point: each message is consumed once
    Queue,
    /// Publish/subscribe: each subscriber sees every message
    Topic,
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queue => write!(f, "queue"),
            Self::Topic => write!(f, "topic"),
        }
    }
}

/// Acknowledgement / transaction mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionMode {
    #[default]
    #[serde(rename = "auto_ack")]
    AutoAcknowledge,
    #[serde(rename = "client_ack")]
    ClientAcknowledge,
    #[serde(rename = "dups_ok")]
    DupsOkAcknowledge,
    #[serde(rename = "transacted")]
    Transacted,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoAcknowledge => "auto_ack",
            Self::ClientAcknowledge => "client_ack",
            Self::DupsOkAcknowledge => "dups_ok",
            Self::Transacted => "transacted",
        }
    }

    pub fn is_transacted(&self) -> bool {
        matches!(self, Self::Transacted)
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_ack" => Ok(Self::AutoAcknowledge),
            "client_ack" => Ok(Self::ClientAcknowledge),
            "dups_ok" => Ok(Self::DupsOkAcknowledge),
            "transacted" => Ok(Self::Transacted),
            other => Err(ValidationError::InvalidFormat {
                field: "mode".to_string(),
                message: format!(
                    "'{}' is not one of auto_ack, client_ack, dups_ok, transacted",
                    other
                ),
            }),
        }
    }
}

/// Interface implemented by broker engines
///
/// Creation and messaging calls are async and may block on the network for as
/// long as the provider's own timeouts and reconnect policy allow. `close` is
/// synchronous so that owned handles can be released from `Drop`. Callers in
/// this crate invoke `close` at most once per handle they own.
#[async_trait]
pub trait BrokerProvider: Send + Sync {
    /// Provider name used in logs and errors
    fn name(&self) -> &str;

    /// Establish a connection; failures surface as
    /// [`BrokerError::BrokerUnavailable`]
    async fn create_connection(
        &self,
        params: &ProviderConnectionParams,
    ) -> Result<ProviderHandle, BrokerError>;

    async fn create_session(
        &self,
        connection: &ProviderHandle,
        mode: SessionMode,
    ) -> Result<ProviderHandle, BrokerError>;

    async fn create_destination(
        &self,
        connection: &ProviderHandle,
        name: &DestinationName,
        kind: DestinationKind,
        params: &ParamMap,
    ) -> Result<ProviderHandle, BrokerError>;

    /// Send (queue) or publish (topic) a message
    async fn send(
        &self,
        connection: &ProviderHandle,
        destination: &ProviderHandle,
        message: &Message,
    ) -> Result<MessageId, BrokerError>;

    /// Wait up to `timeout` for the next message
    async fn receive(
        &self,
        connection: &ProviderHandle,
        destination: &ProviderHandle,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, BrokerError>;

    async fn commit(&self, session: &ProviderHandle) -> Result<(), BrokerError>;

    async fn rollback(&self, session: &ProviderHandle) -> Result<(), BrokerError>;

    /// Release a handle.
    ///
    /// Releasing a connection also releases the sessions and destinations
    /// created on it; callers do not close those afterwards.
    fn close(&self, handle: &ProviderHandle) -> Result<(), BrokerError>;
}
