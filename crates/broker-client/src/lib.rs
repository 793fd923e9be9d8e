//! # Broker Client
//!
//! Client-side connection management for message brokers.
//!
//! This library provides:
//! - Connections to a local or remote broker, opened explicitly or scoped to
//!   an async block
//! - Sessions, queues and topics derived from a connection, each released
//!   exactly once
//! - Validation and translation of untyped option bags before any broker call
//! - A process-wide default connection with lazy initialisation
//! - An in-memory broker for tests and local development
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all broker operations
//! - [`options`] - Option sets and provider parameter translation
//! - [`config`] - Connection configuration and layered loading
//! - [`provider`] - The provider trait and handle types
//! - [`connection`] - Connections and their factories
//! - [`session`] / [`destination`] - Handles derived from a connection
//! - [`shared`] - The default shared connection
//! - [`providers`] - Provider implementations
//!
//! ## Example
//!
//! ```no_run
//! use broker_client::{Connection, ConnectionConfig, DestinationOptions, InMemoryBroker, Message, SendOptions};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), broker_client::BrokerError> {
//! let provider = Arc::new(InMemoryBroker::new());
//! let connection = Connection::open(provider, ConnectionConfig::local()).await?;
//! let orders = connection.queue("orders", DestinationOptions::new()).await?;
//! orders.send(Message::new("hello"), SendOptions::new()).await?;
//! connection.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod destination;
pub mod error;
pub mod message;
pub mod options;
pub mod provider;
pub mod providers;
pub mod session;
pub mod shared;

pub use config::{
    ConnectionConfig, ProviderConnectionParams, ReconnectPolicy, RemoteAddress,
    DEFAULT_BROKER_PORT,
};
pub use connection::{Connection, ConnectionId, ConnectionRef, ScopedFuture};
pub use destination::{Destination, DestinationOptions, SendOptions};
pub use error::{BrokerError, ConfigurationError, OptionError, ValidationError};
pub use message::{DestinationName, Message, MessageId, ReceivedMessage, Timestamp};
pub use options::{
    OptionKind, OptionSet, OptionSpec, ParamMap, ParamValue, RawOptions, CONNECTION_OPTIONS,
    DESTINATION_OPTIONS, SEND_OPTIONS, SESSION_OPTIONS,
};
pub use provider::{BrokerProvider, DestinationKind, HandleKind, ProviderHandle, SessionMode};
pub use providers::{BrokerStats, InMemoryBroker};
pub use session::Session;
pub use shared::{default_connection, shutdown_default_connection, SharedConnection};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
