//! Connections to a broker and the factories derived from them.
//!
//! A [`Connection`] exclusively owns one provider connection handle. It is
//! released exactly once: by [`Connection::close`], at the end of
//! [`Connection::scoped`], or when the value is dropped, whichever happens
//! first. Sessions and destinations created from a connection hold a
//! [`ConnectionRef`], a non-owning association that observes the connection's
//! state but never closes it.
//!
//! Closing a connection while one of its factory calls is still in flight on
//! another task is a race the caller must prevent.

use crate::config::ConnectionConfig;
use crate::destination::{Destination, DestinationOptions};
use crate::error::{BrokerError, OptionError};
use crate::options::{OptionSet, RawOptions, DESTINATION_OPTIONS, SESSION_OPTIONS};
use crate::provider::{BrokerProvider, DestinationKind, ProviderHandle, SessionMode};
use crate::session::Session;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;

/// Future returned by the body of a scoped block
pub type ScopedFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Identifier assigned to each connection for logs and errors
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State shared between a connection and everything derived from it
struct ConnectionState {
    id: ConnectionId,
    provider: Arc<dyn BrokerProvider>,
    handle: ProviderHandle,
    closed: AtomicBool,
}

impl ConnectionState {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::ConnectionClosed {
                connection_id: self.id.to_string(),
            });
        }
        Ok(())
    }

    /// Close the provider handle unless some caller already did
    fn release(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!(
            connection_id = %self.id,
            provider = self.provider.name(),
            "Closing broker connection"
        );
        self.provider.close(&self.handle)
    }
}

/// Non-owning association with a [`Connection`]
///
/// Cloning is cheap. Dropping a `ConnectionRef` never closes the connection;
/// once the owning connection is closed every operation through a
/// `ConnectionRef` fails with [`BrokerError::ConnectionClosed`].
#[derive(Clone)]
pub struct ConnectionRef {
    state: Arc<ConnectionState>,
}

impl ConnectionRef {
    pub fn id(&self) -> &ConnectionId {
        &self.state.id
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// True when both refer to the same underlying connection
    pub fn same_connection(&self, other: &ConnectionRef) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn ensure_open(&self) -> Result<(), BrokerError> {
        self.state.ensure_open()
    }

    pub(crate) fn provider(&self) -> &Arc<dyn BrokerProvider> {
        &self.state.provider
    }

    pub(crate) fn handle(&self) -> &ProviderHandle {
        &self.state.handle
    }
}

impl PartialEq for ConnectionRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_connection(other)
    }
}

impl Eq for ConnectionRef {}

impl std::fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRef")
            .field("id", &self.state.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Option sets a connection consults for its untyped factory methods
#[derive(Debug, Clone, Copy)]
struct FactoryOptions {
    session: &'static OptionSet,
    destination: &'static OptionSet,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            session: &SESSION_OPTIONS,
            destination: &DESTINATION_OPTIONS,
        }
    }
}

/// An open connection to a broker
pub struct Connection {
    state: Arc<ConnectionState>,
    options: FactoryOptions,
}

impl Connection {
    /// Open a connection with the given configuration.
    ///
    /// Out-of-range values fail with [`BrokerError::InvalidOption`] before
    /// the provider is called. Provider failures (unreachable host, exhausted reconnect budget) are
    /// returned unchanged, normally as [`BrokerError::BrokerUnavailable`].
    pub async fn open(
        provider: Arc<dyn BrokerProvider>,
        config: ConnectionConfig,
    ) -> Result<Self, BrokerError> {
        config.validate()?;
        let params = config.resolve();
        let handle = provider.create_connection(&params).await?;

        let id = ConnectionId::new();
        info!(
            connection_id = %id,
            provider = provider.name(),
            remote = ?params.remote,
            client_id = ?params.client_id,
            "Opened broker connection"
        );

        Ok(Self {
            state: Arc::new(ConnectionState {
                id,
                provider,
                handle,
                closed: AtomicBool::new(false),
            }),
            options: FactoryOptions::default(),
        })
    }

    /// Open a connection from untyped options.
    ///
    /// Unrecognized keys fail with [`BrokerError::InvalidOption`] before the
    /// provider is contacted.
    pub async fn open_with_options(
        provider: Arc<dyn BrokerProvider>,
        options: &RawOptions,
    ) -> Result<Self, BrokerError> {
        let config = ConnectionConfig::from_options(options)?;
        Self::open(provider, config).await
    }

    /// Open a connection, run `body` with it, and close it on every exit path.
    ///
    /// A failure from `body` is returned after the connection has been
    /// closed; a close failure in that case is logged and dropped. If `body`
    /// succeeds, a close failure becomes the result.
    pub async fn scoped<F, T, E>(
        provider: Arc<dyn BrokerProvider>,
        config: ConnectionConfig,
        body: F,
    ) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c Connection) -> ScopedFuture<'c, T, E>,
        E: From<BrokerError>,
    {
        let connection = Self::open(provider, config).await?;
        let result = body(&connection).await;
        let closed = connection.close();
        finish_scope("connection", result, closed)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.state.id
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Non-owning association to hand to destinations and sessions
    pub fn reference(&self) -> ConnectionRef {
        ConnectionRef {
            state: Arc::clone(&self.state),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.state.provider.name()
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    pub async fn create_session(&self, mode: SessionMode) -> Result<Session, BrokerError> {
        self.state.ensure_open()?;
        Session::open(self.reference(), mode).await
    }

    /// Create a session in the default (auto-acknowledge) mode
    pub async fn create_default_session(&self) -> Result<Session, BrokerError> {
        self.create_session(SessionMode::default()).await
    }

    /// Create a session from untyped options (`mode`)
    pub async fn create_session_with_options(
        &self,
        options: &RawOptions,
    ) -> Result<Session, BrokerError> {
        let params = self.options.session.translate(options)?;
        let mode = match params.get_str("sessionMode") {
            Some(mode) => mode.parse().map_err(|_| OptionError::InvalidValue {
                key: "mode".to_string(),
                expected: "one of auto_ack, client_ack, dups_ok, transacted".to_string(),
            })?,
            None => SessionMode::default(),
        };
        self.create_session(mode).await
    }

    /// Create a session, run `body` with it, and close it on every exit path
    pub async fn with_session<F, T, E>(&self, mode: SessionMode, body: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s Session) -> ScopedFuture<'s, T, E>,
        E: From<BrokerError>,
    {
        let session = self.create_session(mode).await?;
        let result = body(&session).await;
        let closed = session.close();
        finish_scope("session", result, closed)
    }

    // ------------------------------------------------------------------------
    // Destinations
    // ------------------------------------------------------------------------

    /// Create a queue handle bound to this connection.
    ///
    /// Any connection set in `options` is replaced by this one.
    pub async fn queue(
        &self,
        name: &str,
        options: DestinationOptions,
    ) -> Result<Destination, BrokerError> {
        self.destination(name, DestinationKind::Queue, options).await
    }

    /// Create a topic handle bound to this connection.
    ///
    /// Any connection set in `options` is replaced by this one.
    pub async fn topic(
        &self,
        name: &str,
        options: DestinationOptions,
    ) -> Result<Destination, BrokerError> {
        self.destination(name, DestinationKind::Topic, options).await
    }

    pub async fn queue_with_options(
        &self,
        name: &str,
        options: &RawOptions,
    ) -> Result<Destination, BrokerError> {
        let options = DestinationOptions::from_params(&self.options.destination.translate(options)?);
        self.queue(name, options).await
    }

    pub async fn topic_with_options(
        &self,
        name: &str,
        options: &RawOptions,
    ) -> Result<Destination, BrokerError> {
        let options = DestinationOptions::from_params(&self.options.destination.translate(options)?);
        self.topic(name, options).await
    }

    /// Create a queue handle, run `body` with it, and close it on every exit path
    pub async fn with_queue<F, T, E>(
        &self,
        name: &str,
        options: DestinationOptions,
        body: F,
    ) -> Result<T, E>
    where
        F: for<'d> FnOnce(&'d Destination) -> ScopedFuture<'d, T, E>,
        E: From<BrokerError>,
    {
        let queue = self.queue(name, options).await?;
        let result = body(&queue).await;
        let closed = queue.close();
        finish_scope("queue", result, closed)
    }

    /// Create a topic handle, run `body` with it, and close it on every exit path
    pub async fn with_topic<F, T, E>(
        &self,
        name: &str,
        options: DestinationOptions,
        body: F,
    ) -> Result<T, E>
    where
        F: for<'d> FnOnce(&'d Destination) -> ScopedFuture<'d, T, E>,
        E: From<BrokerError>,
    {
        let topic = self.topic(name, options).await?;
        let result = body(&topic).await;
        let closed = topic.close();
        finish_scope("topic", result, closed)
    }

    async fn destination(
        &self,
        name: &str,
        kind: DestinationKind,
        mut options: DestinationOptions,
    ) -> Result<Destination, BrokerError> {
        self.state.ensure_open()?;

        if let Some(other) = options.connection.as_ref() {
            if !other.same_connection(&self.reference()) {
                debug!(
                    connection_id = %self.state.id,
                    overridden = %other.id(),
                    "Replacing caller-supplied connection on {} options",
                    kind
                );
            }
        }
        options.connection = Some(self.reference());

        Destination::open(name, kind, options).await
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Release the provider handle.
    ///
    /// Later calls return `Ok(())` without contacting the provider, including
    /// calls racing from other threads.
    pub fn close(&self) -> Result<(), BrokerError> {
        self.state.release()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.state.release() {
            warn!(
                connection_id = %self.state.id,
                error = %err,
                "Failed to close broker connection on drop"
            );
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.state.id)
            .field("provider", &self.state.provider.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Combine the outcome of a scoped body with the outcome of closing its resource
pub(crate) fn finish_scope<T, E>(
    resource: &str,
    result: Result<T, E>,
    closed: Result<(), BrokerError>,
) -> Result<T, E>
where
    E: From<BrokerError>,
{
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err.into()),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(
                resource,
                error = %close_err,
                "Suppressing close failure after scoped block failed"
            );
            Err(err)
        }
    }
}
