//! Process-wide default connection.
//!
//! Code that does not manage its own [`Connection`] can share one through
//! [`default_connection`]. The connection is opened lazily on first access;
//! concurrent first callers wait on the same initialisation, so the provider
//! sees exactly one `create_connection`. [`shutdown_default_connection`]
//! closes it again, after which the next access opens a fresh one.

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::BrokerError;
use crate::provider::BrokerProvider;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[cfg(test)]
#[path = "shared_tests.rs"]
mod tests;

/// The default connection used by [`default_connection`]
pub static DEFAULT_CONNECTION: SharedConnection = SharedConnection::new();

/// A lazily opened connection shared by many callers
pub struct SharedConnection {
    slot: Mutex<Option<Arc<Connection>>>,
}

impl SharedConnection {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::const_new(None),
        }
    }

    /// Return the shared connection, opening it with `provider` and `config`
    /// if there is none yet.
    ///
    /// Once a connection is open, later arguments are ignored. A connection
    /// that was closed through some other path is replaced.
    pub async fn get_or_open(
        &self,
        provider: Arc<dyn BrokerProvider>,
        config: ConnectionConfig,
    ) -> Result<Arc<Connection>, BrokerError> {
        let mut slot = self.slot.lock().await;

        if let Some(connection) = slot.as_ref() {
            if !connection.is_closed() {
                return Ok(Arc::clone(connection));
            }
            debug!(
                connection_id = %connection.id(),
                "Shared connection was closed, opening a new one"
            );
        }

        let connection = Arc::new(Connection::open(provider, config).await?);
        info!(connection_id = %connection.id(), "Opened shared connection");
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// The current connection, if one is open
    pub async fn current(&self) -> Option<Arc<Connection>> {
        self.slot
            .lock()
            .await
            .as_ref()
            .filter(|connection| !connection.is_closed())
            .cloned()
    }

    /// Close and forget the shared connection.
    ///
    /// Callers still holding the `Arc` see it as closed. Does nothing if no
    /// connection was ever opened.
    pub async fn shutdown(&self) -> Result<(), BrokerError> {
        let connection = self.slot.lock().await.take();

        match connection {
            Some(connection) => {
                info!(connection_id = %connection.id(), "Shutting down shared connection");
                connection.close()
            }
            None => Ok(()),
        }
    }
}

impl Default for SharedConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConnection").finish_non_exhaustive()
    }
}

/// The process-wide default connection: local broker, default options
pub async fn default_connection(
    provider: Arc<dyn BrokerProvider>,
) -> Result<Arc<Connection>, BrokerError> {
    DEFAULT_CONNECTION
        .get_or_open(provider, ConnectionConfig::local())
        .await
}

/// Tear down the process-wide default connection
pub async fn shutdown_default_connection() -> Result<(), BrokerError> {
    DEFAULT_CONNECTION.shutdown().await
}
