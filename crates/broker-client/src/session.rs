//! Sessions derived from a connection.

use crate::connection::ConnectionRef;
use crate::error::{BrokerError, ValidationError};
use crate::provider::{ProviderHandle, SessionMode};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

/// A session on a connection
///
/// The session owns its provider handle but not the connection; dropping or
/// closing a session leaves the connection open.
pub struct Session {
    mode: SessionMode,
    connection: ConnectionRef,
    handle: ProviderHandle,
    closed: AtomicBool,
}

impl Session {
    pub(crate) async fn open(
        connection: ConnectionRef,
        mode: SessionMode,
    ) -> Result<Self, BrokerError> {
        connection.ensure_open()?;

        let handle = connection
            .provider()
            .create_session(connection.handle(), mode)
            .await?;

        debug!(
            connection_id = %connection.id(),
            session = %handle,
            mode = %mode,
            "Created session"
        );

        Ok(Self {
            mode,
            connection,
            handle,
            closed: AtomicBool::new(false),
        })
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Commit the current transaction of a transacted session
    pub async fn commit(&self) -> Result<(), BrokerError> {
        self.ensure_transacted("commit")?;
        self.connection.provider().commit(&self.handle).await
    }

    /// Roll back the current transaction of a transacted session
    pub async fn rollback(&self) -> Result<(), BrokerError> {
        self.ensure_transacted("rollback")?;
        self.connection.provider().rollback(&self.handle).await
    }

    /// Release the provider session handle; later calls are no-ops
    pub fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if self.connection.is_closed() {
            // Released together with its connection
            return Ok(());
        }

        debug!(session = %self.handle, "Closing session");
        self.connection.provider().close(&self.handle)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ResourceClosed {
                resource: format!("Session '{}'", self.handle.id()),
            });
        }
        self.connection.ensure_open()
    }

    fn ensure_transacted(&self, operation: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;

        if !self.mode.is_transacted() {
            return Err(ValidationError::InvalidFormat {
                field: "mode".to_string(),
                message: format!("{} requires a transacted session, not {}", operation, self.mode),
            }
            .into());
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(session = %self.handle, error = %err, "Failed to close session on drop");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("connection", &self.connection)
            .field("closed", &self.is_closed())
            .finish()
    }
}
