//! Queue and topic handles.
//!
//! A [`Destination`] remembers the connection it was created with and uses it
//! for every later send or receive unless the caller names another connection
//! in the per-operation options. Sending and receiving are thin pass-throughs
//! to the provider.

use crate::connection::ConnectionRef;
use crate::error::{BrokerError, ConfigurationError, OptionError, ValidationError};
use crate::message::{DestinationName, Message, MessageId, ReceivedMessage, MAX_PRIORITY};
use crate::options::{ParamMap, ParamValue, RawOptions, SEND_OPTIONS};
use crate::provider::{DestinationKind, ProviderHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "destination_tests.rs"]
mod tests;

/// Options used when creating a queue or topic handle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationOptions {
    /// Connection the handle is bound to; connection factories always set it
    pub connection: Option<ConnectionRef>,
    pub durable: Option<bool>,
    /// Message selector expression, interpreted by the provider
    pub selector: Option<String>,
}

impl DestinationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(mut self, connection: ConnectionRef) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Build from translated destination options.
    ///
    /// A connection cannot be expressed in untyped input, so the result never
    /// carries one.
    pub fn from_params(params: &ParamMap) -> Self {
        Self {
            connection: None,
            durable: params.get_bool("durable"),
            selector: params.get_str("selector").map(str::to_string),
        }
    }

    /// Provider parameters, without the connection
    pub fn to_params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        if let Some(durable) = self.durable {
            params.insert("durable", ParamValue::Boolean(durable));
        }
        if let Some(selector) = &self.selector {
            params.insert("selector", ParamValue::String(selector.clone()));
        }
        params
    }
}

/// Per-send options applied on top of the message
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Overrides the destination's own connection for this send
    pub connection: Option<ConnectionRef>,
    pub priority: Option<u8>,
    pub time_to_live: Option<Duration>,
    pub correlation_id: Option<String>,
    pub properties: HashMap<String, String>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(mut self, connection: ConnectionRef) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Build from untyped input (`priority`, `ttl` in milliseconds,
    /// `correlation_id`, `properties`)
    pub fn from_options(options: &RawOptions) -> Result<Self, OptionError> {
        let params = SEND_OPTIONS.translate(options)?;

        let priority = params
            .get_i64("priority")
            .map(|priority| {
                u8::try_from(priority)
                    .ok()
                    .filter(|priority| *priority <= MAX_PRIORITY)
                    .ok_or_else(|| OptionError::InvalidValue {
                        key: "priority".to_string(),
                        expected: format!("an integer between 0 and {}", MAX_PRIORITY),
                    })
            })
            .transpose()?;

        let time_to_live = params
            .get_i64("timeToLive")
            .map(|ms| {
                u64::try_from(ms)
                    .map(Duration::from_millis)
                    .map_err(|_| OptionError::InvalidValue {
                        key: "ttl".to_string(),
                        expected: "a non-negative number of milliseconds".to_string(),
                    })
            })
            .transpose()?;

        Ok(Self {
            connection: None,
            priority,
            time_to_live,
            correlation_id: params.get_str("correlationID").map(str::to_string),
            properties: params
                .get_map("properties")
                .map(|props| props.clone().into_iter().collect())
                .unwrap_or_default(),
        })
    }

    fn apply(&self, mut message: Message) -> Result<Message, ValidationError> {
        if let Some(priority) = self.priority {
            message = message.with_priority(priority)?;
        }
        if let Some(ttl) = self.time_to_live {
            message.time_to_live = Some(ttl);
        }
        if let Some(correlation_id) = &self.correlation_id {
            message.correlation_id = Some(correlation_id.clone());
        }
        message
            .properties
            .extend(self.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(message)
    }
}

/// Handle to a queue or topic
pub struct Destination {
    name: DestinationName,
    kind: DestinationKind,
    options: DestinationOptions,
    connection: ConnectionRef,
    handle: ProviderHandle,
    closed: AtomicBool,
}

impl Destination {
    /// Create a destination handle on the connection named in `options`.
    ///
    /// Fails with [`ConfigurationError::Missing`] if `options` carries no
    /// connection and with [`BrokerError::ConnectionClosed`] if that
    /// connection is closed.
    pub async fn open(
        name: &str,
        kind: DestinationKind,
        options: DestinationOptions,
    ) -> Result<Self, BrokerError> {
        let connection = options
            .connection
            .clone()
            .ok_or_else(|| ConfigurationError::Missing {
                key: "connection".to_string(),
            })?;
        connection.ensure_open()?;

        let name = DestinationName::new(name)?;
        let handle = connection
            .provider()
            .create_destination(connection.handle(), &name, kind, &options.to_params())
            .await?;

        debug!(
            connection_id = %connection.id(),
            destination = %name,
            kind = %kind,
            "Created destination handle"
        );

        Ok(Self {
            name,
            kind,
            options,
            connection,
            handle,
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &DestinationName {
        &self.name
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    /// Options the handle was created with, including its connection
    pub fn options(&self) -> &DestinationOptions {
        &self.options
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a message (to a queue) or publish it (to a topic)
    pub async fn send(
        &self,
        message: Message,
        options: SendOptions,
    ) -> Result<MessageId, BrokerError> {
        self.ensure_open()?;

        let connection = self.resolve_connection(&options)?;
        let message = options.apply(message)?;

        let id = connection
            .provider()
            .send(connection.handle(), &self.handle, &message)
            .await?;

        debug!(
            connection_id = %connection.id(),
            destination = %self.name,
            message_id = %id,
            "Sent message"
        );
        Ok(id)
    }

    /// Send with untyped options; unrecognized keys fail before sending
    pub async fn send_with_options(
        &self,
        message: Message,
        options: &RawOptions,
    ) -> Result<MessageId, BrokerError> {
        let options = SendOptions::from_options(options)?;
        self.send(message, options).await
    }

    /// Same as [`Destination::send`]; reads better for topics
    pub async fn publish(
        &self,
        message: Message,
        options: SendOptions,
    ) -> Result<MessageId, BrokerError> {
        self.send(message, options).await
    }

    /// Wait up to `timeout` for the next message
    pub async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, BrokerError> {
        self.ensure_open()?;
        self.connection.ensure_open()?;

        self.connection
            .provider()
            .receive(self.connection.handle(), &self.handle, timeout)
            .await
    }

    /// Release the provider handle; later calls are no-ops
    pub fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if self.connection.is_closed() {
            // Released together with its connection
            return Ok(());
        }

        debug!(destination = %self.name, kind = %self.kind, "Closing destination handle");
        self.connection.provider().close(&self.handle)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ResourceClosed {
                resource: format!("{} '{}'", self.kind, self.name),
            });
        }
        Ok(())
    }

    fn resolve_connection<'a>(
        &'a self,
        options: &'a SendOptions,
    ) -> Result<&'a ConnectionRef, BrokerError> {
        let connection = options.connection.as_ref().unwrap_or(&self.connection);
        connection.ensure_open()?;

        let same_provider = Arc::as_ptr(connection.provider()) as *const ()
            == Arc::as_ptr(self.connection.provider()) as *const ();
        if !same_provider {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "connection '{}' belongs to a different provider than {} '{}'",
                    connection.id(),
                    self.kind,
                    self.name
                ),
            }
            .into());
        }
        Ok(connection)
    }
}

impl Drop for Destination {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(
                destination = %self.name,
                error = %err,
                "Failed to close destination handle on drop"
            );
        }
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("connection", &self.connection)
            .field("closed", &self.is_closed())
            .finish()
    }
}
