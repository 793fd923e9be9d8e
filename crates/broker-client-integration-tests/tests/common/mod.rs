//! Common test utilities for broker-client integration tests
//!
//! This module provides:
//! - A recording provider that logs every call it receives
//! - Failure injection for connection creation and handle release
//! - Helpers for raw option bags

use async_trait::async_trait;
use broker_client::{
    BrokerError, BrokerProvider, DestinationKind, DestinationName, InMemoryBroker, Message,
    MessageId, ParamMap, ProviderConnectionParams, ProviderHandle, RawOptions, ReceivedMessage,
    SessionMode,
};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

// ============================================================================
// Recording Provider
// ============================================================================

/// One call received by [`RecordingProvider`]
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum ProviderCall {
    CreateConnection(ProviderConnectionParams),
    CreateSession(SessionMode),
    CreateDestination {
        name: String,
        kind: DestinationKind,
        params: ParamMap,
    },
    Send,
    Receive,
    Commit,
    Rollback,
    Close(ProviderHandle),
}

/// Provider double that records calls and delegates to an in-memory broker
#[derive(Clone)]
#[allow(dead_code)]
pub struct RecordingProvider {
    inner: Arc<InMemoryBroker>,
    calls: Arc<Mutex<Vec<ProviderCall>>>,
    connect_delay: Arc<Mutex<Option<Duration>>>,
    fail_close: Arc<Mutex<bool>>,
}

impl RecordingProvider {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::with_broker(InMemoryBroker::new())
    }

    #[allow(dead_code)]
    pub fn with_broker(broker: InMemoryBroker) -> Self {
        Self {
            inner: Arc::new(broker),
            calls: Arc::new(Mutex::new(Vec::new())),
            connect_delay: Arc::new(Mutex::new(None)),
            fail_close: Arc::new(Mutex::new(false)),
        }
    }

    /// Shared handle usable wherever the library expects a provider
    #[allow(dead_code)]
    pub fn provider(&self) -> Arc<dyn BrokerProvider> {
        Arc::new(self.clone())
    }

    #[allow(dead_code)]
    pub fn broker(&self) -> &InMemoryBroker {
        &self.inner
    }

    /// Slow down connection creation to widen race windows
    #[allow(dead_code)]
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    /// Make every later `close` fail after recording it
    #[allow(dead_code)]
    pub fn set_fail_close(&self, fail: bool) {
        *self.fail_close.lock().unwrap() = fail;
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn connection_requests(&self) -> Vec<ProviderConnectionParams> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::CreateConnection(params) => Some(params),
                _ => None,
            })
            .collect()
    }

    /// Number of `close` calls for handles of the given kind
    #[allow(dead_code)]
    pub fn close_count(&self, kind: broker_client::HandleKind) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ProviderCall::Close(handle) if handle.kind() == kind))
            .count()
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BrokerProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    async fn create_connection(
        &self,
        params: &ProviderConnectionParams,
    ) -> Result<ProviderHandle, BrokerError> {
        self.record(ProviderCall::CreateConnection(params.clone()));

        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        self.inner.create_connection(params).await
    }

    async fn create_session(
        &self,
        connection: &ProviderHandle,
        mode: SessionMode,
    ) -> Result<ProviderHandle, BrokerError> {
        self.record(ProviderCall::CreateSession(mode));
        self.inner.create_session(connection, mode).await
    }

    async fn create_destination(
        &self,
        connection: &ProviderHandle,
        name: &DestinationName,
        kind: DestinationKind,
        params: &ParamMap,
    ) -> Result<ProviderHandle, BrokerError> {
        self.record(ProviderCall::CreateDestination {
            name: name.to_string(),
            kind,
            params: params.clone(),
        });
        self.inner
            .create_destination(connection, name, kind, params)
            .await
    }

    async fn send(
        &self,
        connection: &ProviderHandle,
        destination: &ProviderHandle,
        message: &Message,
    ) -> Result<MessageId, BrokerError> {
        self.record(ProviderCall::Send);
        self.inner.send(connection, destination, message).await
    }

    async fn receive(
        &self,
        connection: &ProviderHandle,
        destination: &ProviderHandle,
        timeout: std::time::Duration,
    ) -> Result<Option<ReceivedMessage>, BrokerError> {
        self.record(ProviderCall::Receive);
        self.inner.receive(connection, destination, timeout).await
    }

    async fn commit(&self, session: &ProviderHandle) -> Result<(), BrokerError> {
        self.record(ProviderCall::Commit);
        self.inner.commit(session).await
    }

    async fn rollback(&self, session: &ProviderHandle) -> Result<(), BrokerError> {
        self.record(ProviderCall::Rollback);
        self.inner.rollback(session).await
    }

    fn close(&self, handle: &ProviderHandle) -> Result<(), BrokerError> {
        self.record(ProviderCall::Close(handle.clone()));

        let result = self.inner.close(handle);
        if *self.fail_close.lock().unwrap() {
            return Err(BrokerError::ProviderError {
                provider: "recording".to_string(),
                code: "CloseFailed".to_string(),
                message: format!("injected failure closing {}", handle),
            });
        }
        result
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Build a raw option bag from a JSON object literal
#[allow(dead_code)]
pub fn raw(value: serde_json::Value) -> RawOptions {
    value
        .as_object()
        .cloned()
        .expect("test options must be a JSON object")
}
