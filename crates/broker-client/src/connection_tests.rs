//! Tests for connections and their factories.

use super::*;
use crate::providers::InMemoryBroker;
use serde_json::json;

fn broker() -> (Arc<InMemoryBroker>, Arc<dyn BrokerProvider>) {
    let broker = Arc::new(InMemoryBroker::new());
    let provider: Arc<dyn BrokerProvider> = broker.clone();
    (broker, provider)
}

fn raw(value: serde_json::Value) -> RawOptions {
    value.as_object().cloned().expect("test input must be an object")
}

// ============================================================================
// Opening
// ============================================================================

mod opening {
    use super::*;

    #[tokio::test]
    async fn test_open_local_connection() {
        let (broker, provider) = broker();

        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        assert!(!connection.is_closed());
        assert_eq!(connection.provider_name(), "in-memory");
        assert_eq!(broker.stats().connections_created, 1);
    }

    #[tokio::test]
    async fn test_typed_port_zero_never_reaches_provider() {
        let (broker, provider) = broker();
        let config = ConnectionConfig::remote("broker.example.com").with_port(0);

        let err = Connection::open(provider, config).await.unwrap_err();

        assert!(matches!(
            err,
            BrokerError::InvalidOption(OptionError::InvalidValue { ref key, .. }) if key == "port"
        ));
        assert_eq!(broker.stats().connections_created, 0);
    }

    #[tokio::test]
    async fn test_unrecognized_option_never_reaches_provider() {
        let (broker, provider) = broker();

        let err = Connection::open_with_options(provider, &raw(json!({ "hots": "x" })))
            .await
            .unwrap_err();

        match err {
            BrokerError::InvalidOption(option_err) => assert_eq!(option_err.keys(), vec!["hots"]),
            other => panic!("expected InvalidOption, got {:?}", other),
        }
        assert_eq!(broker.stats().connections_created, 0);
        assert!(broker.last_connection_params().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_broker_unavailable() {
        let (_broker, provider) = broker();

        let err = Connection::open(provider, ConnectionConfig::remote("nowhere.invalid"))
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::BrokerUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_options_reach_provider_translated() {
        let broker = Arc::new(InMemoryBroker::new().with_remote_host("broker.example.com"));
        let provider: Arc<dyn BrokerProvider> = broker.clone();

        let _connection = Connection::open_with_options(
            provider,
            &raw(json!({ "host": "broker.example.com", "reconnect_attempts": -1 })),
        )
        .await
        .unwrap();

        let params = broker.last_connection_params().unwrap();
        assert_eq!(params.remote.map(|r| r.port), Some(crate::config::DEFAULT_BROKER_PORT));
        assert_eq!(params.reconnect.max_attempts, -1);
        assert_eq!(params.client_id, None);
    }
}

// ============================================================================
// Closing
// ============================================================================

mod closing {
    use super::*;

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (broker, provider) = broker();
        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        connection.close().unwrap();
        connection.close().unwrap();
        drop(connection);

        assert_eq!(broker.stats().connections_closed, 1);
    }

    #[tokio::test]
    async fn test_drop_closes_connection() {
        let (broker, provider) = broker();
        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        drop(connection);

        assert_eq!(broker.stats().connections_closed, 1);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_factories_fail_after_close() {
        let (broker, provider) = broker();
        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();
        connection.close().unwrap();

        let session = connection.create_default_session().await.unwrap_err();
        let queue = connection
            .queue("orders", DestinationOptions::new())
            .await
            .unwrap_err();
        let topic = connection
            .topic("prices", DestinationOptions::new())
            .await
            .unwrap_err();

        for err in [session, queue, topic] {
            assert!(
                matches!(err, BrokerError::ConnectionClosed { ref connection_id } if connection_id == connection.id().as_str()),
                "got {:?}",
                err
            );
        }
        assert_eq!(broker.stats().sessions_created, 0);
        assert_eq!(broker.stats().destinations_created, 0);
    }

    #[tokio::test]
    async fn test_references_observe_close() {
        let (_broker, provider) = broker();
        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();
        let reference = connection.reference();

        assert!(reference.ensure_open().is_ok());
        connection.close().unwrap();

        assert!(reference.is_closed());
        assert!(reference.ensure_open().unwrap_err().is_closed());
    }
}

// ============================================================================
// Scoped use
// ============================================================================

mod scoped {
    use super::*;

    #[tokio::test]
    async fn test_connection_open_during_body_and_closed_after() {
        let (broker, provider) = broker();

        let reference = Connection::scoped(provider, ConnectionConfig::local(), |connection| {
            Box::pin(async move {
                assert!(!connection.is_closed());
                Ok::<_, BrokerError>(connection.reference())
            })
        })
        .await
        .unwrap();

        assert!(reference.is_closed());
        assert_eq!(broker.stats().connections_closed, 1);
    }

    #[tokio::test]
    async fn test_body_failure_still_closes_once() {
        let (broker, provider) = broker();

        let err = Connection::scoped(provider, ConnectionConfig::local(), |_connection| {
            Box::pin(async move {
                Err::<(), _>(BrokerError::ProviderError {
                    provider: "test".to_string(),
                    code: "Boom".to_string(),
                    message: "body failed".to_string(),
                })
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, BrokerError::ProviderError { ref code, .. } if code == "Boom"));
        assert_eq!(broker.stats().connections_closed, 1);
    }

    #[tokio::test]
    async fn test_scoped_open_failure_skips_body() {
        let (broker, provider) = broker();
        broker.set_available(false);

        let result = Connection::scoped(provider, ConnectionConfig::local(), |_connection| {
            Box::pin(async move {
                Err::<(), _>(BrokerError::ResourceClosed {
                    resource: "body ran".to_string(),
                })
            })
        })
        .await;

        assert!(matches!(result, Err(BrokerError::BrokerUnavailable { .. })));
        assert_eq!(broker.stats().connections_closed, 0);
    }

    #[tokio::test]
    async fn test_with_session_closes_session_only() {
        let (broker, provider) = broker();
        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        connection
            .with_session(SessionMode::ClientAcknowledge, |session| {
                Box::pin(async move {
                    assert_eq!(session.mode(), SessionMode::ClientAcknowledge);
                    Ok::<_, BrokerError>(())
                })
            })
            .await
            .unwrap();

        assert_eq!(broker.stats().sessions_closed, 1);
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn test_with_queue_closes_destination_only() {
        let (broker, provider) = broker();
        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        let name = connection
            .with_queue("orders", DestinationOptions::new(), |queue| {
                Box::pin(async move { Ok::<_, BrokerError>(queue.name().to_string()) })
            })
            .await
            .unwrap();

        assert_eq!(name, "orders");
        assert_eq!(broker.stats().destinations_closed, 1);
        assert!(!connection.is_closed());
    }

    #[test]
    fn test_finish_scope_prefers_body_error() {
        let body: Result<(), BrokerError> = Err(BrokerError::ResourceClosed {
            resource: "body".to_string(),
        });
        let closed = Err(BrokerError::ResourceClosed {
            resource: "close".to_string(),
        });

        let err = finish_scope("test", body, closed).unwrap_err();
        assert!(matches!(err, BrokerError::ResourceClosed { ref resource } if resource == "body"));
    }

    #[test]
    fn test_finish_scope_surfaces_close_error_after_success() {
        let closed = Err(BrokerError::ResourceClosed {
            resource: "close".to_string(),
        });

        let err = finish_scope("test", Ok::<_, BrokerError>(42), closed).unwrap_err();
        assert!(matches!(err, BrokerError::ResourceClosed { ref resource } if resource == "close"));
    }
}

// ============================================================================
// Factories
// ============================================================================

mod factories {
    use super::*;

    #[tokio::test]
    async fn test_queue_is_bound_to_connection() {
        let (_broker, provider) = broker();
        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        let queue = connection
            .queue("orders", DestinationOptions::new())
            .await
            .unwrap();

        assert_eq!(queue.kind(), DestinationKind::Queue);
        assert_eq!(queue.connection(), &connection.reference());
        assert_eq!(queue.options().connection, Some(connection.reference()));
    }

    #[tokio::test]
    async fn test_caller_connection_is_overridden() {
        let (_broker, provider) = broker();
        let connection = Connection::open(provider.clone(), ConnectionConfig::local())
            .await
            .unwrap();
        let other = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        let topic = connection
            .topic(
                "prices",
                DestinationOptions::new()
                    .with_connection(other.reference())
                    .durable(true),
            )
            .await
            .unwrap();

        assert!(topic.connection().same_connection(&connection.reference()));
        assert!(!topic.connection().same_connection(&other.reference()));
        assert_eq!(topic.options().durable, Some(true));
    }

    #[tokio::test]
    async fn test_unrecognized_destination_option_never_reaches_provider() {
        let (broker, provider) = broker();
        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        let queue_err = connection
            .queue_with_options("orders", &raw(json!({ "persistent": true })))
            .await
            .unwrap_err();
        let topic_err = connection
            .topic_with_options("prices", &raw(json!({ "persistent": true })))
            .await
            .unwrap_err();

        assert!(matches!(queue_err, BrokerError::InvalidOption(_)));
        assert!(matches!(topic_err, BrokerError::InvalidOption(_)));
        assert_eq!(broker.stats().destinations_created, 0);
    }

    #[tokio::test]
    async fn test_session_mode_from_options() {
        let (broker, provider) = broker();
        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        let session = connection
            .create_session_with_options(&raw(json!({ "mode": "transacted" })))
            .await
            .unwrap();
        assert!(session.mode().is_transacted());

        let err = connection
            .create_session_with_options(&raw(json!({ "mode": "eventually" })))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidOption(OptionError::InvalidValue { .. })));

        let err = connection
            .create_session_with_options(&raw(json!({ "acks": "auto" })))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidOption(OptionError::Unrecognized { .. })));

        assert_eq!(broker.stats().sessions_created, 1);
    }

    #[tokio::test]
    async fn test_invalid_destination_name_is_rejected() {
        let (broker, provider) = broker();
        let connection = Connection::open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        let err = connection
            .queue("bad name!", DestinationOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::Validation(_)));
        assert_eq!(broker.stats().destinations_created, 0);
    }
}
