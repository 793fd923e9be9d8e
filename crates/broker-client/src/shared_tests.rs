//! Tests for the shared default connection.

use super::*;
use crate::providers::InMemoryBroker;
use serial_test::serial;

fn broker() -> (Arc<InMemoryBroker>, Arc<dyn BrokerProvider>) {
    let broker = Arc::new(InMemoryBroker::new());
    let provider: Arc<dyn BrokerProvider> = broker.clone();
    (broker, provider)
}

mod lazy_open {
    use super::*;

    #[test]
    fn test_nothing_is_opened_before_first_access() {
        let shared = SharedConnection::new();
        assert!(tokio_test::block_on(shared.current()).is_none());
    }

    #[tokio::test]
    async fn test_repeated_access_returns_same_connection() {
        let (broker, provider) = broker();
        let shared = SharedConnection::new();

        let first = shared
            .get_or_open(provider.clone(), ConnectionConfig::local())
            .await
            .unwrap();
        let second = shared
            .get_or_open(provider, ConnectionConfig::local())
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(broker.stats().connections_created, 1);
    }

    /// Verify that concurrent first callers share a single provider connection.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_opens_once() {
        let (broker, provider) = broker();
        let shared = Arc::new(SharedConnection::new());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let provider = provider.clone();
                tokio::spawn(async move {
                    shared
                        .get_or_open(provider, ConnectionConfig::local())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut connections = Vec::new();
        for task in tasks {
            connections.push(task.await.unwrap());
        }

        assert_eq!(broker.stats().connections_created, 1);
        assert!(connections
            .windows(2)
            .all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[tokio::test]
    async fn test_failed_open_leaves_slot_empty() {
        let (broker, provider) = broker();
        broker.set_available(false);
        let shared = SharedConnection::new();

        let err = shared
            .get_or_open(provider.clone(), ConnectionConfig::local())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::BrokerUnavailable { .. }));
        assert!(shared.current().await.is_none());

        broker.set_available(true);
        assert!(shared
            .get_or_open(provider, ConnectionConfig::local())
            .await
            .is_ok());
    }
}

mod teardown {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_closes_and_forgets() {
        let (broker, provider) = broker();
        let shared = SharedConnection::new();
        let connection = shared
            .get_or_open(provider.clone(), ConnectionConfig::local())
            .await
            .unwrap();

        shared.shutdown().await.unwrap();

        assert!(connection.is_closed());
        assert!(shared.current().await.is_none());
        assert_eq!(broker.stats().connections_closed, 1);

        let reopened = shared
            .get_or_open(provider, ConnectionConfig::local())
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&connection, &reopened));
        assert_eq!(broker.stats().connections_created, 2);
    }

    #[tokio::test]
    async fn test_shutdown_without_connection_is_a_no_op() {
        let shared = SharedConnection::new();
        assert!(shared.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_connection_is_replaced_on_next_access() {
        let (broker, provider) = broker();
        let shared = SharedConnection::new();
        let connection = shared
            .get_or_open(provider.clone(), ConnectionConfig::local())
            .await
            .unwrap();

        connection.close().unwrap();
        assert!(shared.current().await.is_none());

        let replacement = shared
            .get_or_open(provider, ConnectionConfig::local())
            .await
            .unwrap();
        assert!(!replacement.is_closed());
        assert_eq!(broker.stats().connections_created, 2);
    }
}

mod process_default {
    use super::*;

    #[tokio::test]
    #[serial]
    async fn test_default_connection_is_local_and_reused() {
        let (broker, provider) = broker();
        shutdown_default_connection().await.unwrap();

        let first = default_connection(provider.clone()).await.unwrap();
        let second = default_connection(provider).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(broker.last_connection_params().unwrap().is_local());

        shutdown_default_connection().await.unwrap();
        assert!(first.is_closed());
        assert_eq!(broker.stats().connections_closed, 1);
    }
}
