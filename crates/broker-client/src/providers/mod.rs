//! Broker provider implementations.
//!
//! This module contains concrete implementations of the [`BrokerProvider`]
//! trait. Network-backed providers live in their own crates and plug in
//! through the same trait.
//!
//! [`BrokerProvider`]: crate::provider::BrokerProvider

pub mod memory;

pub use memory::{BrokerStats, InMemoryBroker};
