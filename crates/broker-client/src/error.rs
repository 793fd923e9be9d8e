//! Error types for broker client operations.

use thiserror::Error;

/// Top-level error type for all connection, session and destination operations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Invalid option: {0}")]
    InvalidOption(#[from] OptionError),

    #[error("Broker unavailable ({provider}): {message}")]
    BrokerUnavailable { provider: String, message: String },

    #[error("Connection '{connection_id}' is closed")]
    ConnectionClosed { connection_id: String },

    #[error("{resource} is closed")]
    ResourceClosed { resource: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl BrokerError {
    /// Check if error is transient and the operation may succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidOption(_) => false,
            Self::BrokerUnavailable { .. } => true,
            Self::ConnectionClosed { .. } => false,
            Self::ResourceClosed { .. } => false,
            Self::ProviderError { .. } => true,
            Self::Configuration(_) => false,
            Self::Validation(_) => false,
        }
    }

    /// Check if error should be retried by the caller
    ///
    /// This layer never retries on its own; reconnect behaviour belongs to the
    /// provider's reconnect policy.
    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }

    /// True for errors raised because a resource was used after close
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed { .. } | Self::ResourceClosed { .. }
        )
    }
}

/// Errors raised while validating or translating an option map
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    #[error("unrecognized option(s) for {operation}: {}", keys.join(", "))]
    Unrecognized {
        operation: String,
        keys: Vec<String>,
    },

    #[error("option '{key}' must be {expected}")]
    InvalidValue { key: String, expected: String },
}

impl OptionError {
    /// Keys the caller has to fix
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::Unrecognized { keys, .. } => keys.iter().map(String::as_str).collect(),
            Self::InvalidValue { key, .. } => vec![key.as_str()],
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Parsing {
            message: err.to_string(),
        }
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
