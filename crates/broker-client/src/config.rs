//! Connection configuration and its resolution into a provider creation request.
//!
//! [`ConnectionConfig`] mirrors the caller-facing option keys one to one and
//! leaves every field optional. [`ConnectionConfig::resolve`] turns it into the
//! [`ProviderConnectionParams`] a provider receives, filling in the documented
//! defaults. Reconnect fields pass through unchanged; this crate never runs a
//! retry loop of its own.

use crate::error::{BrokerError, ConfigurationError, OptionError};
use crate::options::{ParamMap, RawOptions, CONNECTION_OPTIONS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Port used when a remote host is given without one
pub const DEFAULT_BROKER_PORT: u16 = 5445;

/// Prefix of environment variables read by [`ConnectionConfig::load`]
pub const DEFAULT_ENV_PREFIX: &str = "BROKER";

const PORT_EXPECTED: &str = "a port number between 1 and 65535";
const RECONNECT_ATTEMPTS_EXPECTED: &str = "-1 or a non-negative integer";

/// Caller-supplied connection settings; absent fields take provider defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Client identifier for durable subscriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Remote broker host; `None` selects the local broker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Remote broker port, only meaningful together with `host`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Reconnect attempts before giving up, -1 for unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_attempts: Option<i32>,

    /// Milliseconds between reconnect attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_retry_interval: Option<u64>,

    /// Upper bound for the retry interval in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_max_retry_interval: Option<u64>,

    /// Growth factor applied to the retry interval after each attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_retry_interval_multiplier: Option<f64>,
}

impl ConnectionConfig {
    /// Configuration for the local broker with provider defaults
    pub fn local() -> Self {
        Self::default()
    }

    /// Configuration for a remote broker
    pub fn remote(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_reconnect_attempts(mut self, attempts: i32) -> Self {
        self.reconnect_attempts = Some(attempts);
        self
    }

    pub fn with_retry_interval(mut self, interval_ms: u64) -> Self {
        self.reconnect_retry_interval = Some(interval_ms);
        self
    }

    pub fn with_max_retry_interval(mut self, interval_ms: u64) -> Self {
        self.reconnect_max_retry_interval = Some(interval_ms);
        self
    }

    pub fn with_retry_interval_multiplier(mut self, multiplier: f64) -> Self {
        self.reconnect_retry_interval_multiplier = Some(multiplier);
        self
    }

    /// Check the ranges that the field types alone cannot express.
    ///
    /// Typed configurations get the same checks as untyped input; a port of
    /// 0 or fewer than -1 reconnect attempts are rejected.
    pub fn validate(&self) -> Result<(), OptionError> {
        if self.port == Some(0) {
            return Err(invalid("port", PORT_EXPECTED));
        }
        if self.reconnect_attempts.is_some_and(|attempts| attempts < -1) {
            return Err(invalid("reconnect_attempts", RECONNECT_ATTEMPTS_EXPECTED));
        }
        Ok(())
    }

    /// Build a configuration from untyped input.
    ///
    /// Unrecognized keys and mistyped values are rejected before anything is
    /// constructed.
    pub fn from_options(options: &RawOptions) -> Result<Self, OptionError> {
        let params = CONNECTION_OPTIONS.translate(options)?;
        Self::from_params(&params)
    }

    fn from_params(params: &ParamMap) -> Result<Self, OptionError> {
        let port = params
            .get_i64("port")
            .map(|port| {
                u16::try_from(port)
                    .ok()
                    .filter(|port| *port > 0)
                    .ok_or_else(|| invalid("port", PORT_EXPECTED))
            })
            .transpose()?;

        let reconnect_attempts = params
            .get_i64("reconnectAttempts")
            .map(|attempts| {
                i32::try_from(attempts)
                    .ok()
                    .filter(|attempts| *attempts >= -1)
                    .ok_or_else(|| invalid("reconnect_attempts", RECONNECT_ATTEMPTS_EXPECTED))
            })
            .transpose()?;

        Ok(Self {
            client_id: params.get_str("clientID").map(str::to_string),
            host: params.get_str("host").map(str::to_string),
            port,
            reconnect_attempts,
            reconnect_retry_interval: interval(params, "retryInterval", "reconnect_retry_interval")?,
            reconnect_max_retry_interval: interval(
                params,
                "maxRetryInterval",
                "reconnect_max_retry_interval",
            )?,
            reconnect_retry_interval_multiplier: params.get_f64("retryIntervalMultiplier"),
        })
    }

    /// Load configuration from an optional file plus `BROKER_*` environment
    /// variables (later sources win).
    pub fn load(path: Option<&Path>) -> Result<Self, BrokerError> {
        Self::load_with_prefix(path, DEFAULT_ENV_PREFIX)
    }

    /// Same as [`ConnectionConfig::load`] with a custom environment prefix.
    ///
    /// The file format follows the file extension (yaml, toml, json, ...). A
    /// given path must exist. The merged result goes through the same
    /// validation as any other untyped input.
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self, BrokerError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading connection configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(env_prefix).try_parsing(true))
            .build()
            .map_err(ConfigurationError::from)?;

        let options: RawOptions = settings
            .try_deserialize()
            .map_err(ConfigurationError::from)?;

        Ok(Self::from_options(&options)?)
    }

    /// Apply defaults and produce the provider creation request
    pub fn resolve(&self) -> ProviderConnectionParams {
        if self.host.is_none() && self.port.is_some() {
            debug!(port = ?self.port, "Ignoring port without host; using local broker");
        }

        let remote = self.host.as_ref().map(|host| RemoteAddress {
            host: host.clone(),
            port: self.port.unwrap_or(DEFAULT_BROKER_PORT),
        });

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            max_attempts: self.reconnect_attempts.unwrap_or(defaults.max_attempts),
            retry_interval_ms: self
                .reconnect_retry_interval
                .unwrap_or(defaults.retry_interval_ms),
            max_retry_interval_ms: self
                .reconnect_max_retry_interval
                .unwrap_or(defaults.max_retry_interval_ms),
            retry_interval_multiplier: self
                .reconnect_retry_interval_multiplier
                .unwrap_or(defaults.retry_interval_multiplier),
        };

        ProviderConnectionParams {
            client_id: self.client_id.clone(),
            remote,
            reconnect,
        }
    }
}

fn invalid(key: &str, expected: &str) -> OptionError {
    OptionError::InvalidValue {
        key: key.to_string(),
        expected: expected.to_string(),
    }
}

fn interval(params: &ParamMap, param: &str, key: &str) -> Result<Option<u64>, OptionError> {
    params
        .get_i64(param)
        .map(|ms| u64::try_from(ms).map_err(|_| invalid(key, "a non-negative number of milliseconds")))
        .transpose()
}

/// Address of a remote broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAddress {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Reconnect parameters handed to the provider unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// -1 means unlimited
    pub max_attempts: i32,
    pub retry_interval_ms: u64,
    pub max_retry_interval_ms: u64,
    pub retry_interval_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            retry_interval_ms: 2000,
            max_retry_interval_ms: 2000,
            retry_interval_multiplier: 1.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn is_unlimited(&self) -> bool {
        self.max_attempts == -1
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms)
    }
}

/// Resolved connection creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConnectionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// `None` selects the provider's local broker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteAddress>,

    pub reconnect: ReconnectPolicy,
}

impl ProviderConnectionParams {
    pub fn is_local(&self) -> bool {
        self.remote.is_none()
    }
}
