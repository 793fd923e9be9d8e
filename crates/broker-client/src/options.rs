//! Option sets: the recognized configuration keys per operation and their
//! translation into provider-level parameters.
//!
//! Typed configuration structs ([`crate::ConnectionConfig`],
//! [`crate::DestinationOptions`], ...) are the primary API. Option sets exist
//! for values that arrive untyped from outside the program (a CLI, a file, the
//! environment): such input is checked here before anything reaches the
//! provider.
//!
//! Both [`OptionSet::validate`] and [`OptionSet::translate`] are pure. Neither
//! fills in defaults; keys missing from the input are missing from the output.

use crate::error::OptionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;

/// Untyped option map as received from external input
pub type RawOptions = serde_json::Map<String, Value>;

/// Expected value type of a recognized option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Text; numbers and booleans are accepted and rendered as text since
    /// environment and command-line input cannot mark `12345` as a string
    String,
    Integer,
    Float,
    Boolean,
    /// Flat map of string values
    Map,
    /// Reference to a connection; untyped input can only spell `null`
    Connection,
}

impl OptionKind {
    fn expected(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Integer => "an integer",
            Self::Float => "a number",
            Self::Boolean => "a boolean",
            Self::Map => "a map of strings",
            Self::Connection => "null (connections are passed as typed options)",
        }
    }
}

/// One recognized option and the provider parameter it controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub key: &'static str,
    pub param: &'static str,
    pub kind: OptionKind,
}

/// Immutable declaration of the options accepted by one operation
#[derive(Debug)]
pub struct OptionSet {
    operation: &'static str,
    options: &'static [OptionSpec],
}

impl OptionSet {
    pub const fn new(operation: &'static str, options: &'static [OptionSpec]) -> Self {
        Self { operation, options }
    }

    /// Name of the operation this set belongs to, used in error messages
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Recognized keys in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.options.iter().map(|spec| spec.key)
    }

    pub fn spec(&self, key: &str) -> Option<&'static OptionSpec> {
        self.options.iter().find(|spec| spec.key == key)
    }

    pub fn recognizes(&self, key: &str) -> bool {
        self.spec(key).is_some()
    }

    /// Fail if `options` contains any key this set does not declare.
    ///
    /// All offending keys are reported, sorted.
    pub fn validate(&self, options: &RawOptions) -> Result<(), OptionError> {
        let mut unknown: Vec<String> = options
            .keys()
            .filter(|key| !self.recognizes(key))
            .cloned()
            .collect();

        if unknown.is_empty() {
            return Ok(());
        }

        unknown.sort();
        Err(OptionError::Unrecognized {
            operation: self.operation.to_string(),
            keys: unknown,
        })
    }

    /// Rename and convert every present option into its provider parameter.
    pub fn translate(&self, options: &RawOptions) -> Result<ParamMap, OptionError> {
        self.validate(options)?;

        let mut params = ParamMap::new();
        for (key, value) in options {
            // validate() guarantees the lookup succeeds
            let Some(spec) = self.spec(key) else {
                continue;
            };
            params.insert(spec.param, convert(spec, value)?);
        }

        Ok(params)
    }
}

fn convert(spec: &OptionSpec, value: &Value) -> Result<ParamValue, OptionError> {
    let invalid = || OptionError::InvalidValue {
        key: spec.key.to_string(),
        expected: spec.kind.expected().to_string(),
    };

    match spec.kind {
        OptionKind::String => match value {
            Value::String(text) => Ok(ParamValue::String(text.clone())),
            Value::Number(number) => Ok(ParamValue::String(number.to_string())),
            Value::Bool(flag) => Ok(ParamValue::String(flag.to_string())),
            _ => Err(invalid()),
        },
        OptionKind::Integer => value.as_i64().map(ParamValue::Integer).ok_or_else(invalid),
        OptionKind::Float => value.as_f64().map(ParamValue::Float).ok_or_else(invalid),
        OptionKind::Boolean => value.as_bool().map(ParamValue::Boolean).ok_or_else(invalid),
        OptionKind::Map => {
            let map = value.as_object().ok_or_else(invalid)?;
            map.iter()
                .map(|(k, v)| {
                    v.as_str()
                        .map(|s| (k.clone(), s.to_string()))
                        .ok_or_else(invalid)
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(ParamValue::Map)
        }
        OptionKind::Connection => match value {
            Value::Null => Ok(ParamValue::Null),
            _ => Err(invalid()),
        },
    }
}

/// A provider-level parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Map(BTreeMap<String, String>),
}

/// Provider-level parameters keyed by provider parameter name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamMap(BTreeMap<String, ParamValue>);

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, param: &str, value: ParamValue) {
        self.0.insert(param.to_string(), value);
    }

    pub fn get(&self, param: &str) -> Option<&ParamValue> {
        self.0.get(param)
    }

    pub fn contains(&self, param: &str) -> bool {
        self.0.contains_key(param)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_str(&self, param: &str) -> Option<&str> {
        match self.0.get(param) {
            Some(ParamValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_i64(&self, param: &str) -> Option<i64> {
        match self.0.get(param) {
            Some(ParamValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Integers are widened, matching [`OptionKind::Float`] input rules
    pub fn get_f64(&self, param: &str) -> Option<f64> {
        match self.0.get(param) {
            Some(ParamValue::Float(f)) => Some(*f),
            Some(ParamValue::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn get_bool(&self, param: &str) -> Option<bool> {
        match self.0.get(param) {
            Some(ParamValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_map(&self, param: &str) -> Option<&BTreeMap<String, String>> {
        match self.0.get(param) {
            Some(ParamValue::Map(m)) => Some(m),
            _ => None,
        }
    }
}

// ============================================================================
// Declared option sets
// ============================================================================

macro_rules! option {
    ($key:literal => $param:literal, $kind:ident) => {
        OptionSpec {
            key: $key,
            param: $param,
            kind: OptionKind::$kind,
        }
    };
}

pub static CONNECTION_OPTIONS: OptionSet = OptionSet::new(
    "create connection",
    &[
        option!("client_id" => "clientID", String),
        option!("host" => "host", String),
        option!("port" => "port", Integer),
        option!("reconnect_attempts" => "reconnectAttempts", Integer),
        option!("reconnect_retry_interval" => "retryInterval", Integer),
        option!("reconnect_max_retry_interval" => "maxRetryInterval", Integer),
        option!("reconnect_retry_interval_multiplier" => "retryIntervalMultiplier", Float),
    ],
);

pub static SESSION_OPTIONS: OptionSet =
    OptionSet::new("create session", &[option!("mode" => "sessionMode", String)]);

pub static DESTINATION_OPTIONS: OptionSet = OptionSet::new(
    "create destination",
    &[
        option!("connection" => "connection", Connection),
        option!("durable" => "durable", Boolean),
        option!("selector" => "selector", String),
    ],
);

pub static SEND_OPTIONS: OptionSet = OptionSet::new(
    "send message",
    &[
        option!("connection" => "connection", Connection),
        option!("priority" => "priority", Integer),
        option!("ttl" => "timeToLive", Integer),
        option!("correlation_id" => "correlationID", String),
        option!("properties" => "properties", Map),
    ],
);
