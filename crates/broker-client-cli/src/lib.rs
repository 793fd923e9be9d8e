//! # Broker Client CLI
//!
//! Command-line interface for broker connection settings.
//!
//! This module provides CLI commands for:
//! - Validating connection configuration from files, environment and flags
//! - Showing the provider parameters a configuration resolves to
//! - Probing a full connection lifecycle against the in-memory broker
//! - Generating shell completions
//!
//! Connection settings are layered: an optional `--config` file, then
//! `BROKER_*` environment variables, then `-o key=value` overrides.

use broker_client::{
    BrokerError, BrokerProvider, Connection, ConnectionConfig, DestinationKind,
    DestinationOptions, InMemoryBroker, Message, ProviderConnectionParams, RawOptions,
    SendOptions, SessionMode,
};
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Broker client CLI - inspect and exercise broker connection settings
#[derive(Parser)]
#[command(name = "broker-client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and exercise broker connection settings")]
#[command(
    long_about = "Validates broker connection settings, shows what they resolve to, and probes a full connection lifecycle"
)]
pub struct Cli {
    /// Connection configuration file (yaml, toml or json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Connection option override, e.g. -o host=broker.example.com
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", global = true)]
    pub options: Vec<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Open a connection to the in-memory broker and round-trip one message
    Probe {
        /// Queue to probe
        #[arg(long, conflicts_with = "topic", required_unless_present = "topic")]
        queue: Option<String>,

        /// Topic to probe
        #[arg(long)]
        topic: Option<String>,

        /// Session acknowledgement mode
        #[arg(short, long, default_value = "auto-ack")]
        mode: ModeArg,

        /// Probe message body
        #[arg(long, default_value = "probe")]
        body: String,

        /// How long to wait for the probe message, in milliseconds
        #[arg(short, long, default_value = "1000")]
        timeout_ms: u64,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Load and validate the layered configuration
    Validate,

    /// Show the resolved provider connection parameters
    Show {
        /// Output format
        #[arg(short, long, default_value = "yaml")]
        format: ConfigFormat,
    },
}

/// Session mode as accepted on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    AutoAck,
    ClientAck,
    DupsOk,
    Transacted,
}

impl From<ModeArg> for SessionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::AutoAck => SessionMode::AutoAcknowledge,
            ModeArg::ClientAck => SessionMode::ClientAcknowledge,
            ModeArg::DupsOk => SessionMode::DupsOkAcknowledge,
            ModeArg::Transacted => SessionMode::Transacted,
        }
    }
}

/// Output format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

/// Configuration format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Broker(
                BrokerError::InvalidOption(_)
                | BrokerError::Configuration(_)
                | BrokerError::Validation(_),
            ) => 1,
            Self::Broker(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid option override '{entry}': expected KEY=VALUE")]
    InvalidOverride { entry: String },

    #[error("Cannot render configuration as {format}: {message}")]
    Render { format: String, message: String },
}

// ============================================================================
// Configuration Layering
// ============================================================================

/// Parse one `-o key=value` override.
///
/// Values are read as JSON when possible (`-1`, `true`, `1.5`, `"42"`) and as
/// plain strings otherwise.
pub fn parse_override(entry: &str) -> Result<(String, serde_json::Value), ConfigError> {
    let (key, value) = entry
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .ok_or_else(|| ConfigError::InvalidOverride {
            entry: entry.to_string(),
        })?;

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));

    Ok((key.trim().to_string(), value))
}

/// Apply overrides on top of a loaded configuration and validate the result
pub fn apply_overrides(
    base: &ConnectionConfig,
    overrides: &[String],
) -> Result<ConnectionConfig, CliError> {
    if overrides.is_empty() {
        return Ok(base.clone());
    }

    let mut merged: RawOptions = match serde_json::to_value(base) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) | Err(_) => RawOptions::new(),
    };

    for entry in overrides {
        let (key, value) = parse_override(entry)?;
        debug!(key = %key, "Applying connection option override");
        merged.insert(key, value);
    }

    Ok(ConnectionConfig::from_options(&merged).map_err(BrokerError::from)?)
}

/// Load file and environment settings, then apply command-line overrides
pub fn load_configuration(cli: &Cli) -> Result<ConnectionConfig, CliError> {
    let base = ConnectionConfig::load(cli.config.as_deref())?;
    apply_overrides(&base, &cli.options)
}

/// Render resolved provider parameters in the requested format
pub fn render_params(
    params: &ProviderConnectionParams,
    format: &ConfigFormat,
) -> Result<String, ConfigError> {
    let render_error = |format: &str, message: String| ConfigError::Render {
        format: format.to_string(),
        message,
    };

    match format {
        ConfigFormat::Yaml => {
            serde_yaml::to_string(params).map_err(|e| render_error("yaml", e.to_string()))
        }
        ConfigFormat::Json => serde_json::to_string_pretty(params)
            .map(|json| json + "\n")
            .map_err(|e| render_error("json", e.to_string())),
        ConfigFormat::Toml => {
            toml::to_string(params).map_err(|e| render_error("toml", e.to_string()))
        }
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Outcome of a successful probe
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub connection_id: String,
    pub provider: String,
    pub destination: String,
    pub kind: String,
    pub session_mode: String,
    pub message_id: String,
    pub round_trip_ms: u128,
}

impl ProbeReport {
    pub fn render(&self, format: &OutputFormat) -> Result<String, CliError> {
        match format {
            OutputFormat::Text => Ok(format!(
                "connection {} ({})\n{} '{}' via {} session\nmessage {} round trip in {} ms\nclosed\n",
                self.connection_id,
                self.provider,
                self.kind,
                self.destination,
                self.session_mode,
                self.message_id,
                self.round_trip_ms
            )),
            OutputFormat::Json => serde_json::to_string_pretty(self)
                .map(|json| json + "\n")
                .map_err(|e| CliError::CommandFailed {
                    message: e.to_string(),
                }),
        }
    }
}

/// What to probe
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub name: String,
    pub kind: DestinationKind,
    pub mode: SessionMode,
    pub body: String,
    pub timeout: Duration,
}

/// Run one connection, session and destination through a full lifecycle.
///
/// The in-memory broker accepts the configured remote host, so remote
/// settings are translated and validated exactly as for a real broker.
pub async fn run_probe(
    config: ConnectionConfig,
    target: ProbeTarget,
) -> Result<ProbeReport, CliError> {
    let mut broker = InMemoryBroker::new();
    if let Some(host) = &config.host {
        broker = broker.with_remote_host(host.clone());
    }
    let provider: Arc<dyn BrokerProvider> = Arc::new(broker);

    Connection::scoped(provider, config, move |connection| {
        Box::pin(async move {
            let started = Instant::now();

            let session = connection.create_session(target.mode).await?;
            let destination = match target.kind {
                DestinationKind::Queue => {
                    connection.queue(&target.name, DestinationOptions::new()).await?
                }
                DestinationKind::Topic => {
                    connection.topic(&target.name, DestinationOptions::new()).await?
                }
            };

            let message_id = destination
                .send(
                    Message::new(target.body.clone()),
                    SendOptions::new().with_correlation_id("broker-client-probe"),
                )
                .await?;

            destination
                .receive(target.timeout)
                .await?
                .ok_or_else(|| CliError::CommandFailed {
                    message: format!(
                        "no message received from {} '{}' within {} ms",
                        target.kind,
                        target.name,
                        target.timeout.as_millis()
                    ),
                })?;

            if session.mode().is_transacted() {
                session.commit().await?;
            }

            destination.close()?;
            session.close()?;

            Ok(ProbeReport {
                connection_id: connection.id().to_string(),
                provider: connection.provider_name().to_string(),
                destination: target.name.clone(),
                kind: target.kind.to_string(),
                session_mode: target.mode.to_string(),
                message_id: message_id.to_string(),
                round_trip_ms: started.elapsed().as_millis(),
            })
        })
    })
    .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    run(cli).await
}

/// Execute a parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    match &cli.command {
        Commands::Config { action } => execute_config_command(&cli, action),
        Commands::Probe {
            queue,
            topic,
            mode,
            body,
            timeout_ms,
            format,
        } => {
            let (name, kind) = match (queue, topic) {
                (Some(queue), None) => (queue.clone(), DestinationKind::Queue),
                (None, Some(topic)) => (topic.clone(), DestinationKind::Topic),
                _ => {
                    return Err(CliError::InvalidArgument {
                        arg: "--queue/--topic".to_string(),
                        message: "exactly one destination is required".to_string(),
                    })
                }
            };

            let target = ProbeTarget {
                name,
                kind,
                mode: (*mode).into(),
                body: body.clone(),
                timeout: Duration::from_millis(*timeout_ms),
            };
            execute_probe_command(&cli, target, format).await
        }
        Commands::Completions { shell } => execute_completions_command(*shell),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging based on CLI arguments
///
/// `RUST_LOG` wins over `--log-level`. Logs go to stderr so command output on
/// stdout stays machine-readable.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .map_err(|e| CliError::InvalidArgument {
            arg: "--log-level".to_string(),
            message: e.to_string(),
        })?;

    let json_layer = cli.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!cli.json_logs)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| CliError::CommandFailed {
            message: format!("cannot initialize logging: {}", e),
        })
}

/// Execute config command
fn execute_config_command(cli: &Cli, action: &ConfigCommands) -> Result<(), CliError> {
    let config = load_configuration(cli)?;

    match action {
        ConfigCommands::Validate => {
            info!(file = ?cli.config, overrides = cli.options.len(), "Configuration is valid");
            println!("valid");
        }
        ConfigCommands::Show { format } => {
            let rendered = render_params(&config.resolve(), format)?;
            print!("{}", rendered);
        }
    }
    Ok(())
}

/// Execute probe command
async fn execute_probe_command(
    cli: &Cli,
    target: ProbeTarget,
    format: &OutputFormat,
) -> Result<(), CliError> {
    let config = load_configuration(cli)?;
    info!(
        destination = %target.name,
        kind = %target.kind,
        mode = %target.mode,
        "Probing broker connection"
    );

    let report = run_probe(config, target).await?;
    print!("{}", report.render(format)?);
    Ok(())
}

/// Execute completions command
fn execute_completions_command(shell: clap_complete::Shell) -> Result<(), CliError> {
    info!(shell = ?shell, "Generating shell completions");

    let mut command = Cli::command();
    let name = command.get_name().to_string();
    let mut script = Vec::new();
    clap_complete::generate(shell, &mut command, name, &mut script);

    std::io::stdout().write_all(&script)?;
    Ok(())
}
