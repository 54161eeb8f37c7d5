//! Configuration management for the load-test harness
//!
//! Loads configuration from config.toml at startup.
//! The connection string and message count come from the command line;
//! everything else that shapes a run is configurable here.

use crate::core::DEFAULT_PAYLOAD_BODY;
use crate::hot_path::CompletionPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Harness configuration
///
/// Loaded from config.toml at startup. Missing sections and keys fall back to
/// the values the harness has always used.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Run-shaping settings
    #[serde(default)]
    pub harness: HarnessConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Publish run configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarnessConfig {
    /// Topic exchange the batch is published to (declared durable)
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Delay between queue declaration and the batch firing, in milliseconds
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,

    /// Messages per batch when the command line does not give a count
    #[serde(default = "default_message_count")]
    pub default_message_count: usize,

    /// Body shared by every message; the message index is appended
    #[serde(default = "default_payload_body")]
    pub payload_body: String,

    /// When a batch counts as complete
    #[serde(default)]
    pub completion: CompletionPolicy,

    /// Give up on an incomplete batch after this many seconds (unset = wait forever)
    #[serde(default)]
    pub batch_deadline_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// EnvFilter directive; RUST_LOG takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Write log files in addition to the console
    #[serde(default)]
    pub file_output: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            start_delay_ms: default_start_delay_ms(),
            default_message_count: default_message_count(),
            payload_body: default_payload_body(),
            completion: CompletionPolicy::default(),
            batch_deadline_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_directory(),
            file_output: false,
        }
    }
}

fn default_exchange() -> String {
    "loadtest".to_string()
}

fn default_start_delay_ms() -> u64 {
    1500
}

fn default_message_count() -> usize {
    1000
}

fn default_payload_body() -> String {
    DEFAULT_PAYLOAD_BODY.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

impl HarnessConfig {
    #[inline]
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    #[inline]
    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from config.toml file
    ///
    /// The path can be overridden with the CONFIG_PATH environment variable.
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be read, parsed or validated.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::IoError(e)),
        }
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.harness.exchange.is_empty() {
            return Err(ConfigError::Invalid("harness.exchange must not be empty".into()));
        }
        if self.harness.default_message_count == 0 {
            return Err(ConfigError::Invalid(
                "harness.default_message_count must be at least 1".into(),
            ));
        }
        if self.harness.batch_deadline_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "harness.batch_deadline_secs must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    /// Parse error (invalid TOML)
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    /// Values that parse but cannot drive a run
    #[error("Invalid config: {0}")]
    Invalid(String),
}
