//! Publisher-confirm load-testing harness
//!
//! Opens one connection and channel to an AMQP broker, declares a topic exchange
//! and an exclusive queue, then fires one burst of publishes and measures the
//! time until every publish has a broker confirmation.

pub mod amqp;
pub mod core;
pub mod engine;
pub mod hot_path;
pub mod infrastructure;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use infrastructure::config::{Config, HarnessConfig, LoggingConfig};

use thiserror::Error;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Broker error: {0}")]
    Broker(#[from] amqp::BrokerError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, HarnessError>;
