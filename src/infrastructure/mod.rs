//! Infrastructure - cold path only
//!
//! This module contains code outside the publish/confirm path:
//! - Configuration management
//! - Logging
//! - Outcome metrics

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{Config, ConfigError, HarnessConfig, LoggingConfig};
pub use logging::init_logging;
pub use metrics::{MetricsCollector, MetricsSnapshot};
