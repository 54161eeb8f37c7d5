//! Centralized logging
//!
//! Console output is always on. With `logging.file_output` enabled, logs are
//! also written to daily rolling files under the configured directory:
//! - main/    - every event, JSON
//! - error/   - WARN and above
//! - publish/ - per-message outcomes and batch timings

use crate::infrastructure::config::LoggingConfig;
use std::fs;
use std::io;
use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Target for connection lifecycle events
pub const TARGET_CONNECTION: &str = "connection";
/// Target for publish outcomes and batch timings
pub const TARGET_PUBLISH: &str = "publish";
/// Target for bootstrap and run reporting
pub const TARGET_MAIN: &str = "main";

/// Initialize logging
///
/// Returns the WorkerGuards of the file writers; they must be kept alive for
/// the duration of the program or buffered lines are lost.
/// # Errors
/// Returns error if the log directories cannot be created.
pub fn init_logging(config: &LoggingConfig) -> io::Result<Vec<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    let (files, guards) = if config.file_output {
        let (layers, guards) = file_layers::<Registry>(&config.directory)?;
        (Some(layers), guards)
    } else {
        (None, Vec::new())
    };

    // The env filter is global, so it also gates the file layers beneath it
    tracing_subscriber::registry()
        .with(files)
        .with(filter)
        .with(console_layer)
        .init();

    if config.file_output {
        tracing::info!(directory = %config.directory.display(), "File logging enabled");
    }

    Ok(guards)
}

/// Rolling file layers under `dir`: all events as JSON in main/, WARN and
/// above in error/, the publish target in publish/
fn file_layers<S>(dir: &Path) -> io::Result<(impl Layer<S>, Vec<WorkerGuard>)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    for log_type in ["main", "error", "publish"] {
        fs::create_dir_all(dir.join(log_type))?;
    }

    let (main_appender, main_guard) = create_appender(&dir.join("main"), "main");
    let (error_appender, error_guard) = create_appender(&dir.join("error"), "error");
    let (publish_appender, publish_guard) = create_appender(&dir.join("publish"), "publish");

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let publish_layer = tracing_subscriber::fmt::layer()
        .with_writer(publish_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() == TARGET_PUBLISH
        }));

    Ok((
        main_layer.and_then(error_layer).and_then(publish_layer),
        vec![main_guard, error_guard, publish_guard],
    ))
}

/// Create a rolling file appender
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, name);

    tracing_appender::non_blocking(appender)
}

/// Log macro helpers for specific log targets
#[macro_export]
macro_rules! log_connection {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "connection", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_publish {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "publish", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_main {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "main", $level, $($arg)+)
    };
}
