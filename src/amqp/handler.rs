//! Connection lifecycle notifications
//!
//! Hooks are purely observational: they report, they never reconnect or retry,
//! and they share no state with the confirmation tracker.

use crate::core::BrokerAddress;
use crate::infrastructure::metrics::MetricsCollector;
use crate::log_connection;
use std::sync::Arc;
use tracing::Level;

/// Lifecycle event, used where hooks need to be recorded rather than logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Ready,
    Closed,
    Detached,
    Error(String),
}

/// Receives lifecycle notifications from the transport
///
/// `Send + Sync` because transports may report errors from their own threads.
pub trait ConnectionHandler: Send + Sync {
    /// A connection-level error occurred
    fn on_error(&self, address: &BrokerAddress, message: &str);

    /// TCP (and TLS) connection established
    fn on_connected(&self, address: &BrokerAddress);

    /// Protocol handshake finished, channels can be opened
    fn on_ready(&self, address: &BrokerAddress);

    /// Connection closed
    fn on_closed(&self, address: &BrokerAddress);

    /// Connection released by the transport, no further events follow
    fn on_detached(&self, address: &BrokerAddress);

    /// Dispatch a recorded event to the matching hook
    fn notify(&self, address: &BrokerAddress, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => self.on_connected(address),
            ConnectionEvent::Ready => self.on_ready(address),
            ConnectionEvent::Closed => self.on_closed(address),
            ConnectionEvent::Detached => self.on_detached(address),
            ConnectionEvent::Error(message) => self.on_error(address, message),
        }
    }
}

/// Handler that writes one log line per event
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl ConnectionHandler for LoggingHandler {
    fn on_error(&self, address: &BrokerAddress, message: &str) {
        log_connection!(Level::ERROR, %address, "error: {}", message);
    }

    fn on_connected(&self, address: &BrokerAddress) {
        log_connection!(Level::INFO, %address, "connected");
    }

    fn on_ready(&self, address: &BrokerAddress) {
        log_connection!(Level::INFO, %address, "ready");
    }

    fn on_closed(&self, address: &BrokerAddress) {
        log_connection!(Level::INFO, %address, "closed");
    }

    fn on_detached(&self, address: &BrokerAddress) {
        log_connection!(Level::INFO, %address, "detached");
    }
}

/// Counts errors into the run metrics, forwards every hook unchanged
pub struct CountingHandler {
    inner: Arc<dyn ConnectionHandler>,
    metrics: Arc<MetricsCollector>,
}

impl CountingHandler {
    pub fn new(inner: Arc<dyn ConnectionHandler>, metrics: Arc<MetricsCollector>) -> Self {
        Self { inner, metrics }
    }
}

impl ConnectionHandler for CountingHandler {
    fn on_error(&self, address: &BrokerAddress, message: &str) {
        self.metrics.record_connection_error();
        self.inner.on_error(address, message);
    }

    fn on_connected(&self, address: &BrokerAddress) {
        self.inner.on_connected(address);
    }

    fn on_ready(&self, address: &BrokerAddress) {
        self.inner.on_ready(address);
    }

    fn on_closed(&self, address: &BrokerAddress) {
        self.inner.on_closed(address);
    }

    fn on_detached(&self, address: &BrokerAddress) {
        self.inner.on_detached(address);
    }
}
