//! Publish outcome metrics
//!
//! Lock-free counters using atomic operations. Updated by the batch driver,
//! read for the end-of-run summary.

use crate::core::OutcomeKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Publish metrics collector
pub struct MetricsCollector {
    /// Publishes handed to the channel
    published: AtomicU64,
    /// Publishes rejected before leaving the client
    publish_failures: AtomicU64,
    /// Confirmed by the broker
    acknowledged: AtomicU64,
    /// Nacked or lost with the channel
    lost: AtomicU64,
    /// Failed with a protocol error
    errored: AtomicU64,
    /// Connection and channel level errors reported by the transport
    connection_errors: AtomicU64,
}

/// Metrics snapshot for reporting
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub publish_failures: u64,
    pub acknowledged: u64,
    pub lost: u64,
    pub errored: u64,
    pub connection_errors: u64,
}

impl MetricsSnapshot {
    /// Publishes that have not reported an outcome yet
    ///
    /// Synchronous failures are counted as errored but were never published.
    pub fn outstanding(&self) -> u64 {
        let confirmed_errors = self.errored.saturating_sub(self.publish_failures);
        self.published
            .saturating_sub(self.acknowledged + self.lost + confirmed_errors)
    }
}

impl MetricsCollector {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            errored: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
        }
    }

    /// Record a publish handed to the channel
    #[inline]
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a publish rejected synchronously
    #[inline]
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a terminal outcome
    #[inline]
    pub fn record_outcome(&self, kind: OutcomeKind) {
        let counter = match kind {
            OutcomeKind::Acknowledged => &self.acknowledged,
            OutcomeKind::Lost => &self.lost,
            OutcomeKind::Errored => &self.errored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error reported through the connection handler
    #[inline]
    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
