//! Batch Timer/Driver
//!
//! Waits the configured delay, issues the whole batch in index order without
//! waiting for any confirmation, then feeds confirmations to the tracker as
//! they arrive until the batch completes.
//!
//! All confirm futures are polled from one `FuturesUnordered` on the calling
//! task, so every outcome is handled on its own turn of the single-threaded
//! loop and the tracker needs no locking.

use crate::amqp::PublishChannel;
use crate::core::{Batch, OutcomeCounts, PayloadTemplate, PublishOutcome};
use crate::hot_path::tracker::{CompletionPolicy, ConfirmationTracker, Progress};
use crate::infrastructure::config::HarnessConfig;
use crate::infrastructure::metrics::MetricsCollector;
use crate::log_publish;
use futures_util::future::{self, LocalBoxFuture};
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at};
use tracing::Level;

type TaggedConfirm = LocalBoxFuture<'static, (usize, PublishOutcome)>;

/// Everything a driver needs besides the channel and queue
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Messages in the batch, at least 1
    pub message_count: usize,
    /// One-shot timer delay before the batch fires
    pub start_delay: Duration,
    pub exchange: String,
    pub payload: PayloadTemplate,
    pub completion: CompletionPolicy,
    /// Abandon an incomplete batch after this long (from first publish)
    pub batch_deadline: Option<Duration>,
}

impl DriverSettings {
    /// Build settings from configuration and the requested batch size
    pub fn from_config(config: &HarnessConfig, message_count: usize) -> Self {
        Self {
            message_count,
            start_delay: config.start_delay(),
            exchange: config.exchange.clone(),
            payload: PayloadTemplate::new(config.payload_body.clone()),
            completion: config.completion,
            batch_deadline: config.batch_deadline(),
        }
    }
}

/// How a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Completion condition met
    Completed,
    /// Deadline passed before completion
    Abandoned,
    /// Stopped by an external shutdown signal
    Interrupted,
}

/// Timings and outcome tallies of one batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub status: BatchStatus,
    pub message_count: usize,
    /// Time to issue all publishes
    pub issue_elapsed: Duration,
    /// Time from first publish to the completing confirmation
    pub confirm_elapsed: Option<Duration>,
    pub counts: OutcomeCounts,
    /// Issued publishes without an outcome when the batch ended
    pub unresolved: usize,
}

/// Fires one batch on a channel bound to a declared queue
pub struct BatchDriver<'a, C: PublishChannel> {
    channel: &'a C,
    target_queue: String,
    settings: DriverSettings,
    metrics: Arc<MetricsCollector>,
}

impl<'a, C: PublishChannel> BatchDriver<'a, C> {
    pub fn new(
        channel: &'a C,
        target_queue: impl Into<String>,
        settings: DriverSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            channel,
            target_queue: target_queue.into(),
            settings,
            metrics,
        }
    }

    /// Wait for the one-shot timer, then run the batch
    pub async fn start(&self) -> BatchReport {
        log_publish!(
            Level::DEBUG,
            delay_ms = self.settings.start_delay.as_millis() as u64,
            queue = %self.target_queue,
            "Batch timer armed"
        );
        sleep(self.settings.start_delay).await;
        self.on_timer_fire().await
    }

    /// Issue every publish, then wait for the batch to complete
    pub async fn on_timer_fire(&self) -> BatchReport {
        log_publish!(Level::INFO, "Timer fired");

        let count = self.settings.message_count;
        let batch = Batch::new(count, self.settings.exchange.clone(), self.target_queue.clone());
        let start_time = batch.start_time;
        let mut tracker = ConfirmationTracker::new(batch, self.settings.completion);
        let confirms = self.issue_batch(&mut tracker).await;

        let issue_elapsed = start_time.elapsed();
        log_publish!(
            Level::INFO,
            issue_ms = issue_elapsed.as_millis() as u64,
            "presumably sent publish signal for {} in {} ms",
            count,
            issue_elapsed.as_millis()
        );

        let status = match self.settings.batch_deadline {
            Some(deadline) => {
                let wait = Self::await_confirms(&mut tracker, confirms, &self.metrics);
                match timeout_at(start_time + deadline, wait).await {
                    Ok(()) => BatchStatus::Completed,
                    Err(_) => BatchStatus::Abandoned,
                }
            }
            None => {
                Self::await_confirms(&mut tracker, confirms, &self.metrics).await;
                BatchStatus::Completed
            }
        };

        let counts = tracker.counts();
        let unresolved = tracker.unresolved().count();
        if status == BatchStatus::Abandoned {
            log_publish!(
                Level::WARN,
                %counts,
                unresolved,
                "Batch abandoned after {} ms deadline",
                self.settings.batch_deadline.unwrap_or_default().as_millis()
            );
        }

        BatchReport {
            status,
            message_count: count,
            issue_elapsed,
            confirm_elapsed: tracker.completed_after(),
            counts,
            unresolved,
        }
    }

    /// Issue publishes 0..count in order on this turn
    ///
    /// A synchronous publish failure becomes an errored outcome for that index
    /// and does not stop the remaining publishes.
    async fn issue_batch(&self, tracker: &mut ConfirmationTracker) -> FuturesUnordered<TaggedConfirm> {
        let confirms = FuturesUnordered::new();

        for index in 0..self.settings.message_count {
            let payload = self.settings.payload.render(index);
            if let Err(e) = tracker.register(index, payload.len()) {
                log_publish!(Level::ERROR, index, "Cannot register publish: {}", e);
                continue;
            }

            let confirm: TaggedConfirm = match self
                .channel
                .publish(&self.settings.exchange, &self.target_queue, payload)
                .await
            {
                Ok(confirm) => {
                    self.metrics.record_published();
                    confirm.map(move |outcome| (index, outcome)).boxed_local()
                }
                Err(e) => {
                    self.metrics.record_publish_failure();
                    future::ready((index, PublishOutcome::Errored(e.to_string()))).boxed_local()
                }
            };
            confirms.push(confirm);

            log_publish!(Level::DEBUG, index, "Sent publish signal for message {}", index);
        }

        confirms
    }

    /// Feed outcomes to the tracker until it reports completion
    ///
    /// If every outcome arrives without completing the batch this never
    /// returns; only a deadline or an external shutdown ends the wait.
    async fn await_confirms(
        tracker: &mut ConfirmationTracker,
        mut confirms: FuturesUnordered<TaggedConfirm>,
        metrics: &MetricsCollector,
    ) {
        while let Some((index, outcome)) = confirms.next().await {
            metrics.record_outcome(outcome.kind());
            match tracker.handle(index, outcome) {
                Ok(Progress::Complete { .. }) => return,
                Ok(_) => {}
                Err(e) => log_publish!(Level::WARN, index, "Ignoring outcome: {}", e),
            }
        }

        log_publish!(
            Level::WARN,
            counts = %tracker.counts(),
            "Every publish has an outcome but the batch is not complete; waiting for shutdown"
        );
        future::pending::<()>().await
    }
}
