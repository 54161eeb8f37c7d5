//! Load Test Engine
//!
//! Bootstrap and topology setup: connects, opens one channel, declares the
//! durable topic exchange and an exclusive queue, and only once the queue
//! exists hands the channel to a batch driver bound to the queue name.
//! Setup failures are reported through the connection handler and are not
//! retried.

use crate::amqp::{
    BrokerConnection, ConnectionHandler, Connector, CountingHandler, ExchangeKind, PublishChannel,
};
use crate::core::{BrokerAddress, LoadTestRun, OutcomeCounts, RunReport};
use crate::hot_path::{BatchDriver, BatchReport, BatchStatus, DriverSettings};
use crate::infrastructure::config::HarnessConfig;
use crate::infrastructure::metrics::MetricsCollector;
use crate::{log_main, HarnessError, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, Level};

/// Runs one load test against one broker
pub struct LoadTestEngine<K: Connector> {
    connector: K,
    config: HarnessConfig,
    handler: Arc<dyn ConnectionHandler>,
    metrics: Arc<MetricsCollector>,
}

impl<K: Connector> LoadTestEngine<K> {
    /// Create new engine with shared handler and metrics
    ///
    /// Errors reaching `handler` are also counted in `metrics`.
    pub fn new(
        connector: K,
        config: HarnessConfig,
        handler: Arc<dyn ConnectionHandler>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            connector,
            config,
            handler: Arc::new(CountingHandler::new(handler, metrics.clone())),
            metrics,
        }
    }

    /// Get metrics collector reference
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Run the whole test until the batch ends or `shutdown` resolves
    ///
    /// The end-to-end runtime is logged whether or not setup succeeded.
    pub async fn run<S>(
        &self,
        address: &BrokerAddress,
        message_count: usize,
        shutdown: S,
    ) -> Result<RunReport>
    where
        S: Future<Output = ()>,
    {
        let mut run = LoadTestRun::start(message_count, address.to_string());
        let span = tracing::info_span!("run", run_id = %run.id);

        log_main!(
            Level::INFO,
            "Will connect to {} and publish {} messages",
            run.connection_string,
            message_count
        );

        let result = self
            .execute(address, message_count, shutdown)
            .instrument(span)
            .await;

        let total_runtime = run.finish();
        log_main!(
            Level::INFO,
            total_ms = total_runtime.as_millis() as u64,
            "The end to end runtime of this app took: {} ms",
            total_runtime.as_millis()
        );

        let batch = result?;
        let report = match batch {
            Some(batch) => RunReport {
                status: batch.status,
                message_count,
                issue_elapsed: Some(batch.issue_elapsed),
                confirm_elapsed: batch.confirm_elapsed,
                counts: batch.counts,
                total_runtime,
            },
            None => {
                let snapshot = self.metrics.snapshot();
                RunReport {
                    status: BatchStatus::Interrupted,
                    message_count,
                    issue_elapsed: None,
                    confirm_elapsed: None,
                    counts: OutcomeCounts {
                        acknowledged: snapshot.acknowledged as usize,
                        lost: snapshot.lost as usize,
                        errored: snapshot.errored as usize,
                    },
                    total_runtime,
                }
            }
        };

        self.log_summary(&report);
        Ok(report)
    }

    /// Connect, run the batch, always close the connection afterwards
    async fn execute<S>(
        &self,
        address: &BrokerAddress,
        message_count: usize,
        shutdown: S,
    ) -> Result<Option<BatchReport>>
    where
        S: Future<Output = ()>,
    {
        let connection = self.connector.connect(address, self.handler.clone()).await?;

        let outcome = self
            .run_on_connection(&connection, address, message_count, shutdown)
            .await;

        if let Err(e) = connection.close().await {
            log_main!(Level::WARN, "Failed to close connection: {}", e);
        }

        outcome
    }

    async fn run_on_connection<S>(
        &self,
        connection: &K::Connection,
        address: &BrokerAddress,
        message_count: usize,
        shutdown: S,
    ) -> Result<Option<BatchReport>>
    where
        S: Future<Output = ()>,
    {
        let channel = connection.open_channel().await?;

        channel
            .declare_exchange(&self.config.exchange, ExchangeKind::Topic, true)
            .await
            .map_err(|e| self.report_error(address, e))?;

        let queue = channel
            .declare_queue(true)
            .await
            .map_err(|e| self.report_error(address, e))?;
        log_main!(Level::INFO, queue = %queue.name, "declared queue {}", queue.name);

        let settings = DriverSettings::from_config(&self.config, message_count);
        let driver = BatchDriver::new(&channel, queue.name, settings, self.metrics.clone());

        tokio::pin!(shutdown);
        tokio::select! {
            report = driver.start() => Ok(Some(report)),
            _ = &mut shutdown => {
                log_main!(Level::WARN, "Shutdown requested before the batch completed");
                Ok(None)
            }
        }
    }

    /// Channel-level failures go to the handler like any other broker error
    fn report_error(&self, address: &BrokerAddress, err: crate::amqp::BrokerError) -> HarnessError {
        self.handler.on_error(address, &err.to_string());
        HarnessError::Broker(err)
    }

    fn log_summary(&self, report: &RunReport) {
        let snapshot = self.metrics.snapshot();
        log_main!(
            Level::INFO,
            status = ?report.status,
            published = snapshot.published,
            publish_failures = snapshot.publish_failures,
            connection_errors = snapshot.connection_errors,
            outstanding = snapshot.outstanding(),
            "Run summary: {} of {} messages ({})",
            report.counts.resolved(),
            report.message_count,
            report.counts
        );
    }
}
