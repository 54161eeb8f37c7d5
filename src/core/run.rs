//! Top-level timing record for one process run

use crate::core::batch::OutcomeCounts;
use crate::hot_path::BatchStatus;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Timing record owned by the process for its whole lifetime
#[derive(Debug, Clone)]
pub struct LoadTestRun {
    /// Correlates all log lines of one run
    pub id: Uuid,
    pub message_count: usize,
    /// Redacted connection string
    pub connection_string: String,
    pub master_start_time: Instant,
    pub master_end_time: Option<Instant>,
}

impl LoadTestRun {
    pub fn start(message_count: usize, connection_string: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_count,
            connection_string: connection_string.into(),
            master_start_time: Instant::now(),
            master_end_time: None,
        }
    }

    /// Stamp the end time; later calls keep the first stamp
    pub fn finish(&mut self) -> Duration {
        let end = *self.master_end_time.get_or_insert_with(Instant::now);
        end.duration_since(self.master_start_time)
    }
}

/// Summary produced at the end of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: BatchStatus,
    pub message_count: usize,
    /// Time to issue every publish (not waiting for confirms)
    pub issue_elapsed: Option<Duration>,
    /// Time from first publish to the completing confirmation
    pub confirm_elapsed: Option<Duration>,
    pub counts: OutcomeCounts,
    /// Process start to loop exit
    pub total_runtime: Duration,
}

impl RunReport {
    /// True only when the batch completed and nothing was lost or errored
    pub fn is_clean(&self) -> bool {
        self.status == BatchStatus::Completed
            && self.counts.lost == 0
            && self.counts.errored == 0
    }
}
