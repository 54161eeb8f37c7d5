//! Confirmation Tracker
//!
//! Correlates every publish of a batch with exactly one terminal outcome and
//! decides when the batch is complete.
//!
//! Pending entries live in a pre-allocated Vec indexed by correlation id, so
//! lookups are O(1) and there is no shared mutable capture between indices.
//!
//! Completion is tied to the last index by default: the batch is complete as
//! soon as index `size - 1` is acknowledged, whatever the state of the others.
//! This assumes the last message issued is also the last one confirmed, which
//! brokers do not guarantee. A lost or errored last index never completes the
//! batch under that policy. `CompletionPolicy::AllResolved` switches to a
//! counted tally instead.

use crate::core::{Batch, OutcomeCounts, OutcomeKind, PendingPublish, PublishOutcome};
use crate::log_publish;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::Level;

/// When a batch counts as complete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionPolicy {
    /// Complete when index `size - 1` is acknowledged
    #[default]
    LastIndexAcknowledged,
    /// Complete when every index has any terminal outcome
    AllResolved,
}

/// Result of feeding one outcome into the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Batch still waiting
    InFlight,
    /// This outcome completed the batch
    Complete { elapsed: Duration },
    /// Outcome recorded after the batch had already completed
    Drained,
}

/// Bookkeeping violations; none of them alter tracker state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("index {index} outside batch of {size}")]
    UnknownIndex { index: usize, size: usize },
    #[error("index {index} was never issued")]
    NotIssued { index: usize },
    #[error("publishes must be issued in order: expected {expected}, got {got}")]
    OutOfOrder { expected: usize, got: usize },
    #[error("index {index} already resolved as {previous}")]
    AlreadyResolved { index: usize, previous: OutcomeKind },
}

/// Per-batch confirmation state
pub struct ConfirmationTracker {
    batch: Batch,
    policy: CompletionPolicy,
    /// Indexed by correlation id, pre-allocated to batch size
    pending: Vec<PendingPublish>,
    counts: OutcomeCounts,
    completed_after: Option<Duration>,
}

impl ConfirmationTracker {
    /// Create tracker with storage pre-allocated for the whole batch
    pub fn new(batch: Batch, policy: CompletionPolicy) -> Self {
        Self {
            pending: Vec::with_capacity(batch.size),
            batch,
            policy,
            counts: OutcomeCounts::default(),
            completed_after: None,
        }
    }

    /// Register the next publish; indices must arrive in order 0, 1, 2, ...
    pub fn register(&mut self, index: usize, payload_len: usize) -> Result<(), TrackerError> {
        if index >= self.batch.size {
            return Err(TrackerError::UnknownIndex {
                index,
                size: self.batch.size,
            });
        }
        let expected = self.pending.len();
        if index != expected {
            return Err(TrackerError::OutOfOrder {
                expected,
                got: index,
            });
        }
        self.pending.push(PendingPublish::new(index, payload_len));
        Ok(())
    }

    /// Broker confirmed message `index`
    pub fn on_acknowledged(&mut self, index: usize) -> Result<Progress, TrackerError> {
        self.resolve(index, PublishOutcome::Acknowledged)
    }

    /// Message `index` will never be confirmed
    pub fn on_lost(&mut self, index: usize) -> Result<Progress, TrackerError> {
        self.resolve(index, PublishOutcome::Lost)
    }

    /// Publish of message `index` failed
    pub fn on_errored(&mut self, index: usize, message: &str) -> Result<Progress, TrackerError> {
        self.resolve(index, PublishOutcome::Errored(message.to_string()))
    }

    /// Dispatch an outcome to the matching callback
    pub fn handle(&mut self, index: usize, outcome: PublishOutcome) -> Result<Progress, TrackerError> {
        match outcome {
            PublishOutcome::Acknowledged => self.on_acknowledged(index),
            PublishOutcome::Lost => self.on_lost(index),
            PublishOutcome::Errored(message) => self.on_errored(index, &message),
        }
    }

    /// Record the terminal outcome of `index` exactly once
    fn resolve(&mut self, index: usize, outcome: PublishOutcome) -> Result<Progress, TrackerError> {
        if index >= self.batch.size {
            return Err(TrackerError::UnknownIndex {
                index,
                size: self.batch.size,
            });
        }
        let entry = self
            .pending
            .get_mut(index)
            .ok_or(TrackerError::NotIssued { index })?;

        if let Some(previous) = &entry.outcome {
            return Err(TrackerError::AlreadyResolved {
                index,
                previous: previous.kind(),
            });
        }

        match &outcome {
            PublishOutcome::Acknowledged => log_publish!(Level::DEBUG, index, "Got ack on {}", index),
            PublishOutcome::Lost => log_publish!(Level::WARN, index, "Got LOST on {}", index),
            PublishOutcome::Errored(message) => {
                log_publish!(Level::WARN, index, "Got ERROR on {} : message = {}", index, message)
            }
        }

        let kind = outcome.kind();
        entry.outcome = Some(outcome);
        self.counts.record(kind);

        if self.completed_after.is_some() {
            return Ok(Progress::Drained);
        }

        if self.completes(index, kind) {
            let elapsed = self.batch.start_time.elapsed();
            self.completed_after = Some(elapsed);
            match self.policy {
                CompletionPolicy::LastIndexAcknowledged => log_publish!(
                    Level::INFO,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Got ACK on all publishes in {} ms",
                    elapsed.as_millis()
                ),
                CompletionPolicy::AllResolved => log_publish!(
                    Level::INFO,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "All publishes resolved in {} ms ({})",
                    elapsed.as_millis(),
                    self.counts
                ),
            }
            return Ok(Progress::Complete { elapsed });
        }

        Ok(Progress::InFlight)
    }

    fn completes(&self, index: usize, kind: OutcomeKind) -> bool {
        match self.policy {
            CompletionPolicy::LastIndexAcknowledged => {
                kind == OutcomeKind::Acknowledged && index == self.batch.last_index()
            }
            CompletionPolicy::AllResolved => self.counts.resolved() == self.batch.size,
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completed_after.is_some()
    }

    /// Time from batch start to the completing outcome
    #[inline]
    pub fn completed_after(&self) -> Option<Duration> {
        self.completed_after
    }

    #[inline]
    pub fn counts(&self) -> OutcomeCounts {
        self.counts
    }

    /// Number of publishes registered so far
    #[inline]
    pub fn issued(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self, index: usize) -> Option<&PendingPublish> {
        self.pending.get(index)
    }

    /// Issued indices still waiting for an outcome
    pub fn unresolved(&self) -> impl Iterator<Item = usize> + '_ {
        self.pending
            .iter()
            .filter(|p| !p.is_resolved())
            .map(|p| p.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Collects the formatted message of every event
    #[derive(Clone, Default)]
    struct MessageLog(Arc<Mutex<Vec<String>>>);

    struct MessageVisitor<'a>(&'a mut String);

    impl tracing::field::Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                *self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for MessageLog {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            if let Ok(mut lines) = self.0.lock() {
                lines.push(message);
            }
        }
    }

    impl MessageLog {
        fn lines(&self) -> Vec<String> {
            self.0.lock().map(|l| l.clone()).unwrap_or_default()
        }

        fn capture(&self, f: impl FnOnce()) {
            let subscriber = tracing_subscriber::registry().with(self.clone());
            tracing::subscriber::with_default(subscriber, f);
        }
    }

    fn tracker(size: usize, policy: CompletionPolicy) -> ConfirmationTracker {
        let mut tracker = ConfirmationTracker::new(Batch::new(size, "loadtest", "amq.gen-test"), policy);
        for i in 0..size {
            tracker.register(i, 105).unwrap();
        }
        tracker
    }

    #[test]
    fn test_single_message_batch_completes_on_ack() {
        let mut t = tracker(1, CompletionPolicy::LastIndexAcknowledged);
        let progress = t.on_acknowledged(0).unwrap();

        assert!(matches!(progress, Progress::Complete { .. }));
        assert!(t.is_complete());
        assert_eq!(t.counts().acknowledged, 1);
    }

    #[test]
    fn test_last_index_ack_completes_before_others() {
        let mut t = tracker(5, CompletionPolicy::LastIndexAcknowledged);
        assert_eq!(t.on_acknowledged(0).unwrap(), Progress::InFlight);
        assert_eq!(t.on_acknowledged(1).unwrap(), Progress::InFlight);

        // 4 is confirmed while 2 and 3 are still pending
        assert!(matches!(t.on_acknowledged(4).unwrap(), Progress::Complete { .. }));
        assert_eq!(t.unresolved().collect::<Vec<_>>(), vec![2, 3]);

        // Late outcomes are still recorded, never complete twice
        assert_eq!(t.on_lost(2).unwrap(), Progress::Drained);
        assert_eq!(t.on_acknowledged(3).unwrap(), Progress::Drained);
        assert_eq!(t.counts().resolved(), 5);
    }

    #[test]
    fn test_lost_last_index_never_completes() {
        let mut t = tracker(3, CompletionPolicy::LastIndexAcknowledged);
        t.on_acknowledged(0).unwrap();
        t.on_acknowledged(1).unwrap();
        assert_eq!(t.on_lost(2).unwrap(), Progress::InFlight);

        assert!(!t.is_complete());
        assert_eq!(t.counts().resolved(), 3);
    }

    #[test]
    fn test_all_resolved_policy_counts_every_outcome() {
        let mut t = tracker(3, CompletionPolicy::AllResolved);
        assert_eq!(t.on_acknowledged(2).unwrap(), Progress::InFlight);
        assert_eq!(t.on_errored(0, "PRECONDITION_FAILED").unwrap(), Progress::InFlight);
        assert!(matches!(t.on_lost(1).unwrap(), Progress::Complete { .. }));
        assert_eq!(
            t.pending(0).and_then(|p| p.error_message()),
            Some("PRECONDITION_FAILED")
        );
    }

    #[test]
    fn test_double_resolution_rejected() {
        let mut t = tracker(2, CompletionPolicy::LastIndexAcknowledged);
        t.on_lost(0).unwrap();

        let err = t.on_acknowledged(0).unwrap_err();
        assert_eq!(
            err,
            TrackerError::AlreadyResolved {
                index: 0,
                previous: OutcomeKind::Lost
            }
        );
        assert_eq!(t.counts().resolved(), 1);
        assert_eq!(t.counts().acknowledged, 0);
    }

    #[test]
    fn test_register_enforces_order_and_bounds() {
        let mut t = ConfirmationTracker::new(
            Batch::new(2, "loadtest", "q"),
            CompletionPolicy::LastIndexAcknowledged,
        );
        assert_eq!(
            t.register(1, 10),
            Err(TrackerError::OutOfOrder { expected: 0, got: 1 })
        );
        t.register(0, 10).unwrap();
        t.register(1, 10).unwrap();
        assert_eq!(
            t.register(2, 10),
            Err(TrackerError::UnknownIndex { index: 2, size: 2 })
        );
        assert_eq!(t.issued(), 2);
    }

    #[test]
    fn test_resolve_unissued_index() {
        let mut t = ConfirmationTracker::new(
            Batch::new(3, "loadtest", "q"),
            CompletionPolicy::LastIndexAcknowledged,
        );
        t.register(0, 10).unwrap();
        assert_eq!(t.on_acknowledged(1), Err(TrackerError::NotIssued { index: 1 }));
        assert_eq!(
            t.on_acknowledged(7),
            Err(TrackerError::UnknownIndex { index: 7, size: 3 })
        );
    }

    #[test]
    fn test_rejected_outcomes_are_not_logged() {
        let log = MessageLog::default();
        log.capture(|| {
            let mut t = tracker(2, CompletionPolicy::LastIndexAcknowledged);
            t.on_acknowledged(0).unwrap();
            assert!(t.on_lost(0).is_err());
            assert!(t.on_errored(0, "late").is_err());
            assert!(t.on_acknowledged(9).is_err());
        });

        assert_eq!(log.lines(), vec!["Got ack on 0".to_string()]);
    }

    #[test]
    fn test_completion_message_follows_policy() {
        let log = MessageLog::default();
        log.capture(|| {
            let mut t = tracker(2, CompletionPolicy::AllResolved);
            t.on_acknowledged(0).unwrap();
            t.on_lost(1).unwrap();
        });
        let lines = log.lines();
        assert!(lines
            .iter()
            .any(|l| l.starts_with("All publishes resolved in") && l.contains("lost=1")));
        assert!(!lines.iter().any(|l| l.starts_with("Got ACK on all")));

        let log = MessageLog::default();
        log.capture(|| {
            let mut t = tracker(1, CompletionPolicy::LastIndexAcknowledged);
            t.on_acknowledged(0).unwrap();
        });
        assert!(log.lines().iter().any(|l| l.starts_with("Got ACK on all publishes in")));
    }

    fn outcome_from(code: u8) -> PublishOutcome {
        match code {
            0 => PublishOutcome::Acknowledged,
            1 => PublishOutcome::Lost,
            _ => PublishOutcome::Errored("rejected".to_string()),
        }
    }

    fn batch_strategy() -> impl Strategy<Value = (Vec<usize>, Vec<u8>)> {
        (1usize..200).prop_flat_map(|n| {
            (
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
                proptest::collection::vec(0u8..3, n),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_every_index_resolves_exactly_once((order, codes) in batch_strategy()) {
            let n = order.len();
            let mut t = tracker(n, CompletionPolicy::AllResolved);
            let mut completions = 0;

            for &index in &order {
                let progress = t.handle(index, outcome_from(codes[index])).unwrap();
                if matches!(progress, Progress::Complete { .. }) {
                    completions += 1;
                }
            }

            prop_assert_eq!(t.counts().resolved(), n);
            prop_assert_eq!(t.unresolved().count(), 0);
            prop_assert_eq!(completions, 1);

            for index in 0..n {
                let second = t.handle(index, PublishOutcome::Acknowledged);
                let is_already_resolved = matches!(second, Err(TrackerError::AlreadyResolved { .. }));
                prop_assert!(is_already_resolved);
            }
            prop_assert_eq!(t.counts().resolved(), n);
        }

        #[test]
        fn prop_last_ack_completes_regardless_of_order(order in (1usize..100).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())) {
            let n = order.len();
            let mut t = tracker(n, CompletionPolicy::LastIndexAcknowledged);

            for &index in &order {
                let progress = t.on_acknowledged(index).unwrap();
                let completed = matches!(progress, Progress::Complete { .. });
                prop_assert_eq!(completed, index == n - 1);
            }
            prop_assert!(t.is_complete());
        }
    }
}
