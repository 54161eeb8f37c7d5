//! Batch and per-publish bookkeeping types
//!
//! A `Batch` is the set of messages issued by one timer firing. Each issued
//! message has a `PendingPublish` keyed by its 0-based index in the batch.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tokio::time::Instant;

/// 104-byte body repeated for every message; the index is appended per message
pub const DEFAULT_PAYLOAD_BODY: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZABCDEFGHIJKLMNOPQRSTUVWXYZABCDEFGHIJKLMNOPQRSTUVWXYZABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Terminal outcome reported by the broker for one publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Broker confirmed the message
    Acknowledged,
    /// Message will never be confirmed (nack, channel or connection gone)
    Lost,
    /// Publish failed with a protocol or validation error
    Errored(String),
}

impl PublishOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            PublishOutcome::Acknowledged => OutcomeKind::Acknowledged,
            PublishOutcome::Lost => OutcomeKind::Lost,
            PublishOutcome::Errored(_) => OutcomeKind::Errored,
        }
    }
}

/// Outcome without the error payload, for counting and comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Acknowledged,
    Lost,
    Errored,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutcomeKind::Acknowledged => "acknowledged",
            OutcomeKind::Lost => "lost",
            OutcomeKind::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// One outstanding publish within a batch
#[derive(Debug, Clone)]
pub struct PendingPublish {
    /// Position in the batch, used as correlation id
    pub index: usize,
    /// Payload size in bytes (the body itself is handed to the channel)
    pub payload_len: usize,
    /// `None` until the broker reports a terminal outcome
    pub outcome: Option<PublishOutcome>,
}

impl PendingPublish {
    pub fn new(index: usize, payload_len: usize) -> Self {
        Self {
            index,
            payload_len,
            outcome: None,
        }
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    /// Error text, present only for errored publishes
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Some(PublishOutcome::Errored(msg)) => Some(msg),
            _ => None,
        }
    }
}

/// Messages issued by one timer firing
#[derive(Debug, Clone)]
pub struct Batch {
    /// Number of messages, always >= 1
    pub size: usize,
    /// Taken immediately before the first publish is issued
    pub start_time: Instant,
    /// Exchange the batch publishes to
    pub exchange: String,
    /// Routing key (the declared queue name)
    pub target_queue: String,
}

impl Batch {
    pub fn new(size: usize, exchange: impl Into<String>, target_queue: impl Into<String>) -> Self {
        Self {
            size,
            start_time: Instant::now(),
            exchange: exchange.into(),
            target_queue: target_queue.into(),
        }
    }

    /// Index whose acknowledgment closes the batch under the default policy
    #[inline]
    pub fn last_index(&self) -> usize {
        self.size.saturating_sub(1)
    }
}

/// Per-outcome tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub acknowledged: usize,
    pub lost: usize,
    pub errored: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Acknowledged => self.acknowledged += 1,
            OutcomeKind::Lost => self.lost += 1,
            OutcomeKind::Errored => self.errored += 1,
        }
    }

    #[inline]
    pub fn resolved(&self) -> usize {
        self.acknowledged + self.lost + self.errored
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acknowledged={} lost={} errored={}",
            self.acknowledged, self.lost, self.errored
        )
    }
}

/// Fixed body with the message index appended
#[derive(Debug, Clone)]
pub struct PayloadTemplate {
    body: String,
}

impl PayloadTemplate {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    /// Render the payload for message `index`
    pub fn render(&self, index: usize) -> Bytes {
        let suffix = index.to_string();
        let mut buf = BytesMut::with_capacity(self.body.len() + suffix.len());
        buf.put_slice(self.body.as_bytes());
        buf.put_slice(suffix.as_bytes());
        buf.freeze()
    }
}

impl Default for PayloadTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_BODY)
    }
}
