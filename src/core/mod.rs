//! Core data model
//!
//! - BrokerAddress: validated connection string
//! - Batch / PendingPublish: per-batch publish bookkeeping
//! - LoadTestRun: process-level timing record

pub mod address;
pub mod batch;
pub mod run;

pub use address::{AddressError, BrokerAddress, Scheme};
pub use batch::{
    Batch, OutcomeCounts, OutcomeKind, PayloadTemplate, PendingPublish, PublishOutcome,
    DEFAULT_PAYLOAD_BODY,
};
pub use run::{LoadTestRun, RunReport};
