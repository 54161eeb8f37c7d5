//! Publish/confirm path
//!
//! This module contains the only stateful part of the harness:
//! - Confirmation tracking (one terminal outcome per publish)
//! - Batch timing and issuing

pub mod driver;
pub mod tracker;

pub use driver::{BatchDriver, BatchReport, BatchStatus, DriverSettings};
pub use tracker::{CompletionPolicy, ConfirmationTracker, Progress, TrackerError};
