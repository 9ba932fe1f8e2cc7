//! Testing utilities for the scientist workspace
//!
//! Shared test helpers, fixtures and publishers.

#![allow(missing_docs)]

use parking_lot::Mutex;
use sci_core::{PublishError, ResultPublisher, ResultReport, RunOrder};
use sci_lab::{InMemoryPublisher, Laboratory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Error type for behaviors under test
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TestError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("bad argument: {0}")]
    Argument(String),
}

/// Publisher that always fails, counting attempts
#[derive(Debug, Default)]
pub struct FailingPublisher {
    attempts: AtomicUsize,
}

impl FailingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ResultPublisher for FailingPublisher {
    fn publish(&self, _report: &ResultReport) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PublishError::sink("failing", "sink unavailable"))
    }
}

/// Publisher that panics on every report
#[derive(Debug, Default, Clone, Copy)]
pub struct PanickingPublisher;

impl ResultPublisher for PanickingPublisher {
    fn publish(&self, _report: &ResultReport) -> Result<(), PublishError> {
        panic!("publisher exploded")
    }
}

/// Publisher that records experiment names in publish order
#[derive(Debug, Default)]
pub struct NameRecorder {
    names: Mutex<Vec<String>>,
}

impl NameRecorder {
    pub fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }
}

impl ResultPublisher for NameRecorder {
    fn publish(&self, report: &ResultReport) -> Result<(), PublishError> {
        self.names.lock().push(report.experiment_name.clone());
        Ok(())
    }
}

/// Laboratory with registration order and the given publisher
pub fn ordered_laboratory(publisher: Arc<dyn ResultPublisher>) -> Laboratory {
    Laboratory::new()
        .with_shared_publisher(publisher)
        .with_run_order(RunOrder::Registration)
}

/// Laboratory with a seeded order and the given publisher
pub fn seeded_laboratory(seed: u64, publisher: Arc<dyn ResultPublisher>) -> Laboratory {
    Laboratory::new()
        .with_shared_publisher(publisher)
        .with_run_order(RunOrder::Seeded(seed))
}

/// Registration-ordered laboratory publishing into a fresh in-memory store
pub fn recording_laboratory() -> (Laboratory, Arc<InMemoryPublisher>) {
    let publisher = Arc::new(InMemoryPublisher::new());
    (ordered_laboratory(publisher.clone()), publisher)
}
