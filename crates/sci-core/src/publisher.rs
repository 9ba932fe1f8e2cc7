//! Result publishing boundary
//!
//! Provides the [`ResultPublisher`] trait. Implementations live outside the
//! core; the core only guarantees that every run publishes exactly once and
//! that a failing publisher never changes what the caller observes.

use crate::error::PublishError;
use crate::result::ResultReport;
use std::sync::Arc;

/// Sink for experiment results
///
/// Called once per experiment run, on the caller's thread or task, after all
/// candidates have been classified. Implementations should be quick; slow
/// work belongs on a queue owned by the publisher.
pub trait ResultPublisher: Send + Sync {
    /// Publish a result
    ///
    /// # Errors
    /// Returns `PublishError` if the sink fails. The error is isolated and
    /// reported out of band.
    fn publish(&self, report: &ResultReport) -> Result<(), PublishError>;
}

impl<P: ResultPublisher + ?Sized> ResultPublisher for Arc<P> {
    fn publish(&self, report: &ResultReport) -> Result<(), PublishError> {
        (**self).publish(report)
    }
}

impl<P: ResultPublisher + ?Sized> ResultPublisher for &P {
    fn publish(&self, report: &ResultReport) -> Result<(), PublishError> {
        (**self).publish(report)
    }
}
