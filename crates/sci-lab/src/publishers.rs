//! Provided result publishers
//!
//! - [`InMemoryPublisher`]: bounded retention with an inspection API
//! - [`NoopPublisher`]: discards everything
//! - [`TracingPublisher`]: structured `tracing` events
//! - [`FanoutPublisher`]: forwards to several sinks, each isolated

use parking_lot::Mutex;
use sci_core::{panic_message, PublishError, ResultPublisher, ResultReport};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Default number of reports kept by [`InMemoryPublisher`]
pub const DEFAULT_RETENTION: usize = 1024;

/// Keeps the most recent reports in memory
///
/// Oldest reports are evicted once `capacity` is reached.
#[derive(Debug)]
pub struct InMemoryPublisher {
    capacity: usize,
    inner: Mutex<VecDeque<ResultReport>>,
}

impl InMemoryPublisher {
    /// Create with [`DEFAULT_RETENTION`]
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RETENTION)
    }

    /// Create with an explicit retention (at least one report)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_RETENTION))),
        }
    }

    /// Retention limit
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained reports, oldest first
    pub fn reports(&self) -> Vec<ResultReport> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Retained reports for one experiment, oldest first
    pub fn reports_for(&self, experiment: &str) -> Vec<ResultReport> {
        self.inner
            .lock()
            .iter()
            .filter(|r| r.experiment_name == experiment)
            .cloned()
            .collect()
    }

    /// Most recent report
    pub fn latest(&self) -> Option<ResultReport> {
        self.inner.lock().back().cloned()
    }

    /// Retained reports with at least one mismatch
    pub fn mismatches(&self) -> Vec<ResultReport> {
        self.inner
            .lock()
            .iter()
            .filter(|r| r.has_mismatches())
            .cloned()
            .collect()
    }

    /// Number of retained reports
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop every retained report
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultPublisher for InMemoryPublisher {
    fn publish(&self, report: &ResultReport) -> Result<(), PublishError> {
        let mut guard = self.inner.lock();
        while guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(report.clone());
        Ok(())
    }
}

/// Discards every report
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl ResultPublisher for NoopPublisher {
    fn publish(&self, _report: &ResultReport) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Emits one `tracing` event per report
///
/// Mismatches are logged at `info`, failed auxiliary operations at `warn`,
/// everything else at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

impl ResultPublisher for TracingPublisher {
    fn publish(&self, report: &ResultReport) -> Result<(), PublishError> {
        if report.has_mismatches() {
            tracing::info!(
                experiment = %report.experiment_name,
                mismatched = ?report.mismatched,
                matched = report.matched.len(),
                ignored = report.ignored.len(),
                control_us = u64::try_from(report.control.duration.as_micros()).unwrap_or(u64::MAX),
                "experiment mismatch"
            );
        } else {
            tracing::debug!(
                experiment = %report.experiment_name,
                candidates = report.candidates.len(),
                ignored = report.ignored.len(),
                gated = report.gated,
                "experiment matched"
            );
        }
        for failure in &report.operation_failures {
            tracing::warn!(
                experiment = %failure.experiment,
                operation = %failure.operation,
                candidate = ?failure.candidate,
                "{}",
                failure.message
            );
        }
        Ok(())
    }
}

/// Forwards each report to several publishers
///
/// Every sink sees every report; a failing or panicking sink does not stop
/// the others. Failures are combined into one error.
#[derive(Default)]
pub struct FanoutPublisher {
    sinks: Vec<Arc<dyn ResultPublisher>>,
}

impl FanoutPublisher {
    /// Create without sinks
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With an additional sink
    #[must_use]
    pub fn with(mut self, sink: impl ResultPublisher + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// With an additional shared sink
    #[must_use]
    pub fn with_shared(mut self, sink: Arc<dyn ResultPublisher>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of sinks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Check if there are no sinks
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanoutPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutPublisher")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl ResultPublisher for FanoutPublisher {
    fn publish(&self, report: &ResultReport) -> Result<(), PublishError> {
        let failures: Vec<String> = self
            .sinks
            .iter()
            .enumerate()
            .filter_map(|(index, sink)| {
                match panic::catch_unwind(AssertUnwindSafe(|| sink.publish(report))) {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(format!("sink {index}: {err}")),
                    Err(payload) => Some(format!(
                        "sink {index} panicked: {}",
                        panic_message(payload.as_ref())
                    )),
                }
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PublishError::sink("fanout", failures.join("; ")))
        }
    }
}
