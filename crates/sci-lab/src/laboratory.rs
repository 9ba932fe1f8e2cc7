//! Laboratory context
//!
//! A [`Laboratory`] carries what every experiment run needs besides its own
//! definition: where results are published, how behaviors are ordered and
//! whether candidates run at all. Laboratories are cheap to clone.
//!
//! The process-wide laboratory used by [`science`](crate::science) and
//! [`science_async`](crate::science_async) lives behind
//! [`laboratory`] / [`set_laboratory`] / [`reset_laboratory`]. Run order and
//! the global switch are read when an experiment starts. The publisher is
//! read when the result is ready, so [`set_result_publisher`] also reaches
//! runs already in flight.

use crate::publishers::InMemoryPublisher;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use sci_core::{
    AsyncExperiment, AsyncExperimentBuilder, Experiment, ExperimentBuilder, PublishError,
    ResultPublisher, ResultReport, RunOptions, RunOrder, UsageError,
};
use std::fmt;
use std::sync::Arc;

/// Context for running experiments
#[derive(Clone)]
pub struct Laboratory {
    publisher: Arc<dyn ResultPublisher>,
    order: RunOrder,
    enabled: bool,
}

impl Laboratory {
    /// Create default laboratory
    ///
    /// Publishes into a fresh [`InMemoryPublisher`], shuffles randomly and
    /// runs candidates.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With result publisher
    #[must_use]
    pub fn with_publisher(self, publisher: impl ResultPublisher + 'static) -> Self {
        self.with_shared_publisher(Arc::new(publisher))
    }

    /// With shared result publisher
    #[inline]
    #[must_use]
    pub fn with_shared_publisher(mut self, publisher: Arc<dyn ResultPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// With start order policy
    #[inline]
    #[must_use]
    pub fn with_run_order(mut self, order: RunOrder) -> Self {
        self.order = order;
        self
    }

    /// With global switch; when off only controls run
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Result publisher
    #[inline]
    #[must_use]
    pub fn publisher(&self) -> &Arc<dyn ResultPublisher> {
        &self.publisher
    }

    /// Start order policy
    #[inline]
    #[must_use]
    pub fn run_order(&self) -> RunOrder {
        self.order
    }

    /// Check if candidates run
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Options handed to each run
    #[inline]
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions::new()
            .with_order(self.order)
            .with_enabled(self.enabled)
    }

    /// Run a finalized experiment and publish its result
    ///
    /// # Errors
    /// Returns the control's error.
    pub fn run<T: fmt::Debug, E: fmt::Debug + fmt::Display>(
        &self,
        experiment: Experiment<'_, T, E>,
    ) -> Result<T, E> {
        experiment.run(self.run_options(), self.publisher.as_ref())
    }

    /// Run a finalized asynchronous experiment and publish its result
    ///
    /// # Errors
    /// Returns the control's error.
    pub async fn run_async<T: fmt::Debug, E: fmt::Debug + fmt::Display>(
        &self,
        experiment: AsyncExperiment<'_, T, E>,
    ) -> Result<T, E> {
        experiment
            .run(self.run_options(), self.publisher.as_ref())
            .await
    }

    /// Declare and run an experiment, reporting usage errors as values
    ///
    /// `configure` registers the control and candidates on a fresh builder.
    /// The outer `Result` carries declaration mistakes; the inner one is the
    /// control's outcome.
    ///
    /// # Errors
    /// Returns `UsageError` if the declaration is invalid. Nothing runs in
    /// that case.
    pub fn try_science<'a, T, E, F>(
        &self,
        name: impl Into<String>,
        configure: F,
    ) -> Result<Result<T, E>, UsageError>
    where
        T: PartialEq + fmt::Debug + 'a,
        E: fmt::Debug + fmt::Display + 'a,
        F: FnOnce(&mut ExperimentBuilder<'a, T, E>),
    {
        self.declare(ExperimentBuilder::new(name), configure)
    }

    /// Declare and run an experiment over values without `PartialEq`
    ///
    /// `configure` must install a `compare` or `comparer`.
    ///
    /// # Errors
    /// Returns `UsageError::MissingEquality` when it does not, or any other
    /// declaration mistake.
    pub fn try_science_by<'a, T, E, F>(
        &self,
        name: impl Into<String>,
        configure: F,
    ) -> Result<Result<T, E>, UsageError>
    where
        T: fmt::Debug + 'a,
        E: fmt::Debug + fmt::Display + 'a,
        F: FnOnce(&mut ExperimentBuilder<'a, T, E>),
    {
        self.declare(ExperimentBuilder::without_equality(name), configure)
    }

    /// Declare and run an experiment
    ///
    /// # Errors
    /// Returns the control's error.
    ///
    /// # Panics
    /// Panics if the declaration is invalid (see [`UsageError`]).
    pub fn science<'a, T, E, F>(&self, name: impl Into<String>, configure: F) -> Result<T, E>
    where
        T: PartialEq + fmt::Debug + 'a,
        E: fmt::Debug + fmt::Display + 'a,
        F: FnOnce(&mut ExperimentBuilder<'a, T, E>),
    {
        self.try_science(name, configure)
            .unwrap_or_else(|error| invalid_declaration(&error))
    }

    /// Declare and run an experiment over values without `PartialEq`
    ///
    /// # Errors
    /// Returns the control's error.
    ///
    /// # Panics
    /// Panics if the declaration is invalid, including when no comparison
    /// was configured.
    pub fn science_by<'a, T, E, F>(&self, name: impl Into<String>, configure: F) -> Result<T, E>
    where
        T: fmt::Debug + 'a,
        E: fmt::Debug + fmt::Display + 'a,
        F: FnOnce(&mut ExperimentBuilder<'a, T, E>),
    {
        self.try_science_by(name, configure)
            .unwrap_or_else(|error| invalid_declaration(&error))
    }

    /// Declare and run an asynchronous experiment, reporting usage errors as
    /// values
    ///
    /// # Errors
    /// Returns `UsageError` if the declaration is invalid.
    pub async fn try_science_async<'a, T, E, F>(
        &self,
        name: impl Into<String>,
        configure: F,
    ) -> Result<Result<T, E>, UsageError>
    where
        T: PartialEq + fmt::Debug + 'a,
        E: fmt::Debug + fmt::Display + 'a,
        F: FnOnce(&mut AsyncExperimentBuilder<'a, T, E>),
    {
        self.declare_async(AsyncExperimentBuilder::new(name), configure)
            .await
    }

    /// Declare and run an asynchronous experiment over values without
    /// `PartialEq`, reporting usage errors as values
    ///
    /// # Errors
    /// Returns `UsageError::MissingEquality` when no comparison was
    /// configured, or any other declaration mistake.
    pub async fn try_science_async_by<'a, T, E, F>(
        &self,
        name: impl Into<String>,
        configure: F,
    ) -> Result<Result<T, E>, UsageError>
    where
        T: fmt::Debug + 'a,
        E: fmt::Debug + fmt::Display + 'a,
        F: FnOnce(&mut AsyncExperimentBuilder<'a, T, E>),
    {
        self.declare_async(AsyncExperimentBuilder::without_equality(name), configure)
            .await
    }

    /// Declare and run an asynchronous experiment
    ///
    /// # Errors
    /// Returns the control's error.
    ///
    /// # Panics
    /// Panics if the declaration is invalid (see [`UsageError`]).
    pub async fn science_async<'a, T, E, F>(&self, name: impl Into<String>, configure: F) -> Result<T, E>
    where
        T: PartialEq + fmt::Debug + 'a,
        E: fmt::Debug + fmt::Display + 'a,
        F: FnOnce(&mut AsyncExperimentBuilder<'a, T, E>),
    {
        match self.try_science_async(name, configure).await {
            Ok(outcome) => outcome,
            Err(error) => invalid_declaration(&error),
        }
    }

    /// Declare and run an asynchronous experiment over values without
    /// `PartialEq`
    ///
    /// # Errors
    /// Returns the control's error.
    ///
    /// # Panics
    /// Panics if the declaration is invalid, including when no comparison
    /// was configured.
    pub async fn science_async_by<'a, T, E, F>(
        &self,
        name: impl Into<String>,
        configure: F,
    ) -> Result<T, E>
    where
        T: fmt::Debug + 'a,
        E: fmt::Debug + fmt::Display + 'a,
        F: FnOnce(&mut AsyncExperimentBuilder<'a, T, E>),
    {
        match self.try_science_async_by(name, configure).await {
            Ok(outcome) => outcome,
            Err(error) => invalid_declaration(&error),
        }
    }

    fn declare<'a, T, E, F>(
        &self,
        mut builder: ExperimentBuilder<'a, T, E>,
        configure: F,
    ) -> Result<Result<T, E>, UsageError>
    where
        T: fmt::Debug + 'a,
        E: fmt::Debug + fmt::Display + 'a,
        F: FnOnce(&mut ExperimentBuilder<'a, T, E>),
    {
        configure(&mut builder);
        let experiment = builder.build()?;
        Ok(self.run(experiment))
    }

    async fn declare_async<'a, T, E, F>(
        &self,
        mut builder: AsyncExperimentBuilder<'a, T, E>,
        configure: F,
    ) -> Result<Result<T, E>, UsageError>
    where
        T: fmt::Debug + 'a,
        E: fmt::Debug + fmt::Display + 'a,
        F: FnOnce(&mut AsyncExperimentBuilder<'a, T, E>),
    {
        configure(&mut builder);
        let experiment = builder.build()?;
        Ok(self.run_async(experiment).await)
    }
}

impl Default for Laboratory {
    fn default() -> Self {
        Self {
            publisher: Arc::new(InMemoryPublisher::new()),
            order: RunOrder::Random,
            enabled: true,
        }
    }
}

impl fmt::Debug for Laboratory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Laboratory")
            .field("order", &self.order)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

fn invalid_declaration(error: &UsageError) -> ! {
    tracing::error!(%error, "invalid experiment declaration");
    panic!("invalid experiment declaration: {error}")
}

static LABORATORY: Lazy<RwLock<Laboratory>> = Lazy::new(|| RwLock::new(Laboratory::new()));

/// Current process-wide laboratory
#[must_use]
pub fn laboratory() -> Laboratory {
    LABORATORY.read().clone()
}

/// Forwards to the process-wide publisher installed at publish time
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CurrentPublisher;

impl ResultPublisher for CurrentPublisher {
    fn publish(&self, report: &ResultReport) -> Result<(), PublishError> {
        // Clone out so the lock is not held while the sink runs.
        let publisher = Arc::clone(&LABORATORY.read().publisher);
        publisher.publish(report)
    }
}

/// Process-wide laboratory whose publisher is resolved per result
///
/// Run order and the global switch are taken now; the publisher is looked
/// up again when the result is ready.
pub(crate) fn current_laboratory() -> Laboratory {
    laboratory().with_publisher(CurrentPublisher)
}

/// Replace the process-wide laboratory
pub fn set_laboratory(laboratory: Laboratory) {
    *LABORATORY.write() = laboratory;
}

/// Replace the process-wide result publisher, keeping the other settings
pub fn set_result_publisher(publisher: impl ResultPublisher + 'static) {
    LABORATORY.write().publisher = Arc::new(publisher);
}

/// Restore the default process-wide laboratory
pub fn reset_laboratory() {
    set_laboratory(Laboratory::new());
}
