//! Experiment execution
//!
//! Runs the control and every eligible candidate exactly once, classifies the
//! candidates and assembles the [`ExperimentResult`].
//!
//! # Modes
//!
//! - Synchronous experiments run behaviors one after another on the caller's
//!   thread; latency is the sum of all behaviors.
//! - Asynchronous experiments start every behavior and await them jointly on
//!   the caller's task; latency is the slowest behavior. An optional limit
//!   caps how many are in flight.
//!
//! In both modes the start order is shuffled once per run according to the
//! [`RunOrder`], so no behavior systematically benefits from going first.

use crate::error::{Operation, OperationFailure, PublishError};
use crate::experiment::{AsyncExperiment, Experiment, Settings};
use crate::observation::{panic_message, Observation};
use crate::publisher::ResultPublisher;
use crate::result::{Classification, ExperimentResult, CONTROL_NAME};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::Semaphore;

/// Start order policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunOrder {
    /// Fresh random order on every run
    #[default]
    Random,
    /// Deterministic order derived from a seed
    Seeded(u64),
    /// Control first, then candidates in registration order
    Registration,
}

impl RunOrder {
    /// Shuffle candidates in place and pick the control's position
    ///
    /// Returns the number of candidates that start before the control
    /// (`0..=candidates.len()`). Shuffling the candidates and inserting the
    /// control at a uniform position yields a uniform order over all units.
    pub fn arrange<U>(&self, candidates: &mut [U]) -> usize {
        match self {
            Self::Random => Self::shuffle(&mut rand::thread_rng(), candidates),
            Self::Seeded(seed) => Self::shuffle(&mut StdRng::seed_from_u64(*seed), candidates),
            Self::Registration => 0,
        }
    }

    fn shuffle<R: Rng + ?Sized, U>(rng: &mut R, candidates: &mut [U]) -> usize {
        candidates.shuffle(rng);
        rng.gen_range(0..=candidates.len())
    }
}

/// Per-run options supplied by the caller's laboratory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Start order policy
    pub order: RunOrder,
    /// Global switch; when off only the control runs
    pub enabled: bool,
}

impl RunOptions {
    /// Random order, enabled
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With start order policy
    #[inline]
    #[must_use]
    pub fn with_order(mut self, order: RunOrder) -> Self {
        self.order = order;
        self
    }

    /// With global switch
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            order: RunOrder::Random,
            enabled: true,
        }
    }
}

type Queue<B> = Vec<(usize, String, B)>;

/// Pair candidates with their registration index and arrange them
fn plan<B>(candidates: Vec<(String, B)>, order: RunOrder) -> (Queue<B>, Queue<B>) {
    let mut early: Queue<B> = candidates
        .into_iter()
        .enumerate()
        .map(|(index, (name, behavior))| (index, name, behavior))
        .collect();
    let control_at = order.arrange(&mut early);
    let late = early.split_off(control_at);
    (early, late)
}

fn start_order<B>(early: &Queue<B>, late: &Queue<B>) -> Vec<String> {
    early
        .iter()
        .map(|(_, name, _)| name.clone())
        .chain(std::iter::once(CONTROL_NAME.to_string()))
        .chain(late.iter().map(|(_, name, _)| name.clone()))
        .collect()
}

impl<T, E> Settings<'_, T, E> {
    fn failure(
        &self,
        operation: Operation,
        candidate: Option<&str>,
        message: impl Into<String>,
    ) -> OperationFailure {
        OperationFailure::new(&self.name, operation, candidate, message)
    }

    /// Decide whether candidates run; consumes the run-if predicate
    fn should_run(&mut self, options: RunOptions, failures: &mut Vec<OperationFailure>) -> bool {
        if !options.enabled {
            return false;
        }
        let Some(run_if) = self.run_if.take() else {
            return true;
        };
        match panic::catch_unwind(AssertUnwindSafe(run_if)) {
            Ok(run) => run,
            Err(payload) => {
                failures.push(self.failure(Operation::RunIf, None, panic_message(payload.as_ref())));
                false
            }
        }
    }

    fn run_before(&mut self, failures: &mut Vec<OperationFailure>) {
        if let Some(hook) = self.before_run.take() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                failures.push(self.failure(Operation::BeforeRun, None, panic_message(payload.as_ref())));
            }
        }
    }

    /// Check ignore rules; only value pairs can be ignored
    fn is_ignored(
        &self,
        control: &Observation<T, E>,
        candidate: &Observation<T, E>,
        failures: &mut Vec<OperationFailure>,
    ) -> bool {
        let (Some(c), Some(d)) = (control.value(), candidate.value()) else {
            return false;
        };
        for rule in &self.ignores {
            match panic::catch_unwind(AssertUnwindSafe(|| rule(c, d))) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(payload) => failures.push(self.failure(
                    Operation::Ignore,
                    Some(candidate.name()),
                    panic_message(payload.as_ref()),
                )),
            }
        }
        false
    }

    fn classify(
        &self,
        control: &Observation<T, E>,
        candidate: &Observation<T, E>,
        failures: &mut Vec<OperationFailure>,
    ) -> Classification {
        let equal = match self.comparator.compare(control, candidate) {
            Ok(equal) => equal,
            Err(err) => {
                failures.push(self.failure(Operation::Compare, Some(candidate.name()), err.to_string()));
                false
            }
        };

        if equal {
            Classification::Matched
        } else if self.is_ignored(control, candidate, failures) {
            Classification::Ignored
        } else {
            Classification::Mismatched
        }
    }

    fn clean(&self, observation: &mut Observation<T, E>, failures: &mut Vec<OperationFailure>) {
        let Some(cleaner) = &self.cleaner else {
            return;
        };
        let Some(cleaned) = observation
            .value()
            .map(|value| panic::catch_unwind(AssertUnwindSafe(|| cleaner(value))))
        else {
            return;
        };
        match cleaned {
            Ok(cleaned) => observation.set_cleaned(cleaned),
            Err(payload) => failures.push(self.failure(
                Operation::Clean,
                Some(observation.name()),
                panic_message(payload.as_ref()),
            )),
        }
    }

    /// Deliver a failure to the thrown handler, or log it
    fn notify(&self, failure: &OperationFailure) {
        let Some(handler) = &self.on_thrown else {
            tracing::warn!(
                experiment = %failure.experiment,
                operation = %failure.operation,
                candidate = ?failure.candidate,
                "{}",
                failure.message
            );
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(failure))) {
            tracing::error!(
                experiment = %failure.experiment,
                "thrown handler panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }

    /// Classify candidates and assemble the result
    fn assemble(
        &self,
        mut control: Observation<T, E>,
        mut candidates: Vec<(usize, Observation<T, E>)>,
        mut failures: Vec<OperationFailure>,
        gated: bool,
    ) -> ExperimentResult<T, E> {
        candidates.sort_by_key(|(index, _)| *index);

        self.clean(&mut control, &mut failures);
        let classified = candidates
            .into_iter()
            .map(|(_, mut candidate)| {
                self.clean(&mut candidate, &mut failures);
                let class = self.classify(&control, &candidate, &mut failures);
                tracing::debug!(
                    experiment = %self.name,
                    candidate = %candidate.name(),
                    classification = ?class,
                    "candidate classified"
                );
                (candidate, class)
            })
            .collect();

        for failure in &failures {
            self.notify(failure);
        }

        ExperimentResult::new(
            self.name.clone(),
            control,
            classified,
            self.contexts.clone(),
            failures,
            gated,
        )
    }
}

impl<T: fmt::Debug, E: fmt::Debug + fmt::Display> Settings<'_, T, E> {
    /// Publish exactly once; failures never reach the caller
    fn publish(&self, result: &mut ExperimentResult<T, E>, publisher: &dyn ResultPublisher) {
        let report = result.report();
        let message = match panic::catch_unwind(AssertUnwindSafe(|| publisher.publish(&report))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(payload) => PublishError::Panicked(panic_message(payload.as_ref())).to_string(),
        };
        let failure = self.failure(Operation::Publish, None, message);
        self.notify(&failure);
        result.push_failure(failure);
    }
}

impl<'a, T: fmt::Debug, E: fmt::Debug + fmt::Display> Experiment<'a, T, E> {
    /// Run behaviors and classify, without publishing
    ///
    /// Behaviors run one after another in the arranged order.
    #[must_use]
    pub fn conduct(self, options: RunOptions) -> ExperimentResult<T, E> {
        self.execute(options).1
    }

    /// Run, publish, and return the control's outcome
    ///
    /// The control's error is returned verbatim; a control panic is resumed
    /// after publishing. Candidate and publisher failures never reach the
    /// caller.
    ///
    /// # Errors
    /// Returns the control's error.
    pub fn run(self, options: RunOptions, publisher: &dyn ResultPublisher) -> Result<T, E> {
        let (settings, mut result) = self.execute(options);
        settings.publish(&mut result, publisher);
        result.into_control().into_result()
    }

    fn execute(self, options: RunOptions) -> (Settings<'a, T, E>, ExperimentResult<T, E>) {
        let Self {
            mut settings,
            control,
            candidates,
            ..
        } = self;
        let mut failures = Vec::new();

        if !settings.should_run(options, &mut failures) {
            tracing::debug!(experiment = %settings.name, "candidates gated off");
            let control = Observation::observe(CONTROL_NAME, control);
            let result = settings.assemble(control, Vec::new(), failures, true);
            return (settings, result);
        }
        if !candidates.is_empty() {
            settings.run_before(&mut failures);
        }

        let (early, late) = plan(candidates, options.order);
        tracing::debug!(
            experiment = %settings.name,
            order = ?start_order(&early, &late),
            "running behaviors sequentially"
        );

        let mut observed = Vec::with_capacity(early.len() + late.len());
        for (index, name, behavior) in early {
            observed.push((index, Observation::observe(name, behavior)));
        }
        let control = Observation::observe(CONTROL_NAME, control);
        for (index, name, behavior) in late {
            observed.push((index, Observation::observe(name, behavior)));
        }

        let result = settings.assemble(control, observed, failures, false);
        (settings, result)
    }
}

impl<'a, T: fmt::Debug, E: fmt::Debug + fmt::Display> AsyncExperiment<'a, T, E> {
    /// Run behaviors concurrently and classify, without publishing
    pub async fn conduct(self, options: RunOptions) -> ExperimentResult<T, E> {
        self.execute(options).await.1
    }

    /// Run concurrently, publish, and return the control's outcome
    ///
    /// # Errors
    /// Returns the control's error.
    pub async fn run(self, options: RunOptions, publisher: &dyn ResultPublisher) -> Result<T, E> {
        let (settings, mut result) = self.execute(options).await;
        settings.publish(&mut result, publisher);
        result.into_control().into_result()
    }

    async fn execute(self, options: RunOptions) -> (Settings<'a, T, E>, ExperimentResult<T, E>) {
        let Self {
            mut settings,
            control,
            candidates,
            max_concurrency,
        } = self;
        let mut failures = Vec::new();

        if !settings.should_run(options, &mut failures) {
            tracing::debug!(experiment = %settings.name, "candidates gated off");
            let control = Observation::observe_async(CONTROL_NAME, control).await;
            let result = settings.assemble(control, Vec::new(), failures, true);
            return (settings, result);
        }
        if !candidates.is_empty() {
            settings.run_before(&mut failures);
        }

        let (early, late) = plan(candidates, options.order);
        tracing::debug!(
            experiment = %settings.name,
            order = ?start_order(&early, &late),
            max_concurrency = ?max_concurrency,
            "running behaviors concurrently"
        );

        // Permits are granted in request order, which is the arranged order.
        let permits = max_concurrency.map_or(Semaphore::MAX_PERMITS, |n| n.min(Semaphore::MAX_PERMITS));
        let limit = Semaphore::new(permits);
        let (mut observed, control, late_observed) = futures::join!(
            join_all(early.into_iter().map(|unit| admitted(&limit, unit))),
            async {
                let _permit = limit.acquire().await.ok();
                Observation::observe_async(CONTROL_NAME, control).await
            },
            join_all(late.into_iter().map(|unit| admitted(&limit, unit))),
        );
        observed.extend(late_observed);

        let result = settings.assemble(control, observed, failures, false);
        (settings, result)
    }
}

/// Observe a candidate once a permit is available
async fn admitted<T, E, F, Fut>(
    limit: &Semaphore,
    (index, name, behavior): (usize, String, F),
) -> (usize, Observation<T, E>)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let _permit = limit.acquire().await.ok();
    (index, Observation::observe_async(name, behavior).await)
}
