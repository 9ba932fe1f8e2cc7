//! Experiment definitions
//!
//! An experiment is declared through a [`Builder`] and finalized with
//! [`Builder::build`] into an immutable [`Definition`]. Two flavours exist,
//! differing only in how behaviors are expressed:
//!
//! - [`ExperimentBuilder`] / [`Experiment`]: behaviors are plain closures and
//!   run one after another.
//! - [`AsyncExperimentBuilder`] / [`AsyncExperiment`]: behaviors return futures
//!   and run concurrently.
//!
//! # Example
//!
//! ```rust
//! use sci_core::{ExperimentBuilder, RunOptions, RunOrder};
//!
//! let mut builder: ExperimentBuilder<'_, i32, String> = ExperimentBuilder::new("sum");
//! builder
//!     .use_control(|| Ok(1 + 1))
//!     .try_candidate("shifted", || Ok(1 << 1));
//!
//! let experiment = builder.build().unwrap();
//! let result = experiment.conduct(RunOptions::new().with_order(RunOrder::Registration));
//! assert_eq!(result.matched().count(), 1);
//! ```

use crate::comparator::{
    AbsentEquality, CustomComparer, CustomComparison, EqualityComparer, EqualityStrategy,
    NativeEquality, OrderingEquality, ResultComparator, ThrownEquality,
};
use crate::error::{OperationFailure, UsageError};
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Name given to a candidate registered without one
pub const DEFAULT_CANDIDATE_NAME: &str = "candidate";

/// Synchronous behavior
pub type Behavior<'a, T, E> = Box<dyn FnOnce() -> Result<T, E> + 'a>;

/// Asynchronous behavior
pub type AsyncBehavior<'a, T, E> =
    Box<dyn FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;

/// Builder for synchronous experiments
pub type ExperimentBuilder<'a, T, E> = Builder<'a, T, E, Behavior<'a, T, E>>;

/// Builder for asynchronous experiments
pub type AsyncExperimentBuilder<'a, T, E> = Builder<'a, T, E, AsyncBehavior<'a, T, E>>;

/// Finalized synchronous experiment
pub type Experiment<'a, T, E> = Definition<'a, T, E, Behavior<'a, T, E>>;

/// Finalized asynchronous experiment
pub type AsyncExperiment<'a, T, E> = Definition<'a, T, E, AsyncBehavior<'a, T, E>>;

pub(crate) type Predicate<'a, T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync + 'a>;
pub(crate) type Cleaner<'a, T> = Box<dyn Fn(&T) -> serde_json::Value + Send + Sync + 'a>;
pub(crate) type ThrownHandler<'a> = Box<dyn Fn(&OperationFailure) + Send + Sync + 'a>;

/// Experiment builder
///
/// Methods never fail eagerly: the first usage error is remembered and
/// returned by [`Builder::build`].
pub struct Builder<'a, T, E, B> {
    name: String,
    control: Option<B>,
    candidates: IndexMap<String, B>,
    comparison: Option<CustomComparison<'a, T>>,
    comparer: Option<CustomComparer<'a, T>>,
    absent: Option<AbsentEquality<'a, T>>,
    native: Option<Box<dyn EqualityStrategy<T, E> + 'a>>,
    ordering: Option<Box<dyn EqualityStrategy<T, E> + 'a>>,
    ignores: Vec<Predicate<'a, T>>,
    run_if: Option<Box<dyn FnOnce() -> bool + Send + 'a>>,
    before_run: Option<Box<dyn FnOnce() + Send + 'a>>,
    cleaner: Option<Cleaner<'a, T>>,
    contexts: IndexMap<String, serde_json::Value>,
    on_thrown: Option<ThrownHandler<'a>>,
    max_concurrency: Option<usize>,
    error: Option<UsageError>,
}

impl<'a, T: PartialEq + 'a, E: 'a, B> Builder<'a, T, E, B> {
    /// Create builder that falls back to the result type's `PartialEq`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut builder = Self::without_equality(name);
        builder.native = Some(Box::new(NativeEquality));
        builder
    }
}

impl<'a, T: Ord + 'a, E: 'a, B> Builder<'a, T, E, B> {
    /// Fall back to the result type's `Ord` after `PartialEq`
    pub fn with_ordering_equality(&mut self) -> &mut Self {
        self.ordering = Some(Box::new(OrderingEquality));
        self
    }
}

impl<'a, T: 'a, E: 'a, B> Builder<'a, T, E, B> {
    /// Create builder for a result type without `PartialEq`
    ///
    /// A custom comparison or comparer must be configured before `build()`.
    #[must_use]
    pub fn without_equality(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            control: None,
            candidates: IndexMap::new(),
            comparison: None,
            comparer: None,
            absent: None,
            native: None,
            ordering: None,
            ignores: Vec::new(),
            run_if: None,
            before_run: None,
            cleaner: None,
            contexts: IndexMap::new(),
            on_thrown: None,
            max_concurrency: None,
            error: None,
        }
    }

    /// Experiment name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered candidate names in registration order
    pub fn candidate_names(&self) -> impl Iterator<Item = &str> {
        self.candidates.keys().map(String::as_str)
    }

    fn fail(&mut self, error: UsageError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn register_control(&mut self, behavior: B) -> &mut Self {
        if self.control.is_some() {
            let experiment = self.name.clone();
            self.fail(UsageError::DuplicateControl { experiment });
        } else {
            self.control = Some(behavior);
        }
        self
    }

    fn register_candidate(&mut self, name: String, behavior: B) -> &mut Self {
        if name.is_empty() {
            let experiment = self.name.clone();
            self.fail(UsageError::EmptyCandidateName { experiment });
        } else if self.candidates.contains_key(&name) {
            let experiment = self.name.clone();
            self.fail(UsageError::DuplicateCandidate {
                experiment,
                candidate: name,
            });
        } else {
            self.candidates.insert(name, behavior);
        }
        self
    }

    /// Decide equality with a function, bypassing every other strategy
    pub fn compare(&mut self, compare: impl Fn(&T, &T) -> bool + Send + Sync + 'a) -> &mut Self {
        self.comparison = Some(CustomComparison::new(compare));
        self
    }

    /// Decide equality with a comparer (ignored if `compare` is also set)
    pub fn with_comparer(&mut self, comparer: impl EqualityComparer<T> + 'a) -> &mut Self {
        self.with_shared_comparer(Arc::new(comparer))
    }

    /// Decide equality with a shared comparer
    pub fn with_shared_comparer(&mut self, comparer: Arc<dyn EqualityComparer<T> + 'a>) -> &mut Self {
        self.comparer = Some(CustomComparer::new(comparer));
        self
    }

    /// Treat two values as equal when both are "absent"
    pub fn absent_when(&mut self, is_absent: impl Fn(&T) -> bool + Send + Sync + 'a) -> &mut Self {
        self.absent = Some(AbsentEquality::new(is_absent));
        self
    }

    /// Suppress mismatches for which `ignore(control, candidate)` holds
    ///
    /// Cumulative; rules are evaluated in registration order. Rules are not
    /// consulted for candidates that already match.
    pub fn ignore(&mut self, ignore: impl Fn(&T, &T) -> bool + Send + Sync + 'a) -> &mut Self {
        self.ignores.push(Box::new(ignore));
        self
    }

    /// Run candidates only if `run_if()` holds at run time
    pub fn run_if(&mut self, run_if: impl FnOnce() -> bool + Send + 'a) -> &mut Self {
        self.run_if = Some(Box::new(run_if));
        self
    }

    /// Hook executed once before behaviors run, only when candidates will run
    pub fn before_run(&mut self, hook: impl FnOnce() + Send + 'a) -> &mut Self {
        self.before_run = Some(Box::new(hook));
        self
    }

    /// Shape values for publication
    pub fn clean(&mut self, cleaner: impl Fn(&T) -> serde_json::Value + Send + Sync + 'a) -> &mut Self {
        self.cleaner = Some(Box::new(cleaner));
        self
    }

    /// Attach a context entry to the published result
    pub fn add_context(
        &mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> &mut Self {
        let key = key.into();
        if self.contexts.contains_key(&key) {
            let experiment = self.name.clone();
            self.fail(UsageError::DuplicateContext { experiment, key });
        } else {
            self.contexts.insert(key, value.into());
        }
        self
    }

    /// Receive failures of auxiliary operations
    ///
    /// Without a handler they are logged at `warn` level.
    pub fn on_thrown(&mut self, handler: impl Fn(&OperationFailure) + Send + Sync + 'a) -> &mut Self {
        self.on_thrown = Some(Box::new(handler));
        self
    }

    /// Finalize the experiment
    ///
    /// # Errors
    /// Returns the first `UsageError` recorded while configuring, or one of
    /// `EmptyExperimentName`, `MissingControl`, `MissingEquality`.
    pub fn build(self) -> Result<Definition<'a, T, E, B>, UsageError>
    where
        E: fmt::Display,
    {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.name.is_empty() {
            return Err(UsageError::EmptyExperimentName);
        }
        let Some(control) = self.control else {
            return Err(UsageError::MissingControl {
                experiment: self.name,
            });
        };

        let mut strategies: Vec<Box<dyn EqualityStrategy<T, E> + 'a>> = Vec::new();
        let custom = match (self.comparison, self.comparer) {
            (Some(comparison), _) => {
                strategies.push(Box::new(comparison));
                true
            }
            (None, Some(comparer)) => {
                strategies.push(Box::new(comparer));
                true
            }
            (None, None) => false,
        };
        if !custom && self.native.is_none() && self.ordering.is_none() {
            return Err(UsageError::MissingEquality {
                experiment: self.name,
            });
        }
        strategies.push(Box::new(ThrownEquality));
        if let Some(absent) = self.absent {
            strategies.push(Box::new(absent));
        }
        strategies.extend(self.native);
        strategies.extend(self.ordering);

        Ok(Definition {
            settings: Settings {
                name: self.name,
                comparator: ResultComparator::new(strategies),
                ignores: self.ignores,
                run_if: self.run_if,
                before_run: self.before_run,
                cleaner: self.cleaner,
                contexts: self.contexts,
                on_thrown: self.on_thrown,
            },
            control,
            candidates: self.candidates.into_iter().collect(),
            max_concurrency: self.max_concurrency,
        })
    }
}

impl<'a, T: 'a, E: 'a> Builder<'a, T, E, Behavior<'a, T, E>> {
    /// Register the control behavior (exactly once)
    pub fn use_control(&mut self, control: impl FnOnce() -> Result<T, E> + 'a) -> &mut Self {
        self.register_control(Box::new(control))
    }

    /// Register a named candidate behavior
    pub fn try_candidate(
        &mut self,
        name: impl Into<String>,
        candidate: impl FnOnce() -> Result<T, E> + 'a,
    ) -> &mut Self {
        self.register_candidate(name.into(), Box::new(candidate))
    }

    /// Register a candidate under [`DEFAULT_CANDIDATE_NAME`]
    pub fn try_default(&mut self, candidate: impl FnOnce() -> Result<T, E> + 'a) -> &mut Self {
        self.try_candidate(DEFAULT_CANDIDATE_NAME, candidate)
    }
}

impl<'a, T: 'a, E: 'a> Builder<'a, T, E, AsyncBehavior<'a, T, E>> {
    /// Register the control behavior (exactly once)
    pub fn use_control<F, Fut>(&mut self, control: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
    {
        self.register_control(Box::new(move || control().boxed()))
    }

    /// Register a named candidate behavior
    pub fn try_candidate<F, Fut>(&mut self, name: impl Into<String>, candidate: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
    {
        self.register_candidate(name.into(), Box::new(move || candidate().boxed()))
    }

    /// Register a candidate under [`DEFAULT_CANDIDATE_NAME`]
    pub fn try_default<F, Fut>(&mut self, candidate: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
    {
        self.try_candidate(DEFAULT_CANDIDATE_NAME, candidate)
    }

    /// Cap the number of behaviors in flight at once (control included)
    pub fn max_concurrency(&mut self, limit: usize) -> &mut Self {
        if limit == 0 {
            let experiment = self.name.clone();
            self.fail(UsageError::InvalidConcurrency { experiment });
        } else {
            self.max_concurrency = Some(limit);
        }
        self
    }
}

impl<T, E, B> fmt::Debug for Builder<'_, T, E, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("name", &self.name)
            .field("has_control", &self.control.is_some())
            .field("candidates", &self.candidates.keys().collect::<Vec<_>>())
            .field("contexts", &self.contexts)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Everything but the behaviors
pub(crate) struct Settings<'a, T, E> {
    pub(crate) name: String,
    pub(crate) comparator: ResultComparator<'a, T, E>,
    pub(crate) ignores: Vec<Predicate<'a, T>>,
    pub(crate) run_if: Option<Box<dyn FnOnce() -> bool + Send + 'a>>,
    pub(crate) before_run: Option<Box<dyn FnOnce() + Send + 'a>>,
    pub(crate) cleaner: Option<Cleaner<'a, T>>,
    pub(crate) contexts: IndexMap<String, serde_json::Value>,
    pub(crate) on_thrown: Option<ThrownHandler<'a>>,
}

/// Finalized, immutable experiment
///
/// Runs exactly once; see `conduct` and `run`.
pub struct Definition<'a, T, E, B> {
    pub(crate) settings: Settings<'a, T, E>,
    pub(crate) control: B,
    pub(crate) candidates: Vec<(String, B)>,
    pub(crate) max_concurrency: Option<usize>,
}

impl<'a, T, E, B> Definition<'a, T, E, B> {
    /// Experiment name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Candidate names in registration order
    pub fn candidate_names(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|(name, _)| name.as_str())
    }

    /// Comparison chain
    #[inline]
    #[must_use]
    pub fn comparator(&self) -> &ResultComparator<'a, T, E> {
        &self.settings.comparator
    }

    /// Concurrency limit (asynchronous experiments only)
    #[inline]
    #[must_use]
    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }
}

impl<T, E, B> fmt::Debug for Definition<'_, T, E, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.settings.name)
            .field("candidates", &self.candidate_names().collect::<Vec<_>>())
            .field("comparator", &self.settings.comparator)
            .field("ignore_rules", &self.settings.ignores.len())
            .field("contexts", &self.settings.contexts)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Builder<'a> = ExperimentBuilder<'a, i32, String>;

    #[derive(Debug)]
    struct Opaque(i32);

    #[test]
    fn build_requires_control() {
        let builder = Builder::new("sum");
        let err = builder.build().unwrap_err();
        assert_eq!(
            err,
            UsageError::MissingControl {
                experiment: "sum".to_string()
            }
        );
    }

    #[test]
    fn build_rejects_empty_name() {
        let mut builder = Builder::new("");
        builder.use_control(|| Ok(1));
        assert_eq!(builder.build().unwrap_err(), UsageError::EmptyExperimentName);
    }

    #[test]
    fn control_registered_twice() {
        let mut builder = Builder::new("sum");
        builder.use_control(|| Ok(1)).use_control(|| Ok(2));
        assert!(matches!(
            builder.build(),
            Err(UsageError::DuplicateControl { .. })
        ));
    }

    #[test]
    fn duplicate_candidate_names() {
        let mut builder = Builder::new("sum");
        builder
            .use_control(|| Ok(1))
            .try_candidate("fast", || Ok(1))
            .try_candidate("fast", || Ok(1));
        assert_eq!(
            builder.build().unwrap_err(),
            UsageError::DuplicateCandidate {
                experiment: "sum".to_string(),
                candidate: "fast".to_string(),
            }
        );
    }

    #[test]
    fn candidate_names_are_case_sensitive() {
        let mut builder = Builder::new("sum");
        builder
            .use_control(|| Ok(1))
            .try_candidate("fast", || Ok(1))
            .try_candidate("Fast", || Ok(1));
        let experiment = builder.build().unwrap();
        assert_eq!(experiment.candidate_names().collect::<Vec<_>>(), vec!["fast", "Fast"]);
    }

    #[test]
    fn empty_candidate_name() {
        let mut builder = Builder::new("sum");
        builder.use_control(|| Ok(1)).try_candidate("", || Ok(1));
        assert!(matches!(
            builder.build(),
            Err(UsageError::EmptyCandidateName { .. })
        ));
    }

    #[test]
    fn first_usage_error_wins() {
        let mut builder = Builder::new("sum");
        builder
            .use_control(|| Ok(1))
            .try_candidate("", || Ok(1))
            .use_control(|| Ok(1));
        assert!(matches!(
            builder.build(),
            Err(UsageError::EmptyCandidateName { .. })
        ));
    }

    #[test]
    fn default_candidate_name() {
        let mut builder = Builder::new("sum");
        builder.use_control(|| Ok(1)).try_default(|| Ok(1));
        assert_eq!(builder.candidate_names().collect::<Vec<_>>(), vec![DEFAULT_CANDIDATE_NAME]);
    }

    #[test]
    fn duplicate_context_key() {
        let mut builder = Builder::new("sum");
        builder
            .use_control(|| Ok(1))
            .add_context("user", 1)
            .add_context("user", 2);
        assert!(matches!(
            builder.build(),
            Err(UsageError::DuplicateContext { ref key, .. }) if key == "user"
        ));
    }

    #[test]
    fn missing_equality_without_partial_eq() {
        let mut builder: ExperimentBuilder<'_, Opaque, String> =
            ExperimentBuilder::without_equality("opaque");
        builder.use_control(|| Ok(Opaque(1)));
        assert!(matches!(
            builder.build(),
            Err(UsageError::MissingEquality { .. })
        ));
    }

    #[test]
    fn custom_comparison_supplies_equality() {
        let mut builder: ExperimentBuilder<'_, Opaque, String> =
            ExperimentBuilder::without_equality("opaque");
        builder
            .use_control(|| Ok(Opaque(1)))
            .compare(|a, b| a.0 == b.0);
        let experiment = builder.build().unwrap();
        assert_eq!(
            experiment.comparator().strategy_names(),
            vec!["custom_comparison", "thrown_identity"]
        );
    }

    #[test]
    fn chain_order_is_fixed() {
        struct Always;
        impl EqualityComparer<i32> for Always {
            fn equals(&self, _: &i32, _: &i32) -> bool {
                true
            }
        }

        let mut builder = Builder::new("sum");
        builder
            .use_control(|| Ok(1))
            .with_ordering_equality()
            .absent_when(|v| *v == 0)
            .with_comparer(Always)
            .compare(|a, b| a == b);
        let experiment = builder.build().unwrap();
        assert_eq!(
            experiment.comparator().strategy_names(),
            vec!["custom_comparison", "thrown_identity", "absent", "native", "ordering"]
        );
    }

    #[test]
    fn comparer_used_without_comparison() {
        struct Always;
        impl EqualityComparer<i32> for Always {
            fn equals(&self, _: &i32, _: &i32) -> bool {
                true
            }
        }

        let mut builder = Builder::new("sum");
        builder.use_control(|| Ok(1)).with_comparer(Always);
        let experiment = builder.build().unwrap();
        assert_eq!(experiment.comparator().strategy_names()[0], "custom_comparer");
    }

    #[test]
    fn async_zero_concurrency_rejected() {
        let mut builder: AsyncExperimentBuilder<'_, i32, String> =
            AsyncExperimentBuilder::new("sum");
        builder.use_control(|| async { Ok(1) }).max_concurrency(0);
        assert!(matches!(
            builder.build(),
            Err(UsageError::InvalidConcurrency { .. })
        ));
    }

    #[test]
    fn async_builder_registers_behaviors() {
        let mut builder: AsyncExperimentBuilder<'_, i32, String> =
            AsyncExperimentBuilder::new("sum");
        builder
            .use_control(|| async { Ok(1) })
            .try_candidate("fast", || async { Ok(1) })
            .max_concurrency(2);
        let experiment = builder.build().unwrap();
        assert_eq!(experiment.name(), "sum");
        assert_eq!(experiment.max_concurrency(), Some(2));
        assert_eq!(experiment.candidate_names().collect::<Vec<_>>(), vec!["fast"]);
    }
}
