//! Error types for experiments
//!
//! Provides the error taxonomy for:
//! - Experiment construction mistakes (caller bugs, reported at build time)
//! - Equality strategies applied to observations they cannot judge
//! - Publisher failures (isolated from the caller)
//! - Failures of auxiliary operations (compare, ignore, run-if, ...)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Construction errors
///
/// Every variant is a bug in the code that declares the experiment. They are
/// reported by `build()`, never deferred to run time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    /// Experiment declared with an empty name
    #[error("experiment name must not be empty")]
    EmptyExperimentName,

    /// No control behavior registered
    #[error("experiment `{experiment}` has no control behavior")]
    MissingControl {
        /// Experiment name
        experiment: String,
    },

    /// Control behavior registered more than once
    #[error("experiment `{experiment}` registered its control behavior twice")]
    DuplicateControl {
        /// Experiment name
        experiment: String,
    },

    /// Candidate registered with an empty name
    #[error("experiment `{experiment}` has a candidate with an empty name")]
    EmptyCandidateName {
        /// Experiment name
        experiment: String,
    },

    /// Candidate name already taken
    #[error("experiment `{experiment}` already has a candidate named `{candidate}`")]
    DuplicateCandidate {
        /// Experiment name
        experiment: String,
        /// Colliding candidate name
        candidate: String,
    },

    /// Context key already taken
    #[error("experiment `{experiment}` already has a context entry `{key}`")]
    DuplicateContext {
        /// Experiment name
        experiment: String,
        /// Colliding key
        key: String,
    },

    /// The result type cannot be compared with the configured strategies
    #[error("experiment `{experiment}` has no equality strategy for its result type")]
    MissingEquality {
        /// Experiment name
        experiment: String,
    },

    /// Concurrency limit of zero
    #[error("experiment `{experiment}` needs a concurrency limit of at least 1")]
    InvalidConcurrency {
        /// Experiment name
        experiment: String,
    },
}

/// Equality strategy failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComparisonError {
    /// A value-only strategy was handed an observation that threw
    ///
    /// Custom comparison functions and custom comparers only judge values.
    /// When either side recorded an error or panic the pair is not coerced
    /// into a verdict; the candidate is classified as mismatched and this
    /// error is recorded as an operation failure.
    #[error("{strategy} cannot compare `{candidate}`: an observation threw instead of returning a value")]
    ThrownWithCustomEquality {
        /// Strategy that refused the pair
        strategy: &'static str,
        /// Candidate name
        candidate: String,
    },

    /// The strategy itself panicked
    #[error("{strategy} panicked while comparing `{candidate}`: {message}")]
    Panicked {
        /// Strategy that panicked
        strategy: &'static str,
        /// Candidate name
        candidate: String,
        /// Panic message
        message: String,
    },
}

/// Publisher failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Sink rejected or failed to store the report
    #[error("publisher `{publisher}` failed: {message}")]
    Sink {
        /// Publisher name
        publisher: String,
        /// Failure description
        message: String,
    },

    /// Publisher panicked
    #[error("publisher panicked: {0}")]
    Panicked(String),
}

impl PublishError {
    /// Create sink failure
    #[inline]
    #[must_use]
    pub fn sink(publisher: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            publisher: publisher.into(),
            message: message.into(),
        }
    }
}

/// Auxiliary operations whose failures are isolated from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Evaluating the run-if predicate
    RunIf,
    /// Running the before-run hook
    BeforeRun,
    /// Comparing a candidate with the control
    Compare,
    /// Evaluating an ignore predicate
    Ignore,
    /// Cleaning a value for publication
    Clean,
    /// Publishing the result
    Publish,
}

impl Operation {
    /// Stable name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunIf => "run_if",
            Self::BeforeRun => "before_run",
            Self::Compare => "compare",
            Self::Ignore => "ignore",
            Self::Clean => "clean",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an auxiliary operation
///
/// Recorded on the experiment result and handed to the experiment's thrown
/// handler. Never surfaced to the caller of `science`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{operation} failed in experiment `{experiment}`: {message}")]
pub struct OperationFailure {
    /// Experiment name
    pub experiment: String,
    /// Failed operation
    pub operation: Operation,
    /// Candidate involved, if any
    pub candidate: Option<String>,
    /// Failure description
    pub message: String,
}

impl OperationFailure {
    /// Create operation failure
    #[must_use]
    pub fn new(
        experiment: impl Into<String>,
        operation: Operation,
        candidate: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            experiment: experiment.into(),
            operation,
            candidate: candidate.map(str::to_string),
            message: message.into(),
        }
    }
}
