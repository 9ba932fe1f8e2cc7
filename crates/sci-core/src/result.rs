//! Experiment results
//!
//! [`ExperimentResult`] is the typed, immutable outcome of one experiment
//! run. [`ResultReport`] is its owned, type-erased snapshot handed to
//! publishers.

use crate::error::OperationFailure;
use crate::observation::{Observation, Thrown};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Name of the control behavior
pub const CONTROL_NAME: &str = "control";

/// Classification of a candidate against the control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Candidate agreed with the control
    Matched,
    /// Candidate disagreed with the control
    Mismatched,
    /// Candidate disagreed, but an ignore rule suppressed the mismatch
    Ignored,
}

/// Outcome of one experiment run
///
/// Every candidate observation carries exactly one [`Classification`].
/// Candidates appear in registration order, independent of run order.
#[derive(Debug)]
pub struct ExperimentResult<T, E> {
    experiment_name: String,
    control: Observation<T, E>,
    candidates: Vec<(Observation<T, E>, Classification)>,
    contexts: IndexMap<String, serde_json::Value>,
    operation_failures: Vec<OperationFailure>,
    gated: bool,
}

impl<T, E> ExperimentResult<T, E> {
    pub(crate) fn new(
        experiment_name: String,
        control: Observation<T, E>,
        candidates: Vec<(Observation<T, E>, Classification)>,
        contexts: IndexMap<String, serde_json::Value>,
        operation_failures: Vec<OperationFailure>,
        gated: bool,
    ) -> Self {
        Self {
            experiment_name,
            control,
            candidates,
            contexts,
            operation_failures,
            gated,
        }
    }

    /// Experiment name
    #[inline]
    #[must_use]
    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    /// Control observation
    #[inline]
    #[must_use]
    pub fn control(&self) -> &Observation<T, E> {
        &self.control
    }

    /// Candidate observations in registration order
    pub fn candidates(&self) -> impl Iterator<Item = &Observation<T, E>> {
        self.candidates.iter().map(|(obs, _)| obs)
    }

    /// Candidate observation by name
    #[must_use]
    pub fn candidate(&self, name: &str) -> Option<&Observation<T, E>> {
        self.candidates().find(|obs| obs.name() == name)
    }

    /// Classification of a candidate by name
    #[must_use]
    pub fn classification(&self, name: &str) -> Option<Classification> {
        self.candidates
            .iter()
            .find(|(obs, _)| obs.name() == name)
            .map(|(_, class)| *class)
    }

    /// Candidates classified as matched
    pub fn matched(&self) -> impl Iterator<Item = &Observation<T, E>> {
        self.with_classification(Classification::Matched)
    }

    /// Candidates classified as mismatched
    pub fn mismatched(&self) -> impl Iterator<Item = &Observation<T, E>> {
        self.with_classification(Classification::Mismatched)
    }

    /// Candidates whose mismatch was suppressed by an ignore rule
    pub fn ignored(&self) -> impl Iterator<Item = &Observation<T, E>> {
        self.with_classification(Classification::Ignored)
    }

    fn with_classification(
        &self,
        class: Classification,
    ) -> impl Iterator<Item = &Observation<T, E>> {
        self.candidates
            .iter()
            .filter(move |(_, c)| *c == class)
            .map(|(obs, _)| obs)
    }

    /// Check if any candidate mismatched
    #[must_use]
    pub fn has_mismatches(&self) -> bool {
        self.mismatched().next().is_some()
    }

    /// Check if candidates were skipped by run-if or the global switch
    #[inline]
    #[must_use]
    pub fn is_gated(&self) -> bool {
        self.gated
    }

    /// Context entries attached to the experiment
    #[inline]
    #[must_use]
    pub fn contexts(&self) -> &IndexMap<String, serde_json::Value> {
        &self.contexts
    }

    /// Failures of auxiliary operations during the run
    #[inline]
    #[must_use]
    pub fn operation_failures(&self) -> &[OperationFailure] {
        &self.operation_failures
    }

    pub(crate) fn push_failure(&mut self, failure: OperationFailure) {
        self.operation_failures.push(failure);
    }

    /// Consume the result, returning the control's observation
    #[must_use]
    pub fn into_control(self) -> Observation<T, E> {
        self.control
    }
}

impl<T: fmt::Debug, E: fmt::Debug + fmt::Display> ExperimentResult<T, E> {
    /// Owned snapshot for publishers
    #[must_use]
    pub fn report(&self) -> ResultReport {
        let mut matched = Vec::new();
        let mut mismatched = Vec::new();
        let mut ignored = Vec::new();
        let candidates = self
            .candidates
            .iter()
            .map(|(obs, class)| {
                let bucket = match class {
                    Classification::Matched => &mut matched,
                    Classification::Mismatched => &mut mismatched,
                    Classification::Ignored => &mut ignored,
                };
                bucket.push(obs.name().to_string());
                ObservationSummary::from_observation(obs, Some(*class))
            })
            .collect();

        ResultReport {
            experiment_name: self.experiment_name.clone(),
            control: ObservationSummary::from_observation(&self.control, None),
            candidates,
            matched,
            mismatched,
            ignored,
            contexts: self.contexts.clone(),
            operation_failures: self.operation_failures.clone(),
            gated: self.gated,
        }
    }
}

/// Publishable summary of one observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSummary {
    /// Behavior name
    pub name: String,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Elapsed time
    pub duration: Duration,
    /// Cleaned value (absent if the behavior threw)
    pub value: Option<serde_json::Value>,
    /// Thrown outcome (absent if the behavior returned a value)
    pub thrown: Option<Thrown>,
    /// Classification (absent for the control)
    pub classification: Option<Classification>,
}

impl ObservationSummary {
    /// Summarize an observation
    ///
    /// Uses the cleaned value when one was produced, the value's `Debug`
    /// rendering otherwise.
    #[must_use]
    pub fn from_observation<T: fmt::Debug, E: fmt::Debug + fmt::Display>(
        obs: &Observation<T, E>,
        classification: Option<Classification>,
    ) -> Self {
        let value = obs.value().map(|v| {
            obs.cleaned_value()
                .cloned()
                .unwrap_or_else(|| serde_json::Value::String(format!("{v:?}")))
        });

        Self {
            name: obs.name().to_string(),
            started_at: obs.started_at(),
            duration: obs.duration(),
            value,
            thrown: obs.thrown(),
            classification,
        }
    }
}

/// Type-erased experiment result handed to publishers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultReport {
    /// Experiment name
    pub experiment_name: String,
    /// Control summary
    pub control: ObservationSummary,
    /// Candidate summaries in registration order
    pub candidates: Vec<ObservationSummary>,
    /// Names of matched candidates
    pub matched: Vec<String>,
    /// Names of mismatched candidates
    pub mismatched: Vec<String>,
    /// Names of ignored candidates
    pub ignored: Vec<String>,
    /// Context entries
    pub contexts: IndexMap<String, serde_json::Value>,
    /// Failures of auxiliary operations
    pub operation_failures: Vec<OperationFailure>,
    /// Candidates skipped by run-if or the global switch
    pub gated: bool,
}

impl ResultReport {
    /// Check if any candidate mismatched
    #[inline]
    #[must_use]
    pub fn has_mismatches(&self) -> bool {
        !self.mismatched.is_empty()
    }

    /// Candidate summary by name
    #[must_use]
    pub fn candidate(&self, name: &str) -> Option<&ObservationSummary> {
        self.candidates.iter().find(|c| c.name == name)
    }
}
