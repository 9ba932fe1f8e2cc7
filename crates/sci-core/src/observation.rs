//! Observations of a single behavior run
//!
//! An [`Observation`] records what happened when one behavior ran exactly
//! once: the value it returned, the error it returned, or the panic it raised,
//! together with when it started and how long it took.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Outcome of one behavior run
///
/// Exactly one of value, error or panic is present by construction. A value
/// of `None` for an `Option` result type is a populated value.
#[derive(Debug)]
pub enum Outcome<T, E> {
    /// Behavior returned normally
    Value(T),
    /// Behavior returned an error
    Error(E),
    /// Behavior panicked
    Panic(PanicPayload),
}

impl<T, E> Outcome<T, E> {
    /// Check if the behavior threw (error or panic)
    #[inline]
    #[must_use]
    pub fn is_thrown(&self) -> bool {
        !matches!(self, Self::Value(_))
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(error) => Self::Error(error),
        }
    }
}

/// Captured panic
///
/// Keeps the original payload so a panicking control can be resumed verbatim
/// once the result has been published.
pub struct PanicPayload {
    message: String,
    payload: Box<dyn Any + Send>,
}

impl PanicPayload {
    /// Wrap a payload returned by `catch_unwind`
    #[must_use]
    pub fn new(payload: Box<dyn Any + Send>) -> Self {
        Self {
            message: panic_message(payload.as_ref()),
            payload,
        }
    }

    /// Panic message (`"<non-string panic payload>"` if the payload is not text)
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Resume unwinding with the original payload
    pub fn resume(self) -> ! {
        panic::resume_unwind(self.payload)
    }
}

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicPayload")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Extract the text of a panic payload
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Kind of thrown outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrownKind {
    /// Behavior returned `Err`
    Error,
    /// Behavior panicked
    Panic,
}

/// Publishable description of a thrown outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thrown {
    /// Error or panic
    pub kind: ThrownKind,
    /// Rust type of the error (`"panic"` for panics)
    pub type_name: String,
    /// Enum variant or struct name leading the error's `Debug` rendering
    ///
    /// `None` for panics and for errors whose `Debug` output does not start
    /// with an identifier.
    #[serde(default)]
    pub variant: Option<String>,
    /// `Display` rendering of the error, or the panic message
    pub message: String,
}

/// Recorded outcome of running one behavior exactly once
#[derive(Debug)]
pub struct Observation<T, E> {
    name: String,
    outcome: Outcome<T, E>,
    started_at: DateTime<Utc>,
    duration: Duration,
    cleaned: Option<serde_json::Value>,
}

impl<T, E> Observation<T, E> {
    /// Run a behavior and record its outcome
    ///
    /// Panics are caught and recorded; they never escape this function.
    pub fn observe<F>(name: impl Into<String>, behavior: F) -> Self
    where
        F: FnOnce() -> Result<T, E>,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(behavior)) {
            Ok(result) => Outcome::from(result),
            Err(payload) => Outcome::Panic(PanicPayload::new(payload)),
        };

        Self::from_parts(name, outcome, started_at, start.elapsed())
    }

    /// Await a behavior's future and record its outcome
    ///
    /// Timing starts on first poll, so it measures the behavior itself rather
    /// than time spent waiting to be scheduled.
    pub async fn observe_async<F, Fut>(name: impl Into<String>, behavior: F) -> Self
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let name = name.into();
        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = match AssertUnwindSafe(async move { behavior().await })
            .catch_unwind()
            .await
        {
            Ok(result) => Outcome::from(result),
            Err(payload) => Outcome::Panic(PanicPayload::new(payload)),
        };

        Self::from_parts(name, outcome, started_at, start.elapsed())
    }

    /// Assemble an observation from already recorded parts
    #[must_use]
    pub fn from_parts(
        name: impl Into<String>,
        outcome: Outcome<T, E>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            outcome,
            started_at,
            duration,
            cleaned: None,
        }
    }

    /// Behavior name (`control` or the candidate name)
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recorded outcome
    #[inline]
    #[must_use]
    pub fn outcome(&self) -> &Outcome<T, E> {
        &self.outcome
    }

    /// Returned value, if the behavior did not throw
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returned error, if any
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&E> {
        match &self.outcome {
            Outcome::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Captured panic, if any
    #[inline]
    #[must_use]
    pub fn panic(&self) -> Option<&PanicPayload> {
        match &self.outcome {
            Outcome::Panic(payload) => Some(payload),
            _ => None,
        }
    }

    /// Check if the behavior threw (error or panic)
    #[inline]
    #[must_use]
    pub fn is_thrown(&self) -> bool {
        self.outcome.is_thrown()
    }

    /// Wall-clock start of the run
    #[inline]
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Elapsed time of the run
    #[inline]
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Cleaned value prepared for publication
    #[inline]
    #[must_use]
    pub fn cleaned_value(&self) -> Option<&serde_json::Value> {
        self.cleaned.as_ref()
    }

    pub(crate) fn set_cleaned(&mut self, cleaned: serde_json::Value) {
        self.cleaned = Some(cleaned);
    }

    /// Consume the observation, returning the value or error
    ///
    /// A recorded panic is resumed with its original payload.
    pub fn into_result(self) -> Result<T, E> {
        match self.outcome {
            Outcome::Value(value) => Ok(value),
            Outcome::Error(error) => Err(error),
            Outcome::Panic(payload) => payload.resume(),
        }
    }
}

impl<T, E: fmt::Debug + fmt::Display> Observation<T, E> {
    /// Describe the thrown outcome, if any
    #[must_use]
    pub fn thrown(&self) -> Option<Thrown> {
        match &self.outcome {
            Outcome::Value(_) => None,
            Outcome::Error(error) => Some(Thrown {
                kind: ThrownKind::Error,
                type_name: std::any::type_name::<E>().to_string(),
                variant: debug_head(&format!("{error:?}")),
                message: error.to_string(),
            }),
            Outcome::Panic(payload) => Some(Thrown {
                kind: ThrownKind::Panic,
                type_name: "panic".to_string(),
                variant: None,
                message: payload.message().to_string(),
            }),
        }
    }
}

// `Argument("x")` -> `Argument`, `Timeout { .. }` -> `Timeout`, `"x"` -> None
fn debug_head(debug: &str) -> Option<String> {
    let end = debug
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(debug.len());
    let head = &debug[..end];
    head.starts_with(|c: char| c.is_ascii_uppercase())
        .then(|| head.to_string())
}
