//! Scientist Laboratory (sci-lab)
//!
//! The entry points applications call:
//! - [`science`] / [`science_async`] declare an experiment through a
//!   configuration callback, run it against the process-wide
//!   [`Laboratory`] and hand back the control's outcome
//! - [`science_by`] / [`science_async_by`] do the same for values that only
//!   compare through a custom comparison
//! - [`Laboratory`] does the same against an explicit context
//! - [`publishers`] provides ready-made result sinks
//!
//! # Example
//!
//! ```rust
//! use sci_lab::{science, set_laboratory, Laboratory, NoopPublisher};
//!
//! set_laboratory(Laboratory::new().with_publisher(NoopPublisher));
//!
//! let total: Result<u32, String> = science("sum", |e| {
//!     e.use_control(|| Ok((1..=4).sum()))
//!         .try_candidate("closed-form", || Ok(4 * 5 / 2));
//! });
//! assert_eq!(total, Ok(10));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod laboratory;
pub mod publishers;

pub use laboratory::{laboratory, reset_laboratory, set_laboratory, set_result_publisher, Laboratory};
pub use publishers::{
    FanoutPublisher, InMemoryPublisher, NoopPublisher, TracingPublisher, DEFAULT_RETENTION,
};

use laboratory::current_laboratory;
use sci_core::{AsyncExperimentBuilder, ExperimentBuilder};
use std::fmt;

/// Declare and run an experiment against the process-wide laboratory
///
/// The control's value is returned, or its error re-raised, whatever the
/// candidates do. The result goes to the publisher installed when it is
/// ready, not when the experiment started.
///
/// # Errors
/// Returns the control's error.
///
/// # Panics
/// Panics if the declaration is invalid, e.g. no control was registered or a
/// candidate name was used twice. A control panic is resumed after the
/// result has been published.
pub fn science<'a, T, E, F>(name: impl Into<String>, configure: F) -> Result<T, E>
where
    T: PartialEq + fmt::Debug + 'a,
    E: fmt::Debug + fmt::Display + 'a,
    F: FnOnce(&mut ExperimentBuilder<'a, T, E>),
{
    current_laboratory().science(name, configure)
}

/// Like [`science`] for values without `PartialEq`
///
/// `configure` must install a `compare` or `comparer`.
///
/// # Errors
/// Returns the control's error.
///
/// # Panics
/// Panics if the declaration is invalid, including when no comparison was
/// configured.
pub fn science_by<'a, T, E, F>(name: impl Into<String>, configure: F) -> Result<T, E>
where
    T: fmt::Debug + 'a,
    E: fmt::Debug + fmt::Display + 'a,
    F: FnOnce(&mut ExperimentBuilder<'a, T, E>),
{
    current_laboratory().science_by(name, configure)
}

/// Declare and run an asynchronous experiment against the process-wide
/// laboratory
///
/// The control and candidates run concurrently on the caller's task.
///
/// # Errors
/// Returns the control's error.
///
/// # Panics
/// Panics if the declaration is invalid.
pub async fn science_async<'a, T, E, F>(name: impl Into<String>, configure: F) -> Result<T, E>
where
    T: PartialEq + fmt::Debug + 'a,
    E: fmt::Debug + fmt::Display + 'a,
    F: FnOnce(&mut AsyncExperimentBuilder<'a, T, E>),
{
    current_laboratory().science_async(name, configure).await
}

/// Like [`science_async`] for values without `PartialEq`
///
/// # Errors
/// Returns the control's error.
///
/// # Panics
/// Panics if the declaration is invalid, including when no comparison was
/// configured.
pub async fn science_async_by<'a, T, E, F>(name: impl Into<String>, configure: F) -> Result<T, E>
where
    T: fmt::Debug + 'a,
    E: fmt::Debug + fmt::Display + 'a,
    F: FnOnce(&mut AsyncExperimentBuilder<'a, T, E>),
{
    current_laboratory().science_async_by(name, configure).await
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
