//! Scientist Core (sci-core)
//!
//! Controlled experiments for refactoring critical paths:
//! - The existing code path (the *control*) and one or more rewrites
//!   (*candidates*) run on the same input
//! - Candidates are compared to the control and classified as matched,
//!   mismatched or ignored
//! - The result is handed to a [`ResultPublisher`]
//! - The caller always gets the control's outcome, exactly as if the
//!   experiment were not there
//!
//! Candidate failures, panics included, never reach the caller.
//!
//! # Quick Start
//!
//! ```rust
//! use sci_core::prelude::*;
//!
//! struct Discard;
//!
//! impl ResultPublisher for Discard {
//!     fn publish(&self, _: &ResultReport) -> Result<(), PublishError> {
//!         Ok(())
//!     }
//! }
//!
//! let mut builder: ExperimentBuilder<'_, usize, String> = ExperimentBuilder::new("word-count");
//! builder
//!     .use_control(|| Ok("a b c".split(' ').count()))
//!     .try_candidate("whitespace", || Ok("a b c".split_whitespace().count()));
//!
//! let count = builder.build().unwrap().run(RunOptions::new(), &Discard);
//! assert_eq!(count, Ok(3));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod comparator;
pub mod error;
pub mod execution;
pub mod experiment;
pub mod observation;
pub mod publisher;
pub mod result;

// Re-exports
pub use comparator::{
    AbsentEquality, CustomComparer, CustomComparison, EqualityComparer, EqualityStrategy,
    NativeEquality, OrderingEquality, ResultComparator, ThrownEquality, Verdict,
};
pub use error::{ComparisonError, Operation, OperationFailure, PublishError, UsageError};
pub use execution::{RunOptions, RunOrder};
pub use experiment::{
    AsyncBehavior, AsyncExperiment, AsyncExperimentBuilder, Behavior, Builder, Definition,
    Experiment, ExperimentBuilder, DEFAULT_CANDIDATE_NAME,
};
pub use observation::{panic_message, Observation, Outcome, PanicPayload, Thrown, ThrownKind};
pub use publisher::ResultPublisher;
pub use result::{
    Classification, ExperimentResult, ObservationSummary, ResultReport, CONTROL_NAME,
};

/// Common imports for declaring and running experiments
pub mod prelude {
    pub use crate::{
        AsyncExperiment, AsyncExperimentBuilder, Classification, Experiment, ExperimentBuilder,
        ExperimentResult, Observation, OperationFailure, PublishError, ResultPublisher,
        ResultReport, RunOptions, RunOrder, UsageError,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
