//! # Campusfetch
//!
//! Batch orchestration for institution data-collection pipelines.
//!
//! A collection run resolves the institution's identity, then runs waves of
//! independent fetch-and-store tasks:
//!
//! - **Waves**: tasks of a wave run concurrently under a concurrency cap; the
//!   next wave starts only after every task has settled
//! - **Retries**: every task goes through a pacing and backoff policy that
//!   waits longer after rate-limit errors
//! - **Dependent tasks**: a final wave is built from rows written by earlier
//!   waves
//! - **Progress**: milestones and status messages reach an observer without
//!   ever blocking the run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use campusfetch::prelude::*;
//!
//! let registry = TopicRegistry::new()
//!     .register(Topic::Authorities, authorities_task)
//!     // ...
//!     .with_bonds(|course, quota| bond_task(course, quota));
//! let plan = standard_plan(&registry, courses_source)?;
//!
//! let driver = PipelineDriver::new(PipelineConfig::default(), resolver, plan)?;
//! let summary = driver
//!     .run_pipeline(CollectionRequest::new("Government Medical College"), sink)
//!     .await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod tasks;
pub mod testing;
pub mod topics;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::PipelineConfig;
    pub use crate::context::{CollectionRequest, IdentityResult, TaskContext};
    pub use crate::core::{Outcome, PipelineState, TaskReport};
    pub use crate::errors::{CampusfetchError, PlanValidationError, TaskError};
    pub use crate::events::{
        CallbackSink, LoggingProgressSink, NoOpProgressSink, ProgressHandle, ProgressReporter,
        ProgressSink,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        DependentTaskExpander, FixedMultiplicityExpander, Milestone, PipelineDriver,
        PipelinePlan, PipelineSummary, PlanBuilder, Record, RecordSource, RetryExecutor,
        RetryPolicy, SuccessPolicy, Verdict, Wave, WaveRunner,
    };
    pub use crate::tasks::{FnTask, IdentityResolver, Task, TaskValue};
    pub use crate::topics::{standard_plan, QuotaCategory, Topic, TopicRegistry};
}
