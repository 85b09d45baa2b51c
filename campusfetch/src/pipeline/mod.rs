//! Pipeline building and execution.
//!
//! This module provides:
//! - The retry executor wrapping every external call
//! - Concurrent wave execution
//! - Dependent task expansion from storage
//! - Plans, the driver state machine and run summaries

mod driver;
mod expander;
mod integration_tests;
mod plan;
mod retry;
mod summary;
mod wave;

pub use driver::PipelineDriver;
pub use expander::{DependentTaskExpander, FixedMultiplicityExpander, Record, RecordSource, TaskFactory};
#[cfg(test)]
pub use expander::MockRecordSource;
pub use plan::{ExpansionStep, PipelinePlan, PlanBuilder};
pub use retry::{RetryExecutor, RetryPolicy, RetryRun, RetryState};
pub use summary::{PipelineSummary, SuccessPolicy, Verdict, WaveSummary};
pub use wave::{Milestone, Wave, WaveResult, WaveRunner};
