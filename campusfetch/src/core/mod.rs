//! Core domain model types.
//!
//! - The tagged per-task [`Outcome`] and the [`TaskReport`] built from it
//! - The [`PipelineState`] machine

mod outcome;
mod status;

pub use outcome::{Outcome, TaskRecord, TaskReport};
pub use status::PipelineState;
