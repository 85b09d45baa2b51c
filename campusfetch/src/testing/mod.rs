//! Testing utilities for campusfetch pipelines.
//!
//! This module provides:
//! - Scripted tasks and identity resolvers
//! - An upsert-only in-memory store and a record source over it
//! - Assertions over pipeline summaries
//! - In-memory log capture

mod assertions;
mod fixtures;
mod logs;
mod mocks;

pub use crate::events::CollectingProgressSink;
pub use assertions::{
    assert_final_state, assert_task_failed, assert_verdict, assert_wave_len,
    assert_wave_succeeded,
};
pub use fixtures::{instant_config, InMemoryStore, TableSource, UpsertTask};
pub use logs::{CaptureWriter, LogCapture};
pub use mocks::{FailureKind, PanickingIdentity, ScriptedTask, StaticIdentity};
