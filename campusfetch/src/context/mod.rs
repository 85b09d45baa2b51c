//! Context for a pipeline run.
//!
//! This module provides:
//! - The immutable collection request
//! - The identity result produced by the mandatory first lookup
//! - The per-run task context passed explicitly to every task

mod identity;
mod request;
mod task_context;

pub use identity::IdentityResult;
pub use request::CollectionRequest;
pub use task_context::{generate_idempotency_key, TaskContext};
