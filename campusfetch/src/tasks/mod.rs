//! Task traits and adapters.
//!
//! Tasks are the collaborator seam of the engine: each one calls the external
//! model, parses the answer and upserts it into storage. The engine only sees
//! the trait.

use crate::context::{CollectionRequest, IdentityResult, TaskContext};
use crate::errors::TaskError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;

/// Value produced by a successful task.
pub type TaskValue = serde_json::Value;

/// A named unit of async fetch-and-store work.
///
/// Implementations must be safe to re-run after a partial failure: the
/// retry executor will call [`Task::run`] again with the same context, so
/// writes should be upserts keyed by [`TaskContext::idempotency_key`] or by
/// natural keys.
#[async_trait]
pub trait Task: Send + Sync + Debug {
    /// Returns the name of the task.
    fn name(&self) -> &str;

    /// Runs one attempt of the task.
    async fn run(&self, ctx: &TaskContext) -> Result<TaskValue, TaskError>;
}

/// The mandatory first lookup that establishes the entity's storage keys.
///
/// Not retried: a missing entity id aborts the pipeline.
#[async_trait]
pub trait IdentityResolver: Send + Sync + Debug {
    /// Resolves the identity for a request.
    async fn resolve(&self, request: &CollectionRequest) -> Result<IdentityResult, TaskError>;
}

/// An async closure-based task.
pub struct FnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskValue, TaskError>> + Send,
{
    name: String,
    func: F,
}

impl<F, Fut> FnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskValue, TaskError>> + Send,
{
    /// Creates a new closure-based task.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F, Fut> Debug for FnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskValue, TaskError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskValue, TaskError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskValue, TaskError> {
        (self.func)(ctx.clone()).await
    }
}

/// A task that succeeds immediately with `null`.
#[derive(Debug, Clone)]
pub struct NoOpTask {
    name: String,
}

impl NoOpTask {
    /// Creates a new no-op task.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Task for NoOpTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &TaskContext) -> Result<TaskValue, TaskError> {
        Ok(TaskValue::Null)
    }
}
