//! Scripted tasks and identity resolvers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::{CollectionRequest, IdentityResult, TaskContext};
use crate::errors::TaskError;
use crate::tasks::{IdentityResolver, Task, TaskValue};

/// How a scripted task fails before it starts succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A generic failure.
    Generic,
    /// A rate-limit failure.
    RateLimited,
}

/// A task that fails a fixed number of times and then succeeds.
#[derive(Debug)]
pub struct ScriptedTask {
    name: String,
    failures: usize,
    kind: FailureKind,
    delay: Duration,
    value: TaskValue,
    calls: AtomicUsize,
    keys: Mutex<Vec<String>>,
}

impl ScriptedTask {
    /// Creates a task that always succeeds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures: 0,
            kind: FailureKind::Generic,
            delay: Duration::ZERO,
            value: TaskValue::Null,
            calls: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
        }
    }

    /// Fails the first `n` calls with a generic error.
    #[must_use]
    pub fn failing_times(mut self, n: usize) -> Self {
        self.failures = n;
        self.kind = FailureKind::Generic;
        self
    }

    /// Fails the first `n` calls with a rate-limit error.
    #[must_use]
    pub fn rate_limited_times(mut self, n: usize) -> Self {
        self.failures = n;
        self.kind = FailureKind::RateLimited;
        self
    }

    /// Never succeeds.
    #[must_use]
    pub fn always_failing(self) -> Self {
        self.failing_times(usize::MAX)
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Value returned on success.
    #[must_use]
    pub fn with_value(mut self, value: TaskValue) -> Self {
        self.value = value;
        self
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Idempotency keys seen, one per call.
    #[must_use]
    pub fn seen_keys(&self) -> Vec<String> {
        self.keys.lock().clone()
    }
}

#[async_trait]
impl Task for ScriptedTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskValue, TaskError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().push(ctx.idempotency_key(&self.name));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if call < self.failures {
            return Err(match self.kind {
                FailureKind::Generic => {
                    TaskError::failed(format!("{} scripted failure {}", self.name, call + 1))
                }
                FailureKind::RateLimited => {
                    TaskError::failed(format!("{}: HTTP 429 Too Many Requests", self.name))
                }
            });
        }
        Ok(self.value.clone())
    }
}

/// An identity resolver with a fixed answer.
#[derive(Debug)]
pub struct StaticIdentity {
    answer: Result<IdentityResult, String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticIdentity {
    /// Resolves every request to `entity_id`.
    #[must_use]
    pub fn resolved(entity_id: i64) -> Self {
        Self::with_result(Ok(IdentityResult::resolved(entity_id)))
    }

    /// Returns an identity without an entity id.
    #[must_use]
    pub fn unresolved() -> Self {
        Self::with_result(Ok(IdentityResult::unresolved()))
    }

    /// Fails every lookup.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_result(Err(message.into()))
    }

    fn with_result(answer: Result<IdentityResult, String>) -> Self {
        Self {
            answer,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleeps for `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of lookups so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentity {
    async fn resolve(&self, _request: &CollectionRequest) -> Result<IdentityResult, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer.clone().map_err(TaskError::Failed)
    }
}

/// An identity resolver that panics.
#[derive(Debug, Default)]
pub struct PanickingIdentity;

#[async_trait]
impl IdentityResolver for PanickingIdentity {
    async fn resolve(&self, request: &CollectionRequest) -> Result<IdentityResult, TaskError> {
        panic!("identity lookup exploded for {}", request.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TaskContext {
        TaskContext::new(CollectionRequest::new("Test College"))
    }

    #[tokio::test]
    async fn test_scripted_task_fails_then_succeeds() {
        let task = ScriptedTask::new("t").failing_times(2);
        let ctx = ctx();

        assert!(task.run(&ctx).await.is_err());
        assert!(task.run(&ctx).await.is_err());
        assert!(task.run(&ctx).await.is_ok());
        assert_eq!(task.calls(), 3);
    }

    #[tokio::test]
    async fn test_rate_limited_errors_are_classified() {
        let task = ScriptedTask::new("t").rate_limited_times(1);
        let err = task.run(&ctx()).await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_keys_stable_across_calls() {
        let task = ScriptedTask::new("t").failing_times(1);
        let ctx = ctx();
        let _ = task.run(&ctx).await;
        let _ = task.run(&ctx).await;
        let keys = task.seen_keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn test_static_identity() {
        let request = CollectionRequest::new("X");
        assert_eq!(
            StaticIdentity::resolved(9).resolve(&request).await.unwrap().entity_id,
            Some(9)
        );
        assert!(!StaticIdentity::unresolved()
            .resolve(&request)
            .await
            .unwrap()
            .is_resolved());
        assert!(StaticIdentity::failing("down").resolve(&request).await.is_err());
    }
}
