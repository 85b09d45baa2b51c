//! Per-run context handed to every task.

use super::{CollectionRequest, IdentityResult};
use crate::cancellation::CancellationToken;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Context shared by every task of one pipeline run.
///
/// Cheap to clone: the request and cancellation token are reference counted.
#[derive(Debug, Clone)]
pub struct TaskContext {
    run_id: Uuid,
    request: Arc<CollectionRequest>,
    identity: IdentityResult,
    cancel_token: Arc<CancellationToken>,
}

impl TaskContext {
    /// Creates a context for a request before its identity is known.
    #[must_use]
    pub fn new(request: CollectionRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            request: Arc::new(request),
            identity: IdentityResult::unresolved(),
            cancel_token: Arc::new(CancellationToken::new()),
        }
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel_token = token;
        self
    }

    /// Returns a copy of this context carrying a resolved identity.
    #[must_use]
    pub fn with_identity(&self, identity: IdentityResult) -> Self {
        Self {
            identity,
            ..self.clone()
        }
    }

    /// The unique id of this run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The request being collected.
    #[must_use]
    pub fn request(&self) -> &CollectionRequest {
        &self.request
    }

    /// The resolved identity (unresolved until the driver sets it).
    #[must_use]
    pub fn identity(&self) -> IdentityResult {
        self.identity
    }

    /// The entity id, if resolved.
    #[must_use]
    pub fn entity_id(&self) -> Option<i64> {
        self.identity.entity_id
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Returns true if the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// A key that is stable across retries of the same task for the same request.
    ///
    /// Collaborators use it to make their writes upserts.
    #[must_use]
    pub fn idempotency_key(&self, task_name: &str) -> String {
        generate_idempotency_key(&[&self.request.fingerprint(), task_name])
    }
}

/// Generates an idempotency key from components.
#[must_use]
pub fn generate_idempotency_key(components: &[&str]) -> String {
    let combined = components.join(":");
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    let result = hasher.finalize();
    format!("idem:{}", hex::encode(&result[..16]))
}
