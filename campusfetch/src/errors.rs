//! Error types for the campusfetch orchestration engine.
//!
//! Two layers: [`TaskError`] is what a single collaborator call produces and
//! what the retry executor classifies; [`CampusfetchError`] is what the
//! boundary APIs (configuration, plan building, `try_run`) return.

use regex::Regex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// The main error type for campusfetch boundary operations.
#[derive(Debug, Error)]
pub enum CampusfetchError {
    /// The mandatory identity lookup produced no entity id.
    #[error("Identity unresolved for '{name}': {reason}")]
    IdentityUnresolved {
        /// The requested institution name.
        name: String,
        /// Why the identity could not be established.
        reason: String,
    },

    /// The run was cancelled (deadline or caller) before its identity was known.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Configuration was invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The pipeline plan was invalid.
    #[error("{0}")]
    Plan(#[from] PlanValidationError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CampusfetchError {
    /// Creates an identity unresolved error.
    #[must_use]
    pub fn identity_unresolved(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IdentityUnresolved {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the caller supplied something unusable (4xx territory).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::IdentityUnresolved { .. })
    }
}

/// Error raised when a pipeline plan fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PlanValidationError {
    /// The error message.
    pub message: String,
    /// The waves involved in the error.
    pub waves: Vec<String>,
    /// Stable error code.
    pub code: &'static str,
}

impl PlanValidationError {
    /// Creates a new plan validation error.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            waves: Vec::new(),
            code,
        }
    }

    /// Sets the waves involved.
    #[must_use]
    pub fn with_waves(mut self, waves: Vec<String>) -> Self {
        self.waves = waves;
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map.insert("waves".to_string(), serde_json::json!(self.waves));
        map
    }
}

/// Errors produced by a single collaborator task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The external API refused the call because of rate limiting.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Provider message.
        message: String,
        /// Retry-After hint from the provider, if any.
        retry_after: Option<Duration>,
    },

    /// The task failed.
    #[error("Task failed: {0}")]
    Failed(String),

    /// A single attempt exceeded its timeout.
    #[error("Task timed out after {0:?}")]
    Timeout(Duration),

    /// The run was cancelled before the task could finish.
    #[error("Task cancelled: {0}")]
    Cancelled(String),

    /// The task panicked.
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// Reading from or writing to storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Any other collaborator error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[allow(clippy::expect_used)]
fn rate_limit_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(
            r"(?i)\b429\b|rate[\s_-]?limit|too many requests|quota exceeded|resource[\s_-]?exhausted",
        )
        .expect("rate limit pattern is a valid regex")
    })
}

/// Returns true if a message carries a recognizable rate-limit marker.
#[must_use]
pub fn has_rate_limit_marker(message: &str) -> bool {
    rate_limit_marker().is_match(message)
}

impl TaskError {
    /// Creates a failure error.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Creates a rate-limit error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Returns true if the error signals rate limiting.
    ///
    /// Explicit [`TaskError::RateLimited`] values always qualify; anything
    /// else qualifies when its full message (including an `anyhow` context
    /// chain) contains a marker such as `429` or `rate limit`.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Cancelled(_) | Self::Panicked(_) => false,
            other => has_rate_limit_marker(&format!("{other:#}")),
        }
    }

    /// Returns true if the error ends the retry loop regardless of budget.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Short, stable name of the variant for summaries.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Failed(_) => "failed",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Panicked(_) => "panicked",
            Self::Storage(_) => "storage",
            Self::Other(_) => "other",
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
