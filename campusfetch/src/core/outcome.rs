//! Tagged per-task outcome.

use crate::errors::TaskError;
use serde::Serialize;

/// The settled result of one task: success or failure, never thrown.
#[derive(Debug)]
pub enum Outcome<T, E = TaskError> {
    /// The task produced a value.
    Success(T),
    /// The task failed after its retry budget.
    Failure(E),
}

impl<T, E> Outcome<T, E> {
    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true for `Failure`.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Borrows the success value.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(v) => Some(v),
            Self::Failure(_) => None,
        }
    }

    /// Borrows the failure.
    #[must_use]
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Success(_) => None,
            Self::Failure(e) => Some(e),
        }
    }

    /// Converts back into a `Result`.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failure(e) => Err(e),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) => Self::Failure(e),
        }
    }
}

/// What happened to one task of a wave.
#[derive(Debug)]
pub struct TaskReport {
    /// Task name.
    pub task: String,
    /// Number of attempts made (at least 1 unless cancelled before starting).
    pub attempts: u32,
    /// Wall time spent in the task, pacing and backoff included.
    pub duration_ms: f64,
    /// The settled outcome.
    pub outcome: Outcome<serde_json::Value>,
}

impl TaskReport {
    /// Returns true if the task succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Serializable view of this report.
    #[must_use]
    pub fn to_record(&self) -> TaskRecord {
        let (status, error, error_kind) = match &self.outcome {
            Outcome::Success(_) => ("success", None, None),
            Outcome::Failure(e) => ("failure", Some(e.to_string()), Some(e.kind())),
        };
        TaskRecord {
            task: self.task.clone(),
            status,
            attempts: self.attempts,
            duration_ms: self.duration_ms,
            error,
            error_kind,
        }
    }
}

/// Flat, serializable form of a [`TaskReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    /// Task name.
    pub task: String,
    /// `"success"` or `"failure"`.
    pub status: &'static str,
    /// Attempts made.
    pub attempts: u32,
    /// Duration in milliseconds.
    pub duration_ms: f64,
    /// Error message for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error kind for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_result() {
        let ok: Outcome<i32, String> = Ok(1).into();
        let err: Outcome<i32, String> = Err("x".to_string()).into();
        assert!(ok.is_success());
        assert_eq!(ok.value(), Some(&1));
        assert!(err.is_failure());
        assert_eq!(err.error().map(String::as_str), Some("x"));
        assert_eq!(err.into_result(), Err("x".to_string()));
    }

    #[test]
    fn test_report_to_record() {
        let report = TaskReport {
            task: "fees".into(),
            attempts: 3,
            duration_ms: 12.0,
            outcome: Outcome::Failure(TaskError::failed("boom")),
        };
        let record = report.to_record();
        assert_eq!(record.status, "failure");
        assert_eq!(record.error_kind, Some("failed"));
        assert_eq!(record.attempts, 3);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["task"], "fees");
    }
}
