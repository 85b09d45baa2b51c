//! Run summaries and the success verdict.
//!
//! Waves never fail as a whole, so a run that reaches `Done` may still have
//! lost individual tasks. The summary lists every wave and task outcome and a
//! [`SuccessPolicy`] turns that into a single [`Verdict`].

use super::wave::WaveResult;
use crate::context::{CollectionRequest, IdentityResult};
use crate::core::{PipelineState, TaskRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How to judge a run that reached `Done` with some failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "min_success_rate")]
pub enum SuccessPolicy {
    /// Any failed task makes the run a partial failure (default).
    #[default]
    Strict,
    /// Succeeds when at least this fraction of tasks succeeded.
    Threshold(f64),
    /// Reaching `Done` is success, whatever the task outcomes.
    BestEffort,
}

impl SuccessPolicy {
    /// Returns true if the policy parameters are usable.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Threshold(t) => (0.0..=1.0).contains(t),
            Self::Strict | Self::BestEffort => true,
        }
    }
}

/// Overall judgement of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every wave ran and the success policy is satisfied.
    Succeeded,
    /// Every wave ran but too many tasks failed.
    PartialFailure,
    /// The identity precondition failed; nothing else ran.
    Aborted,
    /// An unexpected panic stopped the run.
    Errored,
}

impl Verdict {
    /// Returns true for [`Verdict::Succeeded`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Serializable outcome of one wave.
#[derive(Debug, Clone, Serialize)]
pub struct WaveSummary {
    /// Wave name.
    pub name: String,
    /// True for the wave built by the expander.
    pub dynamic: bool,
    /// Tasks that succeeded.
    pub succeeded: usize,
    /// Tasks that failed.
    pub failed: usize,
    /// Wall time of the wave.
    pub duration_ms: f64,
    /// Expansion error, when the dynamic wave could not be built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-task records, in task order.
    pub tasks: Vec<TaskRecord>,
}

impl WaveSummary {
    /// Summarizes a settled wave.
    #[must_use]
    pub fn from_result(result: &WaveResult, dynamic: bool) -> Self {
        Self {
            name: result.name.clone(),
            dynamic,
            succeeded: result.succeeded(),
            failed: result.failed(),
            duration_ms: result.duration_ms,
            error: None,
            tasks: result.reports.iter().map(|r| r.to_record()).collect(),
        }
    }

    /// A dynamic wave whose tasks could not be built.
    #[must_use]
    pub fn expansion_failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dynamic: true,
            succeeded: 0,
            failed: 0,
            duration_ms: 0.0,
            error: Some(error.into()),
            tasks: Vec::new(),
        }
    }

    /// Returns true if no task failed and the wave was built.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.error.is_none()
    }
}

/// Everything a caller learns from one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// The request that was collected.
    pub request: CollectionRequest,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// State the run ended in.
    pub final_state: PipelineState,
    /// Identity, once resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityResult>,
    /// Waves in execution order.
    pub waves: Vec<WaveSummary>,
    /// Reason for an `Aborted` or `Errored` run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the run's token was cancelled, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Wall time of the run.
    pub duration_ms: f64,
    /// Overall judgement.
    pub verdict: Verdict,
    /// Progress delivery counters.
    pub progress: serde_json::Value,
}

impl PipelineSummary {
    /// Creates an empty summary for a run that is starting.
    #[must_use]
    pub fn new(run_id: Uuid, request: CollectionRequest) -> Self {
        Self {
            run_id,
            request,
            started_at: Utc::now(),
            final_state: PipelineState::Start,
            identity: None,
            waves: Vec::new(),
            error: None,
            cancel_reason: None,
            duration_ms: 0.0,
            verdict: Verdict::Aborted,
            progress: serde_json::Value::Null,
        }
    }

    /// Total number of tasks that ran.
    #[must_use]
    pub fn total_tasks(&self) -> usize {
        self.waves.iter().map(|w| w.tasks.len()).sum()
    }

    /// Number of tasks that succeeded.
    #[must_use]
    pub fn succeeded_tasks(&self) -> usize {
        self.waves.iter().map(|w| w.succeeded).sum()
    }

    /// Number of tasks that failed.
    #[must_use]
    pub fn failed_tasks(&self) -> usize {
        self.waves.iter().map(|w| w.failed).sum()
    }

    /// Fraction of tasks that succeeded; `1.0` when nothing ran.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_tasks();
        if total == 0 {
            return 1.0;
        }
        self.succeeded_tasks() as f64 / total as f64
    }

    /// Returns true if the run was cut short by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason.is_some()
    }

    /// Returns true if the dynamic wave could not be built.
    #[must_use]
    pub fn expansion_failed(&self) -> bool {
        self.waves.iter().any(|w| w.dynamic && w.error.is_some())
    }

    /// Finds a wave by name.
    #[must_use]
    pub fn wave(&self, name: &str) -> Option<&WaveSummary> {
        self.waves.iter().find(|w| w.name == name)
    }

    /// Computes the verdict for the final state under `policy`.
    ///
    /// A cancelled run that still reached `Done` is never a success.
    #[must_use]
    pub fn evaluate(&self, policy: SuccessPolicy) -> Verdict {
        match self.final_state {
            PipelineState::Aborted | PipelineState::Start => Verdict::Aborted,
            PipelineState::Done if self.is_cancelled() => Verdict::PartialFailure,
            PipelineState::Done => {
                let passed = match policy {
                    SuccessPolicy::Strict => self.waves.iter().all(WaveSummary::is_clean),
                    SuccessPolicy::Threshold(min) => {
                        !self.expansion_failed() && self.success_rate() >= min
                    }
                    SuccessPolicy::BestEffort => true,
                };
                if passed {
                    Verdict::Succeeded
                } else {
                    Verdict::PartialFailure
                }
            }
            _ => Verdict::Errored,
        }
    }
}
