//! Wave execution.
//!
//! A wave is a set of independent tasks run concurrently. Every task is
//! wrapped in the retry executor, a semaphore caps how many run at once, and
//! the wave only returns once every task has settled. One task failing (or
//! panicking) never affects its siblings.
//!
//! Tasks live in a [`JoinSet`], so dropping a wave future aborts its tasks.

use super::retry::RetryExecutor;
use crate::context::TaskContext;
use crate::core::{Outcome, TaskReport};
use crate::errors::{panic_message, TaskError};
use crate::events::ProgressHandle;
use crate::observability::SpanTimer;
use crate::tasks::Task;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Progress milestone emitted once a wave settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    /// Completion percentage to report.
    pub percent: u8,
    /// Status message to report.
    pub message: String,
}

impl Milestone {
    /// Creates a milestone.
    #[must_use]
    pub fn new(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent,
            message: message.into(),
        }
    }
}

/// An ordered list of independent tasks run as one step.
#[derive(Debug, Clone)]
pub struct Wave {
    /// Wave name, used in logs and summaries.
    pub name: String,
    /// Tasks, in the order their reports are returned.
    pub tasks: Vec<Arc<dyn Task>>,
    /// Milestone reported after the wave settles.
    pub milestone: Option<Milestone>,
}

impl Wave {
    /// Creates an empty wave.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            milestone: None,
        }
    }

    /// Adds a task.
    #[must_use]
    pub fn task(mut self, task: Arc<dyn Task>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Adds several tasks.
    #[must_use]
    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = Arc<dyn Task>>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// Sets the milestone.
    #[must_use]
    pub fn with_milestone(mut self, percent: u8, message: impl Into<String>) -> Self {
        self.milestone = Some(Milestone::new(percent, message));
        self
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the wave has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Settled results of one wave, positionally aligned with its tasks.
#[derive(Debug)]
pub struct WaveResult {
    /// Wave name.
    pub name: String,
    /// One report per task, in input order.
    pub reports: Vec<TaskReport>,
    /// Wall time of the whole wave.
    pub duration_ms: f64,
}

impl WaveResult {
    /// An empty result, for waves that never ran.
    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reports: Vec::new(),
            duration_ms: 0.0,
        }
    }

    /// Number of reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// Returns true if the wave had no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// The outcomes, in task order.
    pub fn outcomes(&self) -> impl Iterator<Item = &Outcome<serde_json::Value>> {
        self.reports.iter().map(|r| &r.outcome)
    }

    /// Number of successful tasks.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    /// Number of failed tasks.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }
}

/// Runs waves with a shared retry policy and concurrency cap.
#[derive(Debug, Clone)]
pub struct WaveRunner {
    executor: RetryExecutor,
    limiter: Arc<Semaphore>,
    max_concurrency: usize,
}

impl WaveRunner {
    /// Creates a runner allowing at most `max_concurrency` tasks in flight.
    #[must_use]
    pub fn new(executor: RetryExecutor, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            executor,
            limiter: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// The concurrency cap.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// The retry executor wrapping every task.
    #[must_use]
    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Runs every task of `wave` concurrently and waits for all of them.
    ///
    /// Returns exactly one report per task in input order. Emits the wave's
    /// milestone to `progress` after the last task settles.
    pub async fn run_wave(
        &self,
        wave: Wave,
        ctx: &TaskContext,
        progress: &ProgressHandle,
    ) -> WaveResult {
        let timer = SpanTimer::start(wave.name.clone());
        let total = wave.len();
        info!(
            wave = %wave.name,
            tasks = total,
            max_concurrency = self.max_concurrency,
            "Starting wave"
        );

        let names: Vec<String> = wave.tasks.iter().map(|t| t.name().to_string()).collect();
        let mut pending = JoinSet::new();
        for (index, task) in wave.tasks.into_iter().enumerate() {
            let executor = self.executor.clone();
            let limiter = Arc::clone(&self.limiter);
            let ctx = ctx.clone();

            pending.spawn(async move {
                let Ok(_permit) = limiter.acquire_owned().await else {
                    let report = TaskReport {
                        task: task.name().to_string(),
                        attempts: 0,
                        duration_ms: 0.0,
                        outcome: Outcome::Failure(TaskError::failed("concurrency limiter closed")),
                    };
                    return (index, report);
                };
                (index, run_task(&executor, task.as_ref(), &ctx).await)
            });
        }

        let mut slots: Vec<Option<TaskReport>> = (0..total).map(|_| None).collect();
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(join_err) => warn!(wave = %wave.name, error = %join_err, "Task join failed"),
            }
        }

        let reports = slots
            .into_iter()
            .zip(names)
            .map(|(slot, task)| {
                slot.unwrap_or_else(|| TaskReport {
                    task,
                    attempts: 0,
                    duration_ms: 0.0,
                    outcome: Outcome::Failure(TaskError::Cancelled("task aborted".to_string())),
                })
            })
            .collect();

        let result = WaveResult {
            name: wave.name,
            reports,
            duration_ms: timer.finish(),
        };

        info!(
            wave = %result.name,
            succeeded = result.succeeded(),
            failed = result.failed(),
            duration_ms = result.duration_ms,
            "Wave settled"
        );

        if let Some(milestone) = wave.milestone {
            progress.progress(milestone.percent);
            progress.status(milestone.message);
        }

        result
    }
}

/// Runs one task under the retry executor.
///
/// Attempts are counted outside the executor so a panic on a later attempt
/// still reports how many attempts were started.
async fn run_task(executor: &RetryExecutor, task: &dyn Task, ctx: &TaskContext) -> TaskReport {
    let timer = SpanTimer::start(task.name());
    debug!(task = task.name(), "Task started");

    let started = AtomicU32::new(0);
    let run = AssertUnwindSafe(executor.execute(task.name(), ctx.cancel_token(), || {
        started.fetch_add(1, Ordering::SeqCst);
        task.run(ctx)
    }))
    .catch_unwind()
    .await;

    let (attempts, outcome): (u32, Outcome<serde_json::Value>) = match run {
        Ok(run) => (run.state.attempts, run.result.into()),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(task = task.name(), error = %message, "Task panicked");
            (
                started.load(Ordering::SeqCst),
                Outcome::Failure(TaskError::Panicked(message)),
            )
        }
    };

    TaskReport {
        task: task.name().to_string(),
        attempts,
        duration_ms: timer.finish(),
        outcome,
    }
}
