//! Retry executor with rate-limit aware backoff.
//!
//! Every attempt is preceded by a fixed pacing delay so that a wave of many
//! tasks does not burst the external API. Failures back off for
//! `base_delay_ms`, or for the longer `rate_limit_delay_ms` when the error
//! carries a rate-limit marker. The retry budget is shared by both kinds.

use crate::cancellation::CancellationToken;
use crate::errors::TaskError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_rate_limit_delay_ms() -> u64 {
    10_000
}

fn default_pacing_ms() -> u64 {
    1_000
}

/// Retry policy applied uniformly to every wave task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means exactly one attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff after an ordinary failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff after a rate-limited failure.
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    /// Fixed delay before every attempt, the first included.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Upper bound of random delay added on top of a backoff.
    #[serde(default)]
    pub jitter_ms: u64,
    /// Per-attempt timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            pacing_ms: default_pacing_ms(),
            jitter_ms: 0,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the ordinary backoff.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the rate-limit backoff.
    #[must_use]
    pub fn with_rate_limit_delay_ms(mut self, delay: u64) -> Self {
        self.rate_limit_delay_ms = delay;
        self
    }

    /// Sets the pacing delay.
    #[must_use]
    pub fn with_pacing_ms(mut self, pacing: u64) -> Self {
        self.pacing_ms = pacing;
        self
    }

    /// Sets the jitter bound.
    #[must_use]
    pub fn with_jitter_ms(mut self, jitter: u64) -> Self {
        self.jitter_ms = jitter;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_attempt_timeout_ms(mut self, timeout: u64) -> Self {
        self.attempt_timeout_ms = Some(timeout);
        self
    }

    /// Maximum number of attempts this policy allows.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff to wait after `error`.
    ///
    /// Never shorter than the configured delay for the error's class; a
    /// provider `retry_after` hint can only lengthen it.
    #[must_use]
    pub fn backoff_for(&self, error: &TaskError) -> Duration {
        let mut delay = if error.is_rate_limited() {
            Duration::from_millis(self.rate_limit_delay_ms)
        } else {
            Duration::from_millis(self.base_delay_ms)
        };

        if let TaskError::RateLimited {
            retry_after: Some(hint),
            ..
        } = error
        {
            delay = delay.max(*hint);
        }

        if self.jitter_ms > 0 {
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms));
        }
        delay
    }
}

/// Bookkeeping for one executor call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts started.
    pub attempts: u32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Backoff delays slept between attempts, in order.
    pub delays: Vec<Duration>,
    /// How many of the failures were rate limited.
    pub rate_limited: u32,
}

impl RetryState {
    /// Number of retries performed.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.delays.len()
    }
}

/// Result of an executor call together with its retry bookkeeping.
#[derive(Debug)]
pub struct RetryRun<T> {
    /// The final value, or the last error once the budget is spent.
    pub result: Result<T, TaskError>,
    /// What the executor did to get there.
    pub state: RetryState,
}

/// Runs fallible operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Creates an executor for a policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, the budget is spent, or `cancel` fires.
    ///
    /// Never panics on task failure: the last error is returned as a value.
    /// Cancellation interrupts pacing, backoff and the in-flight attempt alike
    /// and yields [`TaskError::Cancelled`].
    pub async fn execute<T, F, Fut>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RetryRun<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let mut state = RetryState::default();
        let pacing = Duration::from_millis(self.policy.pacing_ms);

        loop {
            if !cancel.sleep(pacing).await {
                return Self::cancelled(cancel, state);
            }

            state.attempts += 1;
            match self.attempt(operation(), cancel).await {
                Ok(value) => {
                    if state.attempts > 1 {
                        tracing::info!(
                            task = key,
                            attempt = state.attempts,
                            max_attempts = self.policy.max_attempts(),
                            "Task succeeded after retry"
                        );
                    }
                    return RetryRun {
                        result: Ok(value),
                        state,
                    };
                }
                Err(e) if e.is_terminal() => {
                    state.last_error = Some(e.to_string());
                    return RetryRun {
                        result: Err(e),
                        state,
                    };
                }
                Err(e) => {
                    state.last_error = Some(e.to_string());
                    if e.is_rate_limited() {
                        state.rate_limited += 1;
                    }

                    if state.attempts > self.policy.max_retries {
                        tracing::error!(
                            task = key,
                            attempts = state.attempts,
                            error = %e,
                            "Task failed, retries exhausted"
                        );
                        return RetryRun {
                            result: Err(e),
                            state,
                        };
                    }

                    let delay = self.policy.backoff_for(&e);
                    tracing::warn!(
                        task = key,
                        attempt = state.attempts,
                        max_attempts = self.policy.max_attempts(),
                        rate_limited = e.is_rate_limited(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Task failed, retrying"
                    );
                    state.delays.push(delay);

                    if !cancel.sleep(delay).await {
                        return Self::cancelled(cancel, state);
                    }
                }
            }
        }
    }

    async fn attempt<T, Fut>(&self, fut: Fut, cancel: &CancellationToken) -> Result<T, TaskError>
    where
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let guarded = async {
            match self.policy.attempt_timeout_ms {
                Some(ms) => {
                    let limit = Duration::from_millis(ms);
                    tokio::time::timeout(limit, fut)
                        .await
                        .unwrap_or(Err(TaskError::Timeout(limit)))
                }
                None => fut.await,
            }
        };

        match cancel.run_until_cancelled(guarded).await {
            Some(result) => result,
            None => Err(cancelled_error(cancel)),
        }
    }

    fn cancelled<T>(cancel: &CancellationToken, mut state: RetryState) -> RetryRun<T> {
        let err = cancelled_error(cancel);
        state.last_error = Some(err.to_string());
        RetryRun {
            result: Err(err),
            state,
        }
    }
}

fn cancelled_error(cancel: &CancellationToken) -> TaskError {
    TaskError::Cancelled(cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
}
