//! Pipeline configuration.
//!
//! Every knob has a serde default, so a partial JSON document (or none at
//! all) yields a usable configuration. `CAMPUSFETCH_*` environment variables
//! override individual values on top of the file.

use crate::errors::CampusfetchError;
use crate::pipeline::{RetryPolicy, SuccessPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Prefix of the environment overrides.
pub const ENV_PREFIX: &str = "CAMPUSFETCH_";

fn default_cooldown_ms() -> u64 {
    2_000
}

fn default_max_concurrency() -> usize {
    4
}

fn default_progress_queue_capacity() -> usize {
    64
}

fn default_progress_drain_timeout_ms() -> u64 {
    1_000
}

/// Configuration of a [`crate::pipeline::PipelineDriver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retry policy applied to every wave task and to the expansion read.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Delay between consecutive waves.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Maximum tasks in flight within a wave.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Capacity of the progress queue; signals beyond it are dropped.
    #[serde(default = "default_progress_queue_capacity")]
    pub progress_queue_capacity: usize,
    /// How long to wait for queued progress signals at the end of a run.
    #[serde(default = "default_progress_drain_timeout_ms")]
    pub progress_drain_timeout_ms: u64,
    /// Deadline for the whole run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// How failed tasks affect the verdict.
    #[serde(default)]
    pub success_policy: SuccessPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            cooldown_ms: default_cooldown_ms(),
            max_concurrency: default_max_concurrency(),
            progress_queue_capacity: default_progress_queue_capacity(),
            progress_drain_timeout_ms: default_progress_drain_timeout_ms(),
            deadline_ms: None,
            success_policy: SuccessPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, CampusfetchError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON file and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CampusfetchError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Applies `CAMPUSFETCH_*` overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self, CampusfetchError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up by full variable name, then validates.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, CampusfetchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("MAX_RETRIES") {
            self.retry.max_retries = parse_var("MAX_RETRIES", &v)?;
        }
        if let Some(v) = var("BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_var("BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = var("RATE_LIMIT_DELAY_MS") {
            self.retry.rate_limit_delay_ms = parse_var("RATE_LIMIT_DELAY_MS", &v)?;
        }
        if let Some(v) = var("PACING_MS") {
            self.retry.pacing_ms = parse_var("PACING_MS", &v)?;
        }
        if let Some(v) = var("COOLDOWN_MS") {
            self.cooldown_ms = parse_var("COOLDOWN_MS", &v)?;
        }
        if let Some(v) = var("MAX_CONCURRENCY") {
            self.max_concurrency = parse_var("MAX_CONCURRENCY", &v)?;
        }
        if let Some(v) = var("DEADLINE_MS") {
            self.deadline_ms = Some(parse_var("DEADLINE_MS", &v)?);
        }

        self.validate()?;
        Ok(self)
    }

    /// Checks that the values are usable.
    pub fn validate(&self) -> Result<(), CampusfetchError> {
        if self.max_concurrency == 0 {
            return Err(CampusfetchError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.progress_queue_capacity == 0 {
            return Err(CampusfetchError::Config(
                "progress_queue_capacity must be at least 1".to_string(),
            ));
        }
        if !self.success_policy.is_valid() {
            return Err(CampusfetchError::Config(
                "success threshold must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the inter-wave cooldown.
    #[must_use]
    pub fn with_cooldown_ms(mut self, cooldown: u64) -> Self {
        self.cooldown_ms = cooldown;
        self
    }

    /// Sets the concurrency cap.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Sets the progress queue capacity.
    #[must_use]
    pub fn with_progress_queue_capacity(mut self, capacity: usize) -> Self {
        self.progress_queue_capacity = capacity;
        self
    }

    /// Sets the run deadline.
    #[must_use]
    pub fn with_deadline_ms(mut self, deadline: u64) -> Self {
        self.deadline_ms = Some(deadline);
        self
    }

    /// Sets the success policy.
    #[must_use]
    pub fn with_success_policy(mut self, policy: SuccessPolicy) -> Self {
        self.success_policy = policy;
        self
    }

    /// The cooldown as a duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// The drain timeout as a duration.
    #[must_use]
    pub fn progress_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.progress_drain_timeout_ms)
    }

    /// The deadline as a duration.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, CampusfetchError> {
    value.trim().parse().map_err(|_| {
        CampusfetchError::Config(format!("{ENV_PREFIX}{name} has invalid value '{value}'"))
    })
}
