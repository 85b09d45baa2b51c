//! Progress sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, Level};

/// A coarse-grained progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSignal {
    /// Completion percentage, 0-100.
    Progress(u8),
    /// Human-readable status line.
    Status(String),
}

/// Receives progress and status notifications from a pipeline run.
///
/// Both methods default to no-ops, so an observer only implements what it
/// cares about. Sinks are notified from a background worker, never from the
/// pipeline itself, so a slow sink delays nothing but its own queue.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Called with a completion percentage.
    async fn on_progress(&self, _percent: u8) {}

    /// Called with a status message.
    async fn on_status(&self, _message: &str) {}
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressSink;

#[async_trait]
impl ProgressSink for NoOpProgressSink {}

/// A sink that logs signals through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingProgressSink {
    level: Level,
}

impl Default for LoggingProgressSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingProgressSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl ProgressSink for LoggingProgressSink {
    async fn on_progress(&self, percent: u8) {
        if self.level == Level::DEBUG {
            debug!(percent, "Pipeline progress");
        } else {
            info!(percent, "Pipeline progress");
        }
    }

    async fn on_status(&self, message: &str) {
        if self.level == Level::DEBUG {
            debug!(status = %message, "Pipeline status");
        } else {
            info!(status = %message, "Pipeline status");
        }
    }
}

type ProgressFn = Box<dyn Fn(u8) + Send + Sync>;
type StatusFn = Box<dyn Fn(&str) + Send + Sync>;

/// A sink built from two optional closures, one per signal kind.
#[derive(Default)]
pub struct CallbackSink {
    on_progress: Option<ProgressFn>,
    on_status: Option<StatusFn>,
}

impl CallbackSink {
    /// Creates a sink with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the progress callback.
    #[must_use]
    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Sets the status callback.
    #[must_use]
    pub fn with_status<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_status = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_status", &self.on_status.is_some())
            .finish()
    }
}

#[async_trait]
impl ProgressSink for CallbackSink {
    async fn on_progress(&self, percent: u8) {
        if let Some(ref f) = self.on_progress {
            f(percent);
        }
    }

    async fn on_status(&self, message: &str) {
        if let Some(ref f) = self.on_status {
            f(message);
        }
    }
}

/// A sink that records every signal, in delivery order.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    signals: RwLock<Vec<ProgressSignal>>,
}

impl CollectingProgressSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every collected signal.
    #[must_use]
    pub fn signals(&self) -> Vec<ProgressSignal> {
        self.signals.read().clone()
    }

    /// Returns the collected percentages.
    #[must_use]
    pub fn percents(&self) -> Vec<u8> {
        self.signals
            .read()
            .iter()
            .filter_map(|s| match s {
                ProgressSignal::Progress(p) => Some(*p),
                ProgressSignal::Status(_) => None,
            })
            .collect()
    }

    /// Returns the collected status messages.
    #[must_use]
    pub fn statuses(&self) -> Vec<String> {
        self.signals
            .read()
            .iter()
            .filter_map(|s| match s {
                ProgressSignal::Status(m) => Some(m.clone()),
                ProgressSignal::Progress(_) => None,
            })
            .collect()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.read().is_empty()
    }
}

#[async_trait]
impl ProgressSink for CollectingProgressSink {
    async fn on_progress(&self, percent: u8) {
        self.signals.write().push(ProgressSignal::Progress(percent));
    }

    async fn on_status(&self, message: &str) {
        self.signals
            .write()
            .push(ProgressSignal::Status(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpProgressSink.on_progress(10).await;
        NoOpProgressSink.on_status("x").await;
        LoggingProgressSink::default().on_progress(50).await;
        LoggingProgressSink::debug().on_status("halfway").await;
    }

    #[tokio::test]
    async fn test_callback_sink_optional_slots() {
        let last = Arc::new(AtomicU8::new(0));
        let l = last.clone();
        let sink = CallbackSink::new().with_progress(move |p| l.store(p, Ordering::SeqCst));

        sink.on_progress(30).await;
        sink.on_status("ignored, no status callback").await;
        assert_eq!(last.load(Ordering::SeqCst), 30);
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingProgressSink::new();
        assert!(sink.is_empty());

        sink.on_progress(10).await;
        sink.on_status("Wave 1 done").await;
        sink.on_progress(40).await;

        assert_eq!(sink.percents(), vec![10, 40]);
        assert_eq!(sink.statuses(), vec!["Wave 1 done".to_string()]);
        assert_eq!(sink.signals().len(), 3);
    }
}
