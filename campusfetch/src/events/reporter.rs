//! Non-blocking progress reporter.
//!
//! Signals go through a bounded queue to a background worker that calls the
//! sink. Emitting never awaits: when the queue is full the signal is dropped
//! and counted.

use super::{ProgressSignal, ProgressSink};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delivery counters for a reporter.
#[derive(Debug, Default)]
pub struct ProgressMetrics {
    queued: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    sink_panics: AtomicU64,
}

impl ProgressMetrics {
    /// Number of signals accepted into the queue.
    #[must_use]
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Number of signals handed to the sink.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of signals dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of sink calls that panicked.
    #[must_use]
    pub fn sink_panics(&self) -> u64 {
        self.sink_panics.load(Ordering::Relaxed)
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "queued": self.queued(),
            "delivered": self.delivered(),
            "dropped": self.dropped(),
            "sink_panics": self.sink_panics(),
        })
    }
}

/// Cheap, cloneable emitter side of a [`ProgressReporter`].
///
/// Percentages are monotonic per handle family: a value lower than one
/// already emitted is discarded.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: Option<mpsc::Sender<ProgressSignal>>,
    metrics: Arc<ProgressMetrics>,
    high_water: Arc<AtomicU8>,
}

impl ProgressHandle {
    /// A handle that discards every signal.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            metrics: Arc::new(ProgressMetrics::default()),
            high_water: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Emits a completion percentage (clamped to 100) without waiting.
    pub fn progress(&self, percent: u8) {
        let percent = percent.min(100);
        let previous = self.high_water.fetch_max(percent, Ordering::SeqCst);
        if percent < previous {
            debug!(percent, previous, "Skipping non-monotonic progress");
            return;
        }
        self.send(ProgressSignal::Progress(percent));
    }

    /// Emits a status message without waiting.
    pub fn status(&self, message: impl Into<String>) {
        self.send(ProgressSignal::Status(message.into()));
    }

    /// Highest percentage emitted so far.
    #[must_use]
    pub fn last_percent(&self) -> u8 {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Delivery counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ProgressMetrics> {
        &self.metrics
    }

    fn send(&self, signal: ProgressSignal) {
        let Some(ref tx) = self.tx else {
            return;
        };
        match tx.try_send(signal) {
            Ok(()) => {
                self.metrics.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    dropped_total = self.metrics.dropped(),
                    reason = %e,
                    "Progress signal dropped"
                );
            }
        }
    }
}

/// Owns the worker that forwards queued signals to a [`ProgressSink`].
#[derive(Debug)]
pub struct ProgressReporter {
    handle: ProgressHandle,
    worker: JoinHandle<()>,
}

impl ProgressReporter {
    /// Starts a worker delivering to `sink` through a queue of `capacity`.
    #[must_use]
    pub fn spawn(sink: Arc<dyn ProgressSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<ProgressSignal>(capacity.max(1));
        let metrics = Arc::new(ProgressMetrics::default());
        let worker_metrics = Arc::clone(&metrics);

        let worker = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let delivery = match signal {
                    ProgressSignal::Progress(p) => {
                        AssertUnwindSafe(sink.on_progress(p)).catch_unwind().await
                    }
                    ProgressSignal::Status(ref m) => {
                        AssertUnwindSafe(sink.on_status(m)).catch_unwind().await
                    }
                };
                if delivery.is_err() {
                    worker_metrics.sink_panics.fetch_add(1, Ordering::Relaxed);
                    warn!(?signal, "Progress sink panicked");
                } else {
                    worker_metrics.delivered.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        Self {
            handle: ProgressHandle {
                tx: Some(tx),
                metrics,
                high_water: Arc::new(AtomicU8::new(0)),
            },
            worker,
        }
    }

    /// Returns an emitter handle.
    #[must_use]
    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    /// Closes the queue and waits up to `timeout` for queued signals to reach the sink.
    ///
    /// Every other clone of the handle must already be dropped for the queue
    /// to drain; otherwise the worker is aborted when the timeout elapses.
    pub async fn finish(self, timeout: Duration) -> Arc<ProgressMetrics> {
        let Self { handle, mut worker } = self;
        let metrics = Arc::clone(&handle.metrics);
        drop(handle);

        if tokio::time::timeout(timeout, &mut worker).await.is_err() {
            warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "Progress worker did not drain in time"
            );
            worker.abort();
        }
        metrics
    }
}
