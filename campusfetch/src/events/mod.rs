//! Progress and status reporting.
//!
//! Observers implement [`ProgressSink`]; the driver talks to them only
//! through a [`ProgressHandle`], which queues signals for a background
//! [`ProgressReporter`] worker and never blocks.

mod reporter;
mod sink;

pub use reporter::{ProgressHandle, ProgressMetrics, ProgressReporter};
pub use sink::{
    CallbackSink, CollectingProgressSink, LoggingProgressSink, NoOpProgressSink, ProgressSignal,
    ProgressSink,
};
