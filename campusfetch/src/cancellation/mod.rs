//! Cooperative cancellation for pipeline runs.
//!
//! One [`CancellationToken`] is shared by a run and every task it launches;
//! deadlines and callers cancel it, and all suspension points observe it.

mod token;

pub use token::{CancelCallback, CancellationToken};
