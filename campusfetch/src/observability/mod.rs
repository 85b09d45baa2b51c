//! Observability utilities.

mod logging;
mod timer;

pub use logging::{env_filter, init_tracing, LogFormat, DEFAULT_FILTER};
pub use timer::SpanTimer;
