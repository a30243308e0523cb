//! Observability utilities.

mod tracing;

pub use tracing::{init_tracing, JobSpanAttributes, LogFormat, SpanTimer, StepSpanAttributes};
