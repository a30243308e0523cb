//! Structured logging setup and span helpers for job and step execution.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::core::{JobExecution, StepExecution};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Installs the global subscriber.
///
/// Filtering honours `RUST_LOG`, defaulting to `info`. Returns an error if a
/// global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?,
    }
    Ok(())
}

/// Span attributes describing a job execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSpanAttributes {
    /// Job name.
    pub job_name: String,
    /// Job instance id.
    pub instance_id: Option<u64>,
    /// Job execution id.
    pub execution_id: Option<u64>,
    /// Batch status.
    pub status: Option<String>,
    /// Exit code.
    pub exit_code: Option<String>,
}

impl JobSpanAttributes {
    /// Attributes of a job execution.
    #[must_use]
    pub fn from_execution(execution: &JobExecution) -> Self {
        Self {
            job_name: execution.job_name().to_string(),
            instance_id: Some(execution.job_instance.id),
            execution_id: Some(execution.id),
            status: Some(execution.status.as_str().to_string()),
            exit_code: Some(execution.exit_status.code.clone()),
        }
    }

    /// Converts to flat key-value attributes.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("job.name".to_string(), self.job_name.clone());
        if let Some(v) = self.instance_id {
            attrs.insert("job.instance_id".to_string(), v.to_string());
        }
        if let Some(v) = self.execution_id {
            attrs.insert("job.execution_id".to_string(), v.to_string());
        }
        if let Some(ref v) = self.status {
            attrs.insert("job.status".to_string(), v.clone());
        }
        if let Some(ref v) = self.exit_code {
            attrs.insert("job.exit_code".to_string(), v.clone());
        }
        attrs
    }
}

/// Span attributes describing a step execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSpanAttributes {
    /// Step name.
    pub step_name: String,
    /// Status.
    pub status: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Items read, written, skipped.
    pub counts: Option<(u64, u64, u64)>,
    /// Error message if failed.
    pub error: Option<String>,
}

impl StepSpanAttributes {
    /// Attributes of a finished step execution.
    #[must_use]
    pub fn from_execution(execution: &StepExecution) -> Self {
        Self {
            step_name: execution.step_name.clone(),
            status: Some(execution.status.as_str().to_string()),
            duration_ms: None,
            counts: Some((
                execution.read_count,
                execution.write_count,
                execution.skip_count(),
            )),
            error: execution.failures.last().map(|f| f.message.clone()),
        }
    }

    /// Sets the duration.
    #[must_use]
    pub const fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Converts to flat key-value attributes.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("step.name".to_string(), self.step_name.clone());
        if let Some(ref v) = self.status {
            attrs.insert("step.status".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("step.duration_ms".to_string(), v.to_string());
        }
        if let Some((read, written, skipped)) = self.counts {
            attrs.insert("step.read".to_string(), read.to_string());
            attrs.insert("step.written".to_string(), written.to_string());
            attrs.insert("step.skipped".to_string(), skipped.to_string());
        }
        if let Some(ref v) = self.error {
            attrs.insert("step.error".to_string(), v.clone());
        }
        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JobInstance, JobParameters};

    #[test]
    fn test_job_span_attributes() {
        let instance = JobInstance {
            id: 3,
            job_name: "import".into(),
            job_key: "k".into(),
        };
        let execution = JobExecution::new(7, instance, JobParameters::new());
        let attrs = JobSpanAttributes::from_execution(&execution).to_attributes();
        assert_eq!(attrs.get("job.name"), Some(&"import".to_string()));
        assert_eq!(attrs.get("job.execution_id"), Some(&"7".to_string()));
        assert_eq!(attrs.get("job.status"), Some(&"STARTING".to_string()));
    }

    #[test]
    fn test_step_span_attributes() {
        let mut step = StepExecution::new(1, 1, "load");
        step.read_count = 5;
        step.write_count = 4;
        step.process_skip_count = 1;
        let attrs = StepSpanAttributes::from_execution(&step)
            .with_duration_ms(12.5)
            .to_attributes();
        assert_eq!(attrs.get("step.written"), Some(&"4".to_string()));
        assert_eq!(attrs.get("step.skipped"), Some(&"1".to_string()));
        assert_eq!(attrs.get("step.duration_ms"), Some(&"12.5".to_string()));
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("test_span");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(timer.name(), "test_span");
        let duration = timer.finish();
        assert!(duration >= 10.0);
    }

    #[test]
    fn test_init_tracing_twice_errors() {
        let first = init_tracing(LogFormat::Json);
        let second = init_tracing(LogFormat::Pretty);
        assert!(first.is_err() || second.is_err());
    }
}
