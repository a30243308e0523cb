//! Lifecycle listeners for jobs, steps and chunks.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};

use super::skip::SkipPhase;
use crate::core::{ExitStatus, JobExecution, StepExecution};
use crate::errors::ItemError;

/// Callbacks fired around job, step and chunk boundaries.
///
/// Every hook defaults to a no-op. Listeners must not fail; they observe.
#[async_trait]
pub trait BatchListener: Send + Sync {
    /// Before the job's flow starts.
    async fn before_job(&self, _job: &JobExecution) {}

    /// After the job's final status is set.
    async fn after_job(&self, _job: &JobExecution) {}

    /// After a step is marked STARTED.
    async fn before_step(&self, _step: &StepExecution) {}

    /// After a step finishes; a returned status is combined into the step's
    /// exit status.
    async fn after_step(&self, _step: &StepExecution) -> Option<ExitStatus> {
        None
    }

    /// Before a chunk is read.
    async fn before_chunk(&self, _step: &StepExecution) {}

    /// After a chunk committed.
    async fn after_chunk(&self, _step: &StepExecution) {}

    /// After a chunk rolled back.
    async fn after_chunk_error(&self, _step: &StepExecution, _error: &ItemError) {}

    /// When an item failure is skipped.
    async fn on_skip(&self, _step: &StepExecution, _phase: SkipPhase, _error: &ItemError) {}

    /// Before a failed attempt is retried.
    async fn on_retry(&self, _step: &StepExecution, _attempt: usize, _error: &ItemError) {}
}

/// Fans every callback out to a list of listeners, in registration order.
#[derive(Clone, Default)]
pub struct CompositeListener {
    listeners: Vec<Arc<dyn BatchListener>>,
}

impl std::fmt::Debug for CompositeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeListener")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl CompositeListener {
    /// Creates an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn register(&mut self, listener: Arc<dyn BatchListener>) {
        self.listeners.push(listener);
    }

    /// Registers a listener, builder style.
    #[must_use]
    pub fn with(mut self, listener: Arc<dyn BatchListener>) -> Self {
        self.register(listener);
        self
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[async_trait]
impl BatchListener for CompositeListener {
    async fn before_job(&self, job: &JobExecution) {
        for l in &self.listeners {
            l.before_job(job).await;
        }
    }

    async fn after_job(&self, job: &JobExecution) {
        for l in &self.listeners {
            l.after_job(job).await;
        }
    }

    async fn before_step(&self, step: &StepExecution) {
        for l in &self.listeners {
            l.before_step(step).await;
        }
    }

    async fn after_step(&self, step: &StepExecution) -> Option<ExitStatus> {
        let mut combined: Option<ExitStatus> = None;
        for l in &self.listeners {
            if let Some(status) = l.after_step(step).await {
                combined = Some(match combined {
                    Some(existing) => existing.and(&status),
                    None => status,
                });
            }
        }
        combined
    }

    async fn before_chunk(&self, step: &StepExecution) {
        for l in &self.listeners {
            l.before_chunk(step).await;
        }
    }

    async fn after_chunk(&self, step: &StepExecution) {
        for l in &self.listeners {
            l.after_chunk(step).await;
        }
    }

    async fn after_chunk_error(&self, step: &StepExecution, error: &ItemError) {
        for l in &self.listeners {
            l.after_chunk_error(step, error).await;
        }
    }

    async fn on_skip(&self, step: &StepExecution, phase: SkipPhase, error: &ItemError) {
        for l in &self.listeners {
            l.on_skip(step, phase, error).await;
        }
    }

    async fn on_retry(&self, step: &StepExecution, attempt: usize, error: &ItemError) {
        for l in &self.listeners {
            l.on_retry(step, attempt, error).await;
        }
    }
}

/// Listener that logs every callback through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingListener {
    level: Level,
}

impl Default for LoggingListener {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingListener {
    /// Creates a listener logging at `level`.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Debug-level listener.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log(&self, event: &str, detail: &str) {
        if self.level == Level::DEBUG {
            debug!(event = %event, "{}", detail);
        } else {
            info!(event = %event, "{}", detail);
        }
    }
}

#[async_trait]
impl BatchListener for LoggingListener {
    async fn before_job(&self, job: &JobExecution) {
        self.log("job.started", &format!("Job '{}' execution {} started", job.job_name(), job.id));
    }

    async fn after_job(&self, job: &JobExecution) {
        self.log(
            "job.finished",
            &format!(
                "Job '{}' execution {} finished: {} ({})",
                job.job_name(),
                job.id,
                job.status,
                job.exit_status.code
            ),
        );
    }

    async fn before_step(&self, step: &StepExecution) {
        self.log("step.started", &format!("Step '{}' started", step.step_name));
    }

    async fn after_step(&self, step: &StepExecution) -> Option<ExitStatus> {
        self.log("step.finished", &step.summary());
        None
    }

    async fn after_chunk(&self, step: &StepExecution) {
        if self.level == Level::DEBUG {
            debug!(
                step = %step.step_name,
                commits = step.commit_count,
                written = step.write_count,
                "Chunk committed"
            );
        }
    }

    async fn after_chunk_error(&self, step: &StepExecution, error: &ItemError) {
        warn!(step = %step.step_name, error = %error, "Chunk rolled back");
    }

    async fn on_skip(&self, step: &StepExecution, phase: SkipPhase, error: &ItemError) {
        warn!(step = %step.step_name, phase = phase.as_str(), error = %error, "Item skipped");
    }

    async fn on_retry(&self, step: &StepExecution, attempt: usize, error: &ItemError) {
        self.log(
            "step.retry",
            &format!("Step '{}' retrying attempt {} after {}", step.step_name, attempt, error),
        );
    }
}

/// Listener that records callbacks for inspection in tests.
#[derive(Debug, Default)]
pub struct CollectingListener {
    events: parking_lot::RwLock<Vec<(String, serde_json::Value)>>,
    after_step_status: Option<ExitStatus>,
}

impl CollectingListener {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `after_step` return `status`.
    #[must_use]
    pub fn with_after_step_status(mut self, status: ExitStatus) -> Self {
        self.after_step_status = Some(status);
        self
    }

    /// All events in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.read().clone()
    }

    /// Event names in arrival order.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.events.read().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<(String, serde_json::Value)> {
        self.events
            .read()
            .iter()
            .filter(|(n, _)| n.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Clears recorded events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    fn record(&self, name: &str, data: serde_json::Value) {
        self.events.write().push((name.to_string(), data));
    }
}

#[async_trait]
impl BatchListener for CollectingListener {
    async fn before_job(&self, job: &JobExecution) {
        self.record("job.before", json!({"job": job.job_name(), "execution_id": job.id}));
    }

    async fn after_job(&self, job: &JobExecution) {
        self.record(
            "job.after",
            json!({"job": job.job_name(), "status": job.status.as_str()}),
        );
    }

    async fn before_step(&self, step: &StepExecution) {
        self.record("step.before", json!({"step": step.step_name}));
    }

    async fn after_step(&self, step: &StepExecution) -> Option<ExitStatus> {
        self.record(
            "step.after",
            json!({"step": step.step_name, "status": step.status.as_str()}),
        );
        self.after_step_status.clone()
    }

    async fn before_chunk(&self, step: &StepExecution) {
        self.record("chunk.before", json!({"step": step.step_name}));
    }

    async fn after_chunk(&self, step: &StepExecution) {
        self.record(
            "chunk.after",
            json!({"step": step.step_name, "commits": step.commit_count}),
        );
    }

    async fn after_chunk_error(&self, step: &StepExecution, error: &ItemError) {
        self.record("chunk.error", json!({"step": step.step_name, "kind": error.kind}));
    }

    async fn on_skip(&self, step: &StepExecution, phase: SkipPhase, error: &ItemError) {
        self.record(
            "item.skip",
            json!({"step": step.step_name, "phase": phase.as_str(), "kind": error.kind}),
        );
    }

    async fn on_retry(&self, step: &StepExecution, attempt: usize, error: &ItemError) {
        self.record(
            "item.retry",
            json!({"step": step.step_name, "attempt": attempt, "kind": error.kind}),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_composite_fans_out_in_order() {
        let first = Arc::new(CollectingListener::new());
        let second = Arc::new(CollectingListener::new());
        let composite = CompositeListener::new()
            .with(first.clone())
            .with(second.clone());

        let step = StepExecution::new(1, 1, "load");
        composite.before_step(&step).await;
        composite
            .on_skip(&step, SkipPhase::Process, &ItemError::new("parse", "bad"))
            .await;

        assert_eq!(first.event_names(), vec!["step.before", "item.skip"]);
        assert_eq!(second.event_names(), first.event_names());
        assert_eq!(first.events_of_type("item")[0].1["phase"], "process");
    }

    #[tokio::test]
    async fn test_after_step_statuses_combine() {
        let composite = CompositeListener::new()
            .with(Arc::new(CollectingListener::new()))
            .with(Arc::new(
                CollectingListener::new().with_after_step_status(ExitStatus::new("COMPLETED WITH SKIPS")),
            ))
            .with(Arc::new(CollectingListener::new().with_after_step_status(ExitStatus::failed())));

        let step = StepExecution::new(1, 1, "load");
        let status = composite.after_step(&step).await.unwrap();
        assert_eq!(status.code, "COMPLETED WITH SKIPS");

        assert!(CompositeListener::new().after_step(&step).await.is_none());
    }

    #[tokio::test]
    async fn test_logging_listener_does_not_panic() {
        let listener = LoggingListener::debug();
        let step = StepExecution::new(1, 1, "load");
        listener.before_step(&step).await;
        listener.after_chunk(&step).await;
        assert!(listener.after_step(&step).await.is_none());
    }
}
