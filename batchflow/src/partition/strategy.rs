//! Distribution strategies: where partitions and split flows run.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::core::{BatchStatus, ExitStatus};

/// A unit of work submitted to a strategy.
pub type WorkUnit = BoxFuture<'static, WorkOutcome>;

/// Terminal outcome of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOutcome {
    /// Partition or flow name.
    pub name: String,
    /// Final status.
    pub status: BatchStatus,
    /// Final exit status.
    pub exit_status: ExitStatus,
}

impl WorkOutcome {
    /// Creates an outcome.
    #[must_use]
    pub fn new(name: impl Into<String>, status: BatchStatus, exit_status: ExitStatus) -> Self {
        Self {
            name: name.into(),
            status,
            exit_status,
        }
    }

    fn failed(name: String, description: impl AsRef<str>) -> Self {
        Self {
            name,
            status: BatchStatus::Failed,
            exit_status: ExitStatus::failed().add_exit_description(description),
        }
    }
}

/// Handle to submitted work.
#[derive(Debug)]
pub enum WorkHandle {
    /// Already finished.
    Done(WorkOutcome),
    /// Running on a tokio task.
    Spawned {
        /// Unit name.
        name: String,
        /// The task.
        task: JoinHandle<WorkOutcome>,
    },
}

/// Runs units of work and collects their outcomes.
#[async_trait]
pub trait DistributionStrategy: Send + Sync {
    /// Submits a unit.
    async fn submit(&self, name: String, unit: WorkUnit) -> WorkHandle;

    /// Waits for every handle; outcomes come back in submission order.
    async fn await_all(&self, handles: Vec<WorkHandle>) -> Vec<WorkOutcome> {
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(match handle {
                WorkHandle::Done(outcome) => outcome,
                WorkHandle::Spawned { name, task } => match task.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(unit = %name, error = %e, "Work unit did not complete");
                        WorkOutcome::failed(name, e.to_string())
                    }
                },
            });
        }
        outcomes
    }
}

/// Runs every unit on its own tokio task, optionally bounded.
#[derive(Debug, Clone, Default)]
pub struct LocalTaskExecutor {
    limit: Option<Arc<Semaphore>>,
}

impl LocalTaskExecutor {
    /// Unbounded executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// At most `max_concurrency` units run at once.
    #[must_use]
    pub fn with_concurrency_limit(max_concurrency: usize) -> Self {
        Self {
            limit: Some(Arc::new(Semaphore::new(max_concurrency.max(1)))),
        }
    }
}

#[async_trait]
impl DistributionStrategy for LocalTaskExecutor {
    async fn submit(&self, name: String, unit: WorkUnit) -> WorkHandle {
        debug!(unit = %name, "Spawning work unit");
        let limit = self.limit.clone();
        let task_name = name.clone();
        let task = tokio::spawn(async move {
            let _permit = match limit {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(e) => return WorkOutcome::failed(task_name, e.to_string()),
                },
                None => None,
            };
            unit.await
        });
        WorkHandle::Spawned { name, task }
    }
}

/// Runs each unit to completion inside `submit`, one after another.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncTaskExecutor;

#[async_trait]
impl DistributionStrategy for SyncTaskExecutor {
    async fn submit(&self, name: String, unit: WorkUnit) -> WorkHandle {
        debug!(unit = %name, "Running work unit inline");
        WorkHandle::Done(unit.await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn unit(name: &str, status: BatchStatus) -> WorkUnit {
        let outcome = WorkOutcome::new(name, status, ExitStatus::from(status));
        async move { outcome }.boxed()
    }

    #[tokio::test]
    async fn test_outcomes_in_submission_order() {
        for strategy in [
            Arc::new(LocalTaskExecutor::new()) as Arc<dyn DistributionStrategy>,
            Arc::new(SyncTaskExecutor),
        ] {
            let mut handles = Vec::new();
            handles.push(strategy.submit("a".into(), unit("a", BatchStatus::Completed)).await);
            handles.push(strategy.submit("b".into(), unit("b", BatchStatus::Failed)).await);
            let outcomes = strategy.await_all(handles).await;
            let names: Vec<_> = outcomes.iter().map(|o| o.name.as_str()).collect();
            assert_eq!(names, vec!["a", "b"]);
            assert_eq!(outcomes[1].status, BatchStatus::Failed);
        }
    }

    fn explode() -> WorkOutcome {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicking_unit_is_failed() {
        let strategy = LocalTaskExecutor::new();
        let handle = strategy.submit("boom".into(), async { explode() }.boxed()).await;
        let outcomes = strategy.await_all(vec![handle]).await;
        assert_eq!(outcomes[0].status, BatchStatus::Failed);
        assert_eq!(outcomes[0].exit_status.code, ExitStatus::FAILED);
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let strategy = LocalTaskExecutor::with_concurrency_limit(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let name = format!("u{i}");
            let unit_name = name.clone();
            let work = async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                WorkOutcome::new(unit_name, BatchStatus::Completed, ExitStatus::completed())
            }
            .boxed();
            handles.push(strategy.submit(name, work).await);
        }
        let outcomes = strategy.await_all(handles).await;
        assert_eq!(outcomes.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
