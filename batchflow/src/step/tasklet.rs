//! Tasklet step: repeat a single callback, one transaction per call, until it
//! reports FINISHED.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use super::lifecycle::{Step, StepContext};
use super::listener::{BatchListener, CompositeListener};
use super::transaction::{ResourcelessTransactionManager, TransactionManager};
use crate::core::{BatchStatus, ExecutionContext, ExitStatus, StepContribution, StepExecution};
use crate::errors::{BatchError, ItemError};
use crate::repeat::{RepeatCallback, RepeatContext, RepeatStatus, RepeatTemplate};

/// One unit of work called repeatedly by a [`TaskletStep`].
#[async_trait]
pub trait Tasklet: Send + Sync {
    /// Does one slice of work; CONTINUABLE asks to be called again.
    async fn execute(
        &self,
        contribution: &mut StepContribution,
        context: &mut ExecutionContext,
    ) -> Result<RepeatStatus, ItemError>;
}

/// Tasklet that runs an async closure once.
pub struct CallableTasklet<F> {
    callable: F,
}

impl<F> CallableTasklet<F> {
    /// Wraps a closure.
    pub const fn new(callable: F) -> Self {
        Self { callable }
    }
}

impl<F> fmt::Debug for CallableTasklet<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableTasklet").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Tasklet for CallableTasklet<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ItemError>> + Send,
{
    async fn execute(
        &self,
        _contribution: &mut StepContribution,
        _context: &mut ExecutionContext,
    ) -> Result<RepeatStatus, ItemError> {
        (self.callable)().await?;
        Ok(RepeatStatus::Finished)
    }
}

/// A step that drives a [`Tasklet`].
pub struct TaskletStep {
    name: String,
    tasklet: Arc<dyn Tasklet>,
    transaction_manager: Arc<dyn TransactionManager>,
    listeners: CompositeListener,
    start_limit: usize,
    allow_start_if_complete: bool,
}

impl fmt::Debug for TaskletStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskletStep")
            .field("name", &self.name)
            .field("start_limit", &self.start_limit)
            .field("allow_start_if_complete", &self.allow_start_if_complete)
            .finish_non_exhaustive()
    }
}

impl TaskletStep {
    /// Starts a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>, tasklet: impl Tasklet + 'static) -> TaskletStepBuilder {
        TaskletStepBuilder {
            name: name.into(),
            tasklet: Arc::new(tasklet),
            transaction_manager: None,
            listeners: CompositeListener::new(),
            start_limit: usize::MAX,
            allow_start_if_complete: false,
        }
    }
}

struct TaskletIteration<'a> {
    step: &'a TaskletStep,
    execution: &'a mut StepExecution,
    context: &'a StepContext,
}

#[async_trait]
impl RepeatCallback<BatchError> for TaskletIteration<'_> {
    async fn do_in_iteration(&mut self, _repeat: &mut RepeatContext) -> Result<RepeatStatus, BatchError> {
        if self.context.is_stop_requested(self.execution).await? {
            self.execution.status = BatchStatus::Stopped;
            self.execution.exit_status = self.execution.exit_status.and(&ExitStatus::stopped());
            info!(step = %self.execution.step_name, "Stop requested, tasklet not called again");
            return Ok(RepeatStatus::Finished);
        }

        let manager = &self.step.transaction_manager;
        let transaction = manager.begin().await?;
        let mut contribution = StepContribution::default();
        let outcome = self
            .step
            .tasklet
            .execute(&mut contribution, &mut self.execution.execution_context)
            .await;

        let status = match outcome {
            Ok(status) => status,
            Err(e) => {
                manager.rollback(transaction).await?;
                self.execution.rollback_count += 1;
                return Err(e.into());
            }
        };
        manager.commit(transaction).await?;
        self.execution.apply_contribution(&contribution);
        self.execution.commit_count += 1;
        debug!(step = %self.execution.step_name, status = ?status, "Tasklet iteration committed");

        let ledger = self.context.ledger();
        ledger.update_execution_context(self.execution).await?;
        ledger.update_step_execution(self.execution).await?;
        Ok(status)
    }
}

#[async_trait]
impl Step for TaskletStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_limit(&self) -> usize {
        self.start_limit
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn listener(&self) -> Option<&dyn BatchListener> {
        Some(&self.listeners)
    }

    async fn do_execute(&self, execution: &mut StepExecution, context: &StepContext) -> Result<(), BatchError> {
        let mut iteration = TaskletIteration {
            step: self,
            execution,
            context,
        };
        RepeatTemplate::<BatchError>::new().iterate(&mut iteration).await?;
        Ok(())
    }
}

/// Builder for [`TaskletStep`].
pub struct TaskletStepBuilder {
    name: String,
    tasklet: Arc<dyn Tasklet>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    listeners: CompositeListener,
    start_limit: usize,
    allow_start_if_complete: bool,
}

impl fmt::Debug for TaskletStepBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskletStepBuilder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl TaskletStepBuilder {
    /// Sets the transaction manager.
    #[must_use]
    pub fn transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transaction_manager = Some(manager);
        self
    }

    /// Registers a listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn BatchListener>) -> Self {
        self.listeners.register(listener);
        self
    }

    /// Starts allowed per job instance.
    #[must_use]
    pub const fn start_limit(mut self, limit: usize) -> Self {
        self.start_limit = limit;
        self
    }

    /// Reruns the step on restart even when complete.
    #[must_use]
    pub const fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    /// Builds the step.
    #[must_use]
    pub fn build(self) -> TaskletStep {
        TaskletStep {
            name: self.name,
            tasklet: self.tasklet,
            transaction_manager: self
                .transaction_manager
                .unwrap_or_else(|| Arc::new(ResourcelessTransactionManager::new())),
            listeners: self.listeners,
            start_limit: self.start_limit,
            allow_start_if_complete: self.allow_start_if_complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobParameters;
    use crate::ledger::{in_memory_ledger, RestartRules};
    use crate::step::execute_step;
    use crate::stop::StopSignal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Countdown {
        calls: AtomicUsize,
        until: usize,
    }

    #[async_trait]
    impl Tasklet for Countdown {
        async fn execute(
            &self,
            contribution: &mut StepContribution,
            context: &mut ExecutionContext,
        ) -> Result<RepeatStatus, ItemError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            contribution.read_count += 1;
            context.put("calls", call as u64);
            Ok(RepeatStatus::continue_if(call < self.until))
        }
    }

    async fn setup() -> (StepContext, StepExecution) {
        let ledger = in_memory_ledger();
        let job = ledger
            .create_job_execution("job", &JobParameters::new(), RestartRules::default())
            .await
            .unwrap();
        let step = ledger.add_step_execution(job.id, "tasklet").await.unwrap();
        (
            StepContext::new(ledger, Arc::new(StopSignal::new()), JobParameters::new()),
            step,
        )
    }

    #[tokio::test]
    async fn test_repeats_until_finished() {
        let (ctx, mut execution) = setup().await;
        let step = TaskletStep::builder(
            "tasklet",
            Countdown {
                calls: AtomicUsize::new(0),
                until: 3,
            },
        )
        .build();

        execute_step(&step, &mut execution, &ctx).await.unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.commit_count, 3);
        assert_eq!(execution.read_count, 3);

        let stored = ctx.ledger().get_step_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.execution_context.get_u64("calls"), Some(3));
    }

    #[tokio::test]
    async fn test_failure_rolls_back() {
        let (ctx, mut execution) = setup().await;
        let manager = Arc::new(ResourcelessTransactionManager::new());
        let step = TaskletStep::builder(
            "tasklet",
            CallableTasklet::new(|| async { Err::<(), _>(ItemError::new("io.disk", "full")) }),
        )
        .transaction_manager(manager.clone())
        .build();

        execute_step(&step, &mut execution, &ctx).await.unwrap();
        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(execution.rollback_count, 1);
        assert_eq!(manager.rollback_count(), 1);
        assert_eq!(manager.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_before_first_call() {
        let (ctx, mut execution) = setup().await;
        ctx.stop_signal().request_stop("operator");
        let step = TaskletStep::builder("tasklet", CallableTasklet::new(|| async { Ok::<(), ItemError>(()) })).build();

        execute_step(&step, &mut execution, &ctx).await.unwrap();
        assert_eq!(execution.status, BatchStatus::Stopped);
        assert_eq!(execution.commit_count, 0);
    }
}
