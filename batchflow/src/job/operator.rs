//! Operations on jobs by name and on executions by id.

use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use super::launcher::{JobLauncher, LaunchHandle};
use super::registry::JobRegistry;
use crate::core::{BatchStatus, JobExecution, JobParameters};
use crate::errors::{BatchError, ConfigValidationError};
use crate::ledger::ExecutionLedger;

/// Start, restart, stop and inspect jobs.
///
/// Executions launched through the operator run in the background; callers
/// poll [`JobOperator::status`] or [`JobOperator::wait`] for the outcome.
#[derive(Debug, Clone)]
pub struct JobOperator {
    registry: JobRegistry,
    launcher: JobLauncher,
}

impl JobOperator {
    /// Creates an operator.
    #[must_use]
    pub fn new(registry: JobRegistry, launcher: JobLauncher) -> Self {
        Self { registry, launcher }
    }

    /// The job registry.
    #[must_use]
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    fn ledger(&self) -> &ExecutionLedger {
        self.launcher.ledger()
    }

    /// Launches the registered job `job_name`.
    pub async fn start(&self, job_name: &str, parameters: JobParameters) -> Result<LaunchHandle, BatchError> {
        let job = self.registry.get(job_name)?;
        self.launcher.launch(job, parameters).await
    }

    /// Relaunches the job instance of a finished execution with the same
    /// parameters.
    pub async fn restart(&self, execution_id: u64) -> Result<LaunchHandle, BatchError> {
        let execution = self.status(execution_id).await?;
        if execution.is_running() {
            return Err(BatchError::UnexpectedJobState {
                execution_id,
                expected: "finished".into(),
            });
        }
        info!(
            job = %execution.job_name(),
            execution_id,
            status = %execution.status,
            "Restarting job instance"
        );
        let job = self.registry.get(execution.job_name())?;
        self.launcher.launch(job, execution.job_parameters).await
    }

    /// Launches a new instance with parameters from the job's incrementer.
    pub async fn start_next_instance(&self, job_name: &str) -> Result<LaunchHandle, BatchError> {
        let job = self.registry.get(job_name)?;
        let Some(incrementer) = job.incrementer() else {
            return Err(ConfigValidationError::with_code(
                "CONFIG-012-NO_INCREMENTER",
                format!("job '{job_name}' has no parameters incrementer"),
            )
            .into());
        };

        let previous = match self.ledger().job_instances(job_name).await?.first() {
            Some(instance) => self
                .ledger()
                .job_executions(instance.id)
                .await?
                .pop()
                .map(|execution| execution.job_parameters),
            None => None,
        };
        let parameters = incrementer.next(previous.as_ref());
        self.launcher.launch(job, parameters).await
    }

    /// Requests a stop of a running execution.
    pub async fn stop(&self, execution_id: u64) -> Result<JobExecution, BatchError> {
        self.launcher.stop(execution_id).await
    }

    /// Marks a finished, unsuccessful execution ABANDONED.
    pub async fn abandon(&self, execution_id: u64) -> Result<JobExecution, BatchError> {
        self.ledger().abandon(execution_id).await
    }

    /// Current state of an execution.
    pub async fn status(&self, execution_id: u64) -> Result<JobExecution, BatchError> {
        self.ledger()
            .get_job_execution(execution_id)
            .await?
            .ok_or(BatchError::NoSuchJobExecution(execution_id))
    }

    /// Polls until the execution is no longer running.
    pub async fn wait(&self, execution_id: u64, poll_interval: Duration) -> Result<JobExecution, BatchError> {
        loop {
            let execution = self.status(execution_id).await?;
            if !execution.is_running() {
                return Ok(execution);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Every execution of every instance of `job_name`, newest instance
    /// first.
    pub async fn executions(&self, job_name: &str) -> Result<Vec<JobExecution>, BatchError> {
        let mut executions = Vec::new();
        for instance in self.ledger().job_instances(job_name).await? {
            executions.extend(self.ledger().job_executions(instance.id).await?);
        }
        Ok(executions)
    }

    /// Ids of running executions of `job_name`.
    pub async fn running_executions(&self, job_name: &str) -> Result<Vec<u64>, BatchError> {
        Ok(self
            .executions(job_name)
            .await?
            .into_iter()
            .filter(JobExecution::is_running)
            .map(|execution| execution.id)
            .collect())
    }

    /// Step name to status for an execution, for display.
    pub async fn step_summaries(&self, execution_id: u64) -> Result<HashMap<String, BatchStatus>, BatchError> {
        Ok(self
            .status(execution_id)
            .await?
            .step_executions
            .into_iter()
            .map(|step| (step.step_name, step.status))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunIdIncrementer;
    use crate::job::Job;
    use crate::ledger::in_memory_ledger;
    use crate::testing::{job_parameters, ScriptedStep};
    use std::sync::Arc;

    fn operator() -> JobOperator {
        JobOperator::new(JobRegistry::new(), JobLauncher::new(in_memory_ledger()))
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let operator = operator();
        operator
            .registry()
            .register(Arc::new(Job::builder("job").step(Arc::new(ScriptedStep::new("s"))).build().unwrap()))
            .unwrap();

        let handle = operator.start("job", job_parameters(1)).await.unwrap();
        let execution = operator
            .wait(handle.execution_id(), Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(
            operator.step_summaries(execution.id).await.unwrap().get("s"),
            Some(&BatchStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let err = operator().start("missing", JobParameters::new()).await.unwrap_err();
        assert!(matches!(err, BatchError::NoSuchJob(_)));
    }

    #[tokio::test]
    async fn test_restart_failed_execution() {
        let operator = operator();
        operator
            .registry()
            .register(Arc::new(
                Job::builder("job")
                    .step(Arc::new(ScriptedStep::new("s").failing_times(1)))
                    .build()
                    .unwrap(),
            ))
            .unwrap();

        let first = operator.start("job", job_parameters(1)).await.unwrap().wait().await.unwrap();
        assert_eq!(first.status, BatchStatus::Failed);

        let second = operator.restart(first.id).await.unwrap().wait().await.unwrap();
        assert_eq!(second.status, BatchStatus::Completed);
        assert_eq!(second.job_instance.id, first.job_instance.id);
        assert_eq!(operator.executions("job").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_start_next_instance_increments_run_id() {
        let operator = operator();
        operator
            .registry()
            .register(Arc::new(
                Job::builder("job")
                    .step(Arc::new(ScriptedStep::new("s")))
                    .incrementer(Arc::new(RunIdIncrementer::new()))
                    .build()
                    .unwrap(),
            ))
            .unwrap();

        let first = operator.start_next_instance("job").await.unwrap().wait().await.unwrap();
        let second = operator.start_next_instance("job").await.unwrap().wait().await.unwrap();
        assert_eq!(first.job_parameters.get_long("run.id"), Some(1));
        assert_eq!(second.job_parameters.get_long("run.id"), Some(2));
        assert_ne!(first.job_instance.id, second.job_instance.id);
    }

    #[tokio::test]
    async fn test_abandon_blocks_restart() {
        let operator = operator();
        operator
            .registry()
            .register(Arc::new(
                Job::builder("job")
                    .step(Arc::new(ScriptedStep::new("s").failing_times(1)))
                    .build()
                    .unwrap(),
            ))
            .unwrap();

        let first = operator.start("job", job_parameters(1)).await.unwrap().wait().await.unwrap();
        let abandoned = operator.abandon(first.id).await.unwrap();
        assert_eq!(abandoned.status, BatchStatus::Abandoned);
        tokio_test::assert_err!(operator.restart(first.id).await);
    }
}
