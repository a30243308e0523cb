//! High-level ledger operations used by launchers, jobs and steps.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use super::store::LedgerStore;
use crate::core::{
    BatchStatus, ContextOwner, JobExecution, JobInstance, JobParameters, StepExecution,
};
use crate::errors::{BatchError, LedgerError};

/// Whether a job instance may be executed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartRules {
    /// A failed or stopped instance may be relaunched.
    pub restartable: bool,
    /// A COMPLETED instance may be relaunched from scratch.
    pub allow_restart_when_complete: bool,
}

impl Default for RestartRules {
    fn default() -> Self {
        Self {
            restartable: true,
            allow_restart_when_complete: false,
        }
    }
}

/// Repository facade over a [`LedgerStore`].
///
/// Adds the identity and restart rules on top of raw persistence and
/// hydrates job executions with their step executions.
#[derive(Clone)]
pub struct ExecutionLedger {
    store: Arc<dyn LedgerStore>,
}

impl std::fmt::Debug for ExecutionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLedger").finish_non_exhaustive()
    }
}

impl ExecutionLedger {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Creates the job execution for a launch.
    ///
    /// Finds or creates the job instance for `(job_name, parameters)`. A
    /// relaunch of an unfinished instance carries the last execution's job
    /// context forward; a permitted relaunch of a COMPLETED instance starts
    /// clean.
    pub async fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        rules: RestartRules,
    ) -> Result<JobExecution, BatchError> {
        let job_key = parameters.job_key();
        let instance = match self.store.find_job_instance(job_name, &job_key).await? {
            Some(instance) => {
                self.check_relaunch(&instance, rules).await?;
                instance
            }
            None => match self.store.create_job_instance(job_name, &job_key).await {
                Ok(instance) => instance,
                Err(LedgerError::DuplicateInstance { .. }) => {
                    let instance = self
                        .store
                        .find_job_instance(job_name, &job_key)
                        .await?
                        .ok_or_else(|| BatchError::Internal("job instance vanished".into()))?;
                    self.check_relaunch(&instance, rules).await?;
                    instance
                }
                Err(e) => return Err(e.into()),
            },
        };

        let previous = self.last_job_execution_of(instance.id).await?;
        let mut execution = match self.store.create_job_execution(instance.id, parameters).await {
            Ok(execution) => execution,
            Err(LedgerError::RunningExecutionExists { .. }) => {
                return Err(BatchError::JobExecutionAlreadyRunning {
                    job_name: job_name.to_string(),
                    instance_id: instance.id,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(previous) = previous {
            if previous.status != BatchStatus::Completed {
                execution.execution_context = previous.execution_context;
                self.update_job_execution_context(&execution).await?;
            }
        }

        info!(
            job = %job_name,
            instance_id = instance.id,
            execution_id = execution.id,
            "Created job execution"
        );
        Ok(execution)
    }

    async fn check_relaunch(
        &self,
        instance: &JobInstance,
        rules: RestartRules,
    ) -> Result<(), BatchError> {
        let executions = self.store.find_job_executions(instance.id).await?;
        if executions.iter().any(|e| e.status.is_running()) {
            return Err(BatchError::JobExecutionAlreadyRunning {
                job_name: instance.job_name.clone(),
                instance_id: instance.id,
            });
        }
        let Some(last) = executions.last() else {
            return Ok(());
        };
        match last.status {
            BatchStatus::Completed if rules.allow_restart_when_complete => Ok(()),
            BatchStatus::Completed | BatchStatus::Abandoned => {
                Err(BatchError::JobInstanceAlreadyComplete {
                    job_name: instance.job_name.clone(),
                    instance_id: instance.id,
                })
            }
            _ if !rules.restartable => Err(BatchError::JobRestart(format!(
                "job instance {} of '{}' already exists and is not restartable",
                instance.id, instance.job_name
            ))),
            _ => Ok(()),
        }
    }

    /// Writes a job execution, first folding in any status change another
    /// party recorded (such as a stop request).
    pub async fn update_job_execution(&self, execution: &mut JobExecution) -> Result<(), BatchError> {
        if let Some(stored) = self.store.get_job_execution(execution.id).await? {
            if stored.status == BatchStatus::Stopping && execution.status == BatchStatus::Started {
                execution.upgrade_status(BatchStatus::Stopping);
            }
        }
        execution.last_updated = Some(Utc::now());
        self.store.update_job_execution(execution).await?;
        Ok(())
    }

    /// Persists the job-level context.
    pub async fn update_job_execution_context(&self, execution: &JobExecution) -> Result<(), BatchError> {
        self.store
            .save_execution_context(ContextOwner::Job(execution.id), &execution.execution_context)
            .await?;
        Ok(())
    }

    /// Creates a step execution in STARTING status.
    pub async fn add_step_execution(
        &self,
        job_execution_id: u64,
        step_name: &str,
    ) -> Result<StepExecution, BatchError> {
        let execution = self
            .store
            .create_step_execution(job_execution_id, step_name)
            .await?;
        debug!(step = %step_name, step_execution_id = execution.id, "Created step execution");
        Ok(execution)
    }

    /// Writes a step execution's counts and status.
    ///
    /// Marks the step `terminate_only` when its job execution has been asked
    /// to stop.
    pub async fn update_step_execution(&self, step: &mut StepExecution) -> Result<(), BatchError> {
        step.last_updated = Some(Utc::now());
        self.store.update_step_execution(step).await?;
        if self.is_stop_requested(step.job_execution_id).await? {
            step.terminate_only = true;
        }
        Ok(())
    }

    /// Persists a step's execution context.
    pub async fn update_execution_context(&self, step: &mut StepExecution) -> Result<(), BatchError> {
        self.store
            .save_execution_context(ContextOwner::Step(step.id), &step.execution_context)
            .await?;
        step.execution_context.clear_dirty();
        Ok(())
    }

    /// Returns true if the job execution is STOPPING (or already STOPPED).
    pub async fn is_stop_requested(&self, job_execution_id: u64) -> Result<bool, BatchError> {
        Ok(self
            .store
            .get_job_execution(job_execution_id)
            .await?
            .is_some_and(|e| matches!(e.status, BatchStatus::Stopping | BatchStatus::Stopped)))
    }

    /// Marks a running job execution STOPPING.
    pub async fn request_stop(&self, job_execution_id: u64) -> Result<JobExecution, BatchError> {
        let mut execution = self
            .store
            .get_job_execution(job_execution_id)
            .await?
            .ok_or(BatchError::NoSuchJobExecution(job_execution_id))?;
        if !execution.status.is_running() {
            return Err(BatchError::UnexpectedJobState {
                execution_id: job_execution_id,
                expected: "running".into(),
            });
        }
        execution.status = BatchStatus::Stopping;
        execution.last_updated = Some(Utc::now());
        self.store.update_job_execution(&execution).await?;
        info!(execution_id = job_execution_id, "Stop requested");
        Ok(execution)
    }

    /// Marks a stopped or failed job execution ABANDONED so it is never
    /// restarted.
    pub async fn abandon(&self, job_execution_id: u64) -> Result<JobExecution, BatchError> {
        let mut execution = self
            .store
            .get_job_execution(job_execution_id)
            .await?
            .ok_or(BatchError::NoSuchJobExecution(job_execution_id))?;
        if execution.status.is_running() {
            return Err(BatchError::UnexpectedJobState {
                execution_id: job_execution_id,
                expected: "stopped or failed".into(),
            });
        }
        execution.upgrade_status(BatchStatus::Abandoned);
        execution.last_updated = Some(Utc::now());
        self.store.update_job_execution(&execution).await?;
        Ok(execution)
    }

    /// Returns a job execution with its context and step executions.
    pub async fn get_job_execution(&self, job_execution_id: u64) -> Result<Option<JobExecution>, BatchError> {
        let Some(mut execution) = self.store.get_job_execution(job_execution_id).await? else {
            return Ok(None);
        };
        execution.step_executions = self.store.find_step_executions(job_execution_id).await?;
        Ok(Some(execution))
    }

    /// Returns a step execution with its context.
    pub async fn get_step_execution(&self, step_execution_id: u64) -> Result<Option<StepExecution>, BatchError> {
        Ok(self.store.get_step_execution(step_execution_id).await?)
    }

    /// Returns the step executions of a job execution.
    pub async fn step_executions(&self, job_execution_id: u64) -> Result<Vec<StepExecution>, BatchError> {
        Ok(self.store.find_step_executions(job_execution_id).await?)
    }

    /// Returns all executions of an instance in creation order.
    pub async fn job_executions(&self, instance_id: u64) -> Result<Vec<JobExecution>, BatchError> {
        Ok(self.store.find_job_executions(instance_id).await?)
    }

    async fn last_job_execution_of(&self, instance_id: u64) -> Result<Option<JobExecution>, BatchError> {
        Ok(self.store.find_job_executions(instance_id).await?.pop())
    }

    /// Returns the last execution of the instance identified by name and
    /// parameters.
    pub async fn last_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobExecution>, BatchError> {
        match self
            .store
            .find_job_instance(job_name, &parameters.job_key())
            .await?
        {
            Some(instance) => self.last_job_execution_of(instance.id).await,
            None => Ok(None),
        }
    }

    /// Returns the execution of the instance created just before `current`.
    pub async fn previous_job_execution(
        &self,
        current: &JobExecution,
    ) -> Result<Option<JobExecution>, BatchError> {
        Ok(self
            .store
            .find_job_executions(current.job_instance.id)
            .await?
            .into_iter()
            .filter(|e| e.id < current.id)
            .last())
    }

    /// Returns true if an instance exists for the name and parameters.
    pub async fn job_instance_exists(&self, job_name: &str, parameters: &JobParameters) -> Result<bool, BatchError> {
        Ok(self
            .store
            .find_job_instance(job_name, &parameters.job_key())
            .await?
            .is_some())
    }

    /// Lists the instances of a job, newest first.
    pub async fn job_instances(&self, job_name: &str) -> Result<Vec<JobInstance>, BatchError> {
        Ok(self.store.find_job_instances(job_name).await?)
    }

    /// Returns the latest step execution with `step_name` across every
    /// execution of the instance, with its context loaded.
    pub async fn last_step_execution(
        &self,
        instance_id: u64,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        let mut latest: Option<StepExecution> = None;
        for job in self.store.find_job_executions(instance_id).await? {
            for step in self.store.find_step_executions(job.id).await? {
                if step.step_name == step_name && latest.as_ref().map_or(true, |l| step.id > l.id) {
                    latest = Some(step);
                }
            }
        }
        Ok(latest)
    }

    /// Counts the step executions with `step_name` across every execution of
    /// the instance.
    pub async fn step_execution_count(&self, instance_id: u64, step_name: &str) -> Result<usize, BatchError> {
        let mut count = 0;
        for job in self.store.find_job_executions(instance_id).await? {
            count += self
                .store
                .find_step_executions(job.id)
                .await?
                .iter()
                .filter(|s| s.step_name == step_name)
                .count();
        }
        Ok(count)
    }
}
