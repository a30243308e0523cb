//! Launching jobs and tracking the executions that are running.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::definition::Job;
use super::runner::run_job;
use crate::core::{JobExecution, JobParameters};
use crate::errors::BatchError;
use crate::ledger::ExecutionLedger;
use crate::stop::StopSignal;

/// Handle to a job launched in the background.
#[derive(Debug)]
pub struct LaunchHandle {
    execution_id: u64,
    task: JoinHandle<Result<JobExecution, BatchError>>,
}

impl LaunchHandle {
    /// Id of the launched job execution.
    #[must_use]
    pub const fn execution_id(&self) -> u64 {
        self.execution_id
    }

    /// Waits for the execution to finish.
    pub async fn wait(self) -> Result<JobExecution, BatchError> {
        self.task
            .await
            .map_err(|e| BatchError::Internal(format!("job task for execution {} failed: {e}", self.execution_id)))?
    }
}

/// Creates job executions and runs them, keeping a stop signal per running
/// execution.
#[derive(Debug, Clone)]
pub struct JobLauncher {
    ledger: ExecutionLedger,
    running: Arc<DashMap<u64, Arc<StopSignal>>>,
}

impl JobLauncher {
    /// Creates a launcher over `ledger`.
    #[must_use]
    pub fn new(ledger: ExecutionLedger) -> Self {
        Self {
            ledger,
            running: Arc::new(DashMap::new()),
        }
    }

    /// The ledger executions are recorded in.
    #[must_use]
    pub fn ledger(&self) -> &ExecutionLedger {
        &self.ledger
    }

    async fn prepare(&self, job: &Job, parameters: &JobParameters) -> Result<(JobExecution, Arc<StopSignal>), BatchError> {
        job.validate_parameters(parameters)?;
        let execution = self
            .ledger
            .create_job_execution(job.name(), parameters, job.restart_rules())
            .await?;
        let stop = Arc::new(StopSignal::new());
        self.running.insert(execution.id, Arc::clone(&stop));
        Ok((execution, stop))
    }

    /// Runs `job` to completion and returns the finished execution.
    ///
    /// Launch refusals (invalid parameters, an instance that is running or
    /// complete) are returned as `Err` before anything runs.
    pub async fn run(&self, job: &Job, parameters: JobParameters) -> Result<JobExecution, BatchError> {
        let (mut execution, stop) = self.prepare(job, &parameters).await?;
        let result = run_job(job, &mut execution, &self.ledger, stop).await;
        self.running.remove(&execution.id);
        result.map(|()| execution)
    }

    /// Starts `job` on a tokio task and returns at once.
    pub async fn launch(&self, job: Arc<Job>, parameters: JobParameters) -> Result<LaunchHandle, BatchError> {
        let (mut execution, stop) = self.prepare(&job, &parameters).await?;
        let execution_id = execution.id;
        info!(job = %job.name(), execution_id, "Launching job in background");

        let ledger = self.ledger.clone();
        let running = Arc::clone(&self.running);
        let task = tokio::spawn(async move {
            let result = run_job(&job, &mut execution, &ledger, stop).await;
            running.remove(&execution_id);
            result.map(|()| execution)
        });
        Ok(LaunchHandle { execution_id, task })
    }

    /// Asks a running execution to stop at its next chunk boundary.
    pub async fn stop(&self, execution_id: u64) -> Result<JobExecution, BatchError> {
        let execution = self.ledger.request_stop(execution_id).await?;
        match self.running.get(&execution_id) {
            Some(signal) => signal.request_stop(format!("stop requested for execution {execution_id}")),
            None => warn!(execution_id, "Execution is not running in this launcher; stop recorded in the ledger only"),
        }
        Ok(execution)
    }

    /// Ids of the executions currently running in this launcher.
    #[must_use]
    pub fn running_executions(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.running.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Returns true if the execution is running in this launcher.
    #[must_use]
    pub fn is_running(&self, execution_id: u64) -> bool {
        self.running.contains_key(&execution_id)
    }
}
