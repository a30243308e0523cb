//! Test fixtures for step and job testing.

use std::sync::Arc;

use crate::core::{JobExecution, JobParameters, StepExecution};
use crate::errors::BatchError;
use crate::ledger::{in_memory_ledger, ExecutionLedger, RestartRules};
use crate::step::StepContext;
use crate::stop::StopSignal;

/// Parameters identifying run number `run` of a job.
#[must_use]
pub fn job_parameters(run: i64) -> JobParameters {
    JobParameters::builder().long("run.id", run).build()
}

/// An in-memory ledger with a job execution ready to host steps.
#[derive(Debug, Clone)]
pub struct TestFixture {
    /// The ledger.
    pub ledger: ExecutionLedger,
    /// The job execution steps are attached to.
    pub job_execution: JobExecution,
    /// Stop signal shared by every step context of the fixture.
    pub stop: Arc<StopSignal>,
}

impl TestFixture {
    /// Creates a fixture for `job_name` with empty parameters.
    pub async fn new(job_name: &str) -> Result<Self, BatchError> {
        Self::with_parameters(job_name, JobParameters::new()).await
    }

    /// Creates a fixture for `job_name` launched with `parameters`.
    pub async fn with_parameters(job_name: &str, parameters: JobParameters) -> Result<Self, BatchError> {
        let ledger = in_memory_ledger();
        let job_execution = ledger
            .create_job_execution(job_name, &parameters, RestartRules::default())
            .await?;
        Ok(Self {
            ledger,
            job_execution,
            stop: Arc::new(StopSignal::new()),
        })
    }

    /// A step context over the fixture's ledger.
    #[must_use]
    pub fn step_context(&self) -> StepContext {
        StepContext::new(
            self.ledger.clone(),
            Arc::clone(&self.stop),
            self.job_execution.job_parameters.clone(),
        )
    }

    /// Adds a step execution to the fixture's job execution.
    pub async fn step_execution(&self, step_name: &str) -> Result<StepExecution, BatchError> {
        self.ledger
            .add_step_execution(self.job_execution.id, step_name)
            .await
    }
}
