//! Runs flow steps for a job execution, applying the restart rules.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::{BatchStatus, JobExecution, StepExecution};
use crate::errors::BatchError;
use crate::flow::FlowExecutor;
use crate::ledger::ExecutionLedger;
use crate::step::{execute_step, Step, StepContext};
use crate::stop::StopSignal;

/// [`FlowExecutor`] backed by the execution ledger.
///
/// A step whose last execution in the same job instance COMPLETED is not
/// run again unless it allows it; an unfinished one resumes from its saved
/// context. History before a COMPLETED job execution is ignored, so a
/// permitted rerun of a complete instance starts from scratch.
#[derive(Debug, Clone)]
pub struct JobFlowExecutor {
    ledger: ExecutionLedger,
    stop: Arc<StopSignal>,
}

impl JobFlowExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(ledger: ExecutionLedger, stop: Arc<StopSignal>) -> Self {
        Self { ledger, stop }
    }

    async fn is_fresh_run(&self, job: &JobExecution) -> Result<bool, BatchError> {
        Ok(self
            .ledger
            .previous_job_execution(job)
            .await?
            .map_or(true, |previous| previous.status == BatchStatus::Completed))
    }

    /// Decides whether `step` runs, and from which saved execution it
    /// resumes.
    async fn check_start(
        &self,
        step: &dyn Step,
        job: &JobExecution,
    ) -> Result<StartDecision, BatchError> {
        if self.is_fresh_run(job).await? {
            return Ok(StartDecision::Start(None));
        }

        let instance_id = job.job_instance.id;
        let last = self
            .ledger
            .last_step_execution(instance_id, step.name())
            .await?
            .filter(|last| last.job_execution_id != job.id);
        let Some(last) = last else {
            return Ok(StartDecision::Start(None));
        };

        match last.status {
            BatchStatus::Unknown => {
                return Err(BatchError::JobRestart(format!(
                    "step '{}' ended in UNKNOWN status and cannot be restarted safely",
                    step.name()
                )))
            }
            BatchStatus::Completed if !step.allow_start_if_complete() => return Ok(StartDecision::Skip(last)),
            BatchStatus::Abandoned => return Ok(StartDecision::Skip(last)),
            _ => {}
        }

        let starts = self.ledger.step_execution_count(instance_id, step.name()).await?;
        if starts >= step.start_limit() {
            return Err(BatchError::StartLimitExceeded {
                step_name: step.name().to_string(),
                limit: step.start_limit(),
            });
        }

        if last.status == BatchStatus::Completed {
            Ok(StartDecision::Start(None))
        } else {
            Ok(StartDecision::Start(Some(last)))
        }
    }
}

enum StartDecision {
    Skip(StepExecution),
    Start(Option<StepExecution>),
}

#[async_trait]
impl FlowExecutor for JobFlowExecutor {
    async fn run_step(&self, step: &dyn Step, job: &mut JobExecution) -> Result<StepExecution, BatchError> {
        let resume_from = match self.check_start(step, job).await? {
            StartDecision::Skip(last) => {
                info!(step = %step.name(), status = %last.status, "Step already complete, not started again");
                return Ok(last);
            }
            StartDecision::Start(resume_from) => resume_from,
        };

        let mut execution = self.ledger.add_step_execution(job.id, step.name()).await?;
        if let Some(previous) = resume_from {
            debug!(
                step = %step.name(),
                previous_id = previous.id,
                "Resuming step from previous execution context"
            );
            execution.execution_context = previous.execution_context;
            self.ledger.update_execution_context(&mut execution).await?;
        }

        let context = StepContext::new(self.ledger.clone(), Arc::clone(&self.stop), job.job_parameters.clone());
        let result = execute_step(step, &mut execution, &context).await;
        job.upsert_step_execution(execution.clone());
        result?;

        self.ledger.update_job_execution_context(job).await?;
        Ok(execution)
    }

    async fn refresh(&self, job: &mut JobExecution) -> Result<(), BatchError> {
        job.step_executions = self.ledger.step_executions(job.id).await?;
        Ok(())
    }

    async fn save_job_context(&self, job: &JobExecution) -> Result<(), BatchError> {
        self.ledger.update_job_execution_context(job).await
    }

    async fn is_stop_requested(&self, job: &JobExecution) -> Result<bool, BatchError> {
        if self.stop.is_stop_requested() {
            return Ok(true);
        }
        self.ledger.is_stop_requested(job.id).await
    }
}
