//! The step contract and the lifecycle shared by every step kind.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use super::listener::BatchListener;
use crate::core::{BatchStatus, ExitStatus, FailureRecord, JobParameters, StepExecution};
use crate::errors::BatchError;
use crate::ledger::ExecutionLedger;
use crate::observability::{SpanTimer, StepSpanAttributes};
use crate::stop::StopSignal;

/// Everything a running step needs from its surroundings.
#[derive(Clone)]
pub struct StepContext {
    ledger: ExecutionLedger,
    stop: Arc<StopSignal>,
    job_parameters: JobParameters,
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("stop", &self.stop)
            .field("job_parameters", &self.job_parameters)
            .finish_non_exhaustive()
    }
}

impl StepContext {
    /// Creates a context.
    #[must_use]
    pub fn new(ledger: ExecutionLedger, stop: Arc<StopSignal>, job_parameters: JobParameters) -> Self {
        Self {
            ledger,
            stop,
            job_parameters,
        }
    }

    /// The execution ledger.
    #[must_use]
    pub fn ledger(&self) -> &ExecutionLedger {
        &self.ledger
    }

    /// The job's stop signal.
    #[must_use]
    pub fn stop_signal(&self) -> &Arc<StopSignal> {
        &self.stop
    }

    /// Parameters of the running job execution.
    #[must_use]
    pub fn job_parameters(&self) -> &JobParameters {
        &self.job_parameters
    }

    /// Same context with a different stop signal.
    #[must_use]
    pub fn with_stop_signal(&self, stop: Arc<StopSignal>) -> Self {
        Self {
            ledger: self.ledger.clone(),
            stop,
            job_parameters: self.job_parameters.clone(),
        }
    }

    /// Returns true if the step should stop at its next boundary: the local
    /// signal was raised, the step was flagged, or the ledger shows the job
    /// as stopping.
    pub async fn is_stop_requested(&self, step: &StepExecution) -> Result<bool, BatchError> {
        if self.stop.is_stop_requested() || step.terminate_only {
            return Ok(true);
        }
        self.ledger.is_stop_requested(step.job_execution_id).await
    }
}

/// A named unit of work in a job.
#[async_trait]
pub trait Step: Send + Sync {
    /// The step name, unique within its job.
    fn name(&self) -> &str;

    /// How many times the step may be started within one job instance.
    fn start_limit(&self) -> usize {
        usize::MAX
    }

    /// Whether a COMPLETED step runs again when its job instance restarts.
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    /// Listener notified of the step lifecycle.
    fn listener(&self) -> Option<&dyn BatchListener> {
        None
    }

    /// Does the step's work.
    ///
    /// Leaving the status STARTED means success; a step that honoured a stop
    /// request sets STOPPED itself.
    async fn do_execute(&self, execution: &mut StepExecution, context: &StepContext) -> Result<(), BatchError>;
}

/// Runs a step through its lifecycle: mark STARTED, run, resolve the final
/// status, notify listeners and persist.
///
/// Work failures are recorded on the execution and do not surface as `Err`;
/// only a failure to persist the final state does.
pub async fn execute_step(
    step: &dyn Step,
    execution: &mut StepExecution,
    context: &StepContext,
) -> Result<(), BatchError> {
    let timer = SpanTimer::start(step.name());
    execution.start_time = Some(Utc::now());
    execution.status = BatchStatus::Started;
    info!(
        step = %execution.step_name,
        step_execution_id = execution.id,
        job_execution_id = execution.job_execution_id,
        "Step started"
    );

    let outcome = match context.ledger().update_step_execution(execution).await {
        Ok(()) => {
            if let Some(listener) = step.listener() {
                listener.before_step(execution).await;
            }
            step.do_execute(execution, context).await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => {
            if execution.status == BatchStatus::Started {
                execution.status = BatchStatus::Completed;
                execution.exit_status = execution.exit_status.and(&ExitStatus::completed());
            }
        }
        Err(e) => {
            let status = if e.is_ledger() {
                BatchStatus::Unknown
            } else {
                BatchStatus::Failed
            };
            execution.status = status;
            execution.exit_status = execution
                .exit_status
                .and(&ExitStatus::from(status).add_exit_description(e.to_string()));
            execution.add_failure(FailureRecord::from(&e));
            error!(step = %execution.step_name, error = %e, status = %status, "Step failed");
        }
    }

    if let Some(listener) = step.listener() {
        if let Some(exit) = listener.after_step(execution).await {
            execution.exit_status = execution.exit_status.and(&exit);
        }
    }

    execution.end_time = Some(Utc::now());
    if let Err(e) = context.ledger().update_step_execution(execution).await {
        execution.status = BatchStatus::Unknown;
        execution.exit_status = ExitStatus::unknown().add_exit_description(e.to_string());
        execution.add_failure(FailureRecord::from(&e));
        error!(
            step = %execution.step_name,
            error = %e,
            "Could not persist final step state"
        );
        return Err(e);
    }

    let attributes = StepSpanAttributes::from_execution(execution).with_duration_ms(timer.finish());
    info!(
        attributes = ?attributes.to_attributes(),
        "Step finished: {}",
        execution.summary()
    );
    Ok(())
}
