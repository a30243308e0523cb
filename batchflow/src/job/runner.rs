//! The job lifecycle: run the flow and settle the job's final status.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

use super::definition::Job;
use super::executor::JobFlowExecutor;
use crate::core::{BatchStatus, ExitStatus, FailureRecord, JobExecution};
use crate::errors::BatchError;
use crate::flow::{FlowExecutionStatus, FlowExecutor};
use crate::ledger::ExecutionLedger;
use crate::observability::{JobSpanAttributes, SpanTimer};
use crate::step::BatchListener;
use crate::stop::StopSignal;

const NOOP_DESCRIPTION: &str = "All steps already completed or no steps configured for this job.";

/// Runs `job` for an already created execution.
///
/// Marks the execution STARTED, runs the flow and derives the final status
/// from the flow's end state. Failures inside the flow are recorded on the
/// execution; only a failure to persist the final state is returned as
/// `Err`.
pub async fn run_job(
    job: &Job,
    execution: &mut JobExecution,
    ledger: &ExecutionLedger,
    stop: Arc<StopSignal>,
) -> Result<(), BatchError> {
    let span = info_span!("job", job = %job.name(), execution_id = execution.id);
    run_job_inner(job, execution, ledger, stop).instrument(span).await
}

async fn run_job_inner(
    job: &Job,
    execution: &mut JobExecution,
    ledger: &ExecutionLedger,
    stop: Arc<StopSignal>,
) -> Result<(), BatchError> {
    let timer = SpanTimer::start(job.name());
    execution.start_time = Some(Utc::now());
    execution.status = BatchStatus::Started;
    execution.exit_status = ExitStatus::executing();
    info!(
        job = %job.name(),
        instance_id = execution.job_instance.id,
        execution_id = execution.id,
        parameters = %execution.job_parameters.job_key(),
        "Job started"
    );

    let outcome = match ledger.update_job_execution(execution).await {
        Ok(()) => {
            job.listeners().before_job(execution).await;
            if execution.status == BatchStatus::Stopping {
                info!(execution_id = execution.id, "Stop requested before the flow started");
                Ok(FlowExecutionStatus::stopped())
            } else {
                let executor: Arc<dyn FlowExecutor> = Arc::new(JobFlowExecutor::new(ledger.clone(), stop));
                job.flow().execute(&executor, execution).await
            }
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(status) => {
            execution.upgrade_status(status.batch_status());
            if execution.status == BatchStatus::Stopping {
                execution.status = BatchStatus::Stopped;
            }
            execution.exit_status = execution.exit_status.and(&ExitStatus::new(status.name()));
        }
        Err(e) => {
            let status = if e.is_ledger() {
                BatchStatus::Unknown
            } else {
                BatchStatus::Failed
            };
            execution.upgrade_status(status);
            execution.exit_status = execution
                .exit_status
                .and(&ExitStatus::from(status).add_exit_description(e.to_string()));
            execution.add_failure(FailureRecord::from(&e));
            error!(job = %job.name(), error = %e, status = %status, "Job failed");
        }
    }

    if execution.step_executions.is_empty()
        && matches!(execution.status, BatchStatus::Completed | BatchStatus::Stopped)
    {
        execution.exit_status = execution
            .exit_status
            .and(&ExitStatus::noop().add_exit_description(NOOP_DESCRIPTION));
    }

    execution.end_time = Some(Utc::now());
    job.listeners().after_job(execution).await;

    if let Err(e) = ledger.update_job_execution(execution).await {
        execution.status = BatchStatus::Unknown;
        execution.exit_status = ExitStatus::unknown().add_exit_description(e.to_string());
        execution.add_failure(FailureRecord::from(&e));
        error!(job = %job.name(), error = %e, "Could not persist final job state");
        return Err(e);
    }

    let attributes = JobSpanAttributes::from_execution(execution);
    info!(
        attributes = ?attributes.to_attributes(),
        duration_ms = timer.finish(),
        steps = execution.step_executions.len(),
        "Job finished with status {} ({})",
        execution.status,
        execution.exit_status.code
    );
    Ok(())
}
