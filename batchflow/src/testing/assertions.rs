//! Test assertions for executions.

use crate::core::{BatchStatus, JobExecution, StepExecution};

/// Asserts the status of a step execution.
pub fn assert_step_status(step: &StepExecution, expected: BatchStatus) {
    assert_eq!(
        step.status, expected,
        "Expected step '{}' to be {expected}, got {} (exit {}: {})",
        step.step_name, step.status, step.exit_status.code, step.exit_status.description
    );
}

/// Asserts the status of a job execution.
pub fn assert_job_status(job: &JobExecution, expected: BatchStatus) {
    assert_eq!(
        job.status,
        expected,
        "Expected job '{}' to be {expected}, got {} (exit {}). Failures: {:?}",
        job.job_name(),
        job.status,
        job.exit_status.code,
        job.all_failures()
            .iter()
            .map(|f| format!("[{}] {}", f.kind, f.message))
            .collect::<Vec<_>>()
    );
}

/// Asserts read, write and skip totals of a step execution.
pub fn assert_counts(step: &StepExecution, read: u64, written: u64, skipped: u64) {
    assert_eq!(
        (step.read_count, step.write_count, step.skip_count()),
        (read, written, skipped),
        "Unexpected (read, written, skipped) for step '{}': {}",
        step.step_name,
        step.summary()
    );
}
