//! Execution entities recorded in the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::context::ExecutionContext;
use super::parameters::JobParameters;
use super::status::{BatchStatus, ExitStatus};
use crate::errors::{BatchError, FailureKind, ItemError};

/// One logical run of a job, identified by job name and identifying parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    /// Ledger id.
    pub id: u64,
    /// The job name.
    pub job_name: String,
    /// Hash of the identifying parameters.
    pub job_key: String,
}

/// Owner of a persisted [`ExecutionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContextOwner {
    /// A job execution.
    Job(u64),
    /// A step execution.
    Step(u64),
}

impl fmt::Display for ContextOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(id) => write!(f, "job_execution:{id}"),
            Self::Step(id) => write!(f, "step_execution:{id}"),
        }
    }
}

/// A recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Dotted failure kind.
    pub kind: String,
    /// Failure message.
    pub message: String,
    /// When the failure was recorded.
    pub occurred_at: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl From<&BatchError> for FailureRecord {
    fn from(error: &BatchError) -> Self {
        Self::new(error.failure_kind(), error.to_string())
    }
}

impl From<&ItemError> for FailureRecord {
    fn from(error: &ItemError) -> Self {
        Self::new(error.kind.clone(), error.message.clone())
    }
}

/// One attempt to run a job instance.
///
/// Owns the step executions created during the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    /// Ledger id.
    pub id: u64,
    /// The job instance this attempt belongs to.
    pub job_instance: JobInstance,
    /// Parameters of this launch.
    pub job_parameters: JobParameters,
    /// Current status.
    pub status: BatchStatus,
    /// Exit status.
    pub exit_status: ExitStatus,
    /// When the execution was created.
    pub create_time: DateTime<Utc>,
    /// When execution started.
    pub start_time: Option<DateTime<Utc>>,
    /// When execution ended.
    pub end_time: Option<DateTime<Utc>>,
    /// Last ledger write.
    pub last_updated: Option<DateTime<Utc>>,
    /// Job-level restart state.
    pub execution_context: ExecutionContext,
    /// Failures raised outside of steps.
    pub failures: Vec<FailureRecord>,
    /// Step executions created during this attempt, in start order.
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    /// Creates a new execution in STARTING status.
    #[must_use]
    pub fn new(id: u64, job_instance: JobInstance, job_parameters: JobParameters) -> Self {
        Self {
            id,
            job_instance,
            job_parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            failures: Vec::new(),
            step_executions: Vec::new(),
        }
    }

    /// Returns the job name.
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.job_instance.job_name
    }

    /// Returns true while the execution may still make progress.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Upgrades the status, never moving backwards from a terminal status.
    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    /// Records a failure raised outside of a step.
    pub fn add_failure(&mut self, failure: FailureRecord) {
        self.failures.push(failure);
    }

    /// All failures: job-level ones followed by those of each step.
    #[must_use]
    pub fn all_failures(&self) -> Vec<FailureRecord> {
        let mut all = self.failures.clone();
        for step in &self.step_executions {
            all.extend(step.failures.iter().cloned());
        }
        all
    }

    /// Adds or replaces a step execution by id.
    pub fn upsert_step_execution(&mut self, step: StepExecution) {
        if let Some(existing) = self.step_executions.iter_mut().find(|s| s.id == step.id) {
            *existing = step;
        } else {
            self.step_executions.push(step);
        }
    }

    /// Returns the most recently added step execution with this name.
    #[must_use]
    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|s| s.step_name == step_name)
    }
}

/// Per-chunk counters buffered until the chunk resolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContribution {
    /// Items read.
    pub read_count: u64,
    /// Items written.
    pub write_count: u64,
    /// Items filtered by the processor.
    pub filter_count: u64,
    /// Read failures skipped.
    pub read_skip_count: u64,
    /// Process failures skipped.
    pub process_skip_count: u64,
    /// Write failures skipped.
    pub write_skip_count: u64,
}

impl StepContribution {
    /// Total skips in this contribution.
    #[must_use]
    pub const fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }
}

/// One attempt to run a step inside a job execution.
///
/// References its job execution by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// Ledger id.
    pub id: u64,
    /// Owning job execution id.
    pub job_execution_id: u64,
    /// Step name.
    pub step_name: String,
    /// Current status.
    pub status: BatchStatus,
    /// Exit status.
    pub exit_status: ExitStatus,
    /// Items read.
    pub read_count: u64,
    /// Items written.
    pub write_count: u64,
    /// Items filtered.
    pub filter_count: u64,
    /// Successful transaction commits.
    pub commit_count: u64,
    /// Transaction rollbacks.
    pub rollback_count: u64,
    /// Read failures skipped.
    pub read_skip_count: u64,
    /// Process failures skipped.
    pub process_skip_count: u64,
    /// Write failures skipped.
    pub write_skip_count: u64,
    /// When the step started.
    pub start_time: Option<DateTime<Utc>>,
    /// When the step ended.
    pub end_time: Option<DateTime<Utc>>,
    /// Last ledger write.
    pub last_updated: Option<DateTime<Utc>>,
    /// Restart state.
    pub execution_context: ExecutionContext,
    /// Failures recorded during the step.
    pub failures: Vec<FailureRecord>,
    /// Set when the job was asked to stop; observed at chunk boundaries.
    #[serde(default)]
    pub terminate_only: bool,
}

impl StepExecution {
    /// Creates a new step execution in STARTING status.
    #[must_use]
    pub fn new(id: u64, job_execution_id: u64, step_name: impl Into<String>) -> Self {
        Self {
            id,
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            commit_count: 0,
            rollback_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            failures: Vec::new(),
            terminate_only: false,
        }
    }

    /// Total skips across read, process and write.
    #[must_use]
    pub const fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Folds a resolved chunk's counters into the totals.
    pub fn apply_contribution(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.write_skip_count += contribution.write_skip_count;
    }

    /// Adds another execution's counters, used to roll partitions up.
    pub fn add_counts(&mut self, other: &Self) {
        self.read_count += other.read_count;
        self.write_count += other.write_count;
        self.filter_count += other.filter_count;
        self.commit_count += other.commit_count;
        self.rollback_count += other.rollback_count;
        self.read_skip_count += other.read_skip_count;
        self.process_skip_count += other.process_skip_count;
        self.write_skip_count += other.write_skip_count;
    }

    /// Records a failure.
    pub fn add_failure(&mut self, failure: FailureRecord) {
        self.failures.push(failure);
    }

    /// Summary line for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}: status={}, exit={}, read={}, written={}, filtered={}, commits={}, rollbacks={}, skips={}",
            self.step_name,
            self.status,
            self.exit_status.code,
            self.read_count,
            self.write_count,
            self.filter_count,
            self.commit_count,
            self.rollback_count,
            self.skip_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> JobInstance {
        JobInstance {
            id: 1,
            job_name: "import".into(),
            job_key: "k".into(),
        }
    }

    #[test]
    fn test_contribution_applies_on_resolve() {
        let mut step = StepExecution::new(1, 1, "load");
        let contribution = StepContribution {
            read_count: 3,
            write_count: 2,
            filter_count: 1,
            process_skip_count: 1,
            ..StepContribution::default()
        };
        step.apply_contribution(&contribution);
        step.apply_contribution(&contribution);
        assert_eq!(step.read_count, 6);
        assert_eq!(step.write_count, 4);
        assert_eq!(step.filter_count, 2);
        assert_eq!(step.skip_count(), 2);
        assert_eq!(step.commit_count, 0);
    }

    #[test]
    fn test_upsert_step_execution() {
        let mut job = JobExecution::new(1, instance(), JobParameters::new());
        let mut step = StepExecution::new(10, 1, "load");
        job.upsert_step_execution(step.clone());
        step.write_count = 5;
        job.upsert_step_execution(step);
        assert_eq!(job.step_executions.len(), 1);
        assert_eq!(job.step_execution("load").map(|s| s.write_count), Some(5));
    }

    #[test]
    fn test_all_failures_includes_steps() {
        let mut job = JobExecution::new(1, instance(), JobParameters::new());
        job.add_failure(FailureRecord::new("batch.flow", "no transition"));
        let mut step = StepExecution::new(10, 1, "load");
        step.add_failure(FailureRecord::from(&ItemError::new("db", "down")));
        job.upsert_step_execution(step);
        let kinds: Vec<_> = job.all_failures().into_iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec!["batch.flow".to_string(), "db".to_string()]);
    }
}
