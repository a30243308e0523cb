//! Flow states and the seam through which a flow runs its steps.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::definition::Flow;
use super::status::FlowExecutionStatus;
use crate::core::{JobExecution, StepExecution};
use crate::errors::BatchError;
use crate::partition::DistributionStrategy;
use crate::step::Step;

/// Picks a flow outcome from the job and the step that ran last.
pub trait JobExecutionDecider: Send + Sync {
    /// Returns the outcome used to select the next transition.
    fn decide(&self, job: &JobExecution, last_step: Option<&StepExecution>) -> FlowExecutionStatus;
}

impl<F> JobExecutionDecider for F
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> FlowExecutionStatus + Send + Sync,
{
    fn decide(&self, job: &JobExecution, last_step: Option<&StepExecution>) -> FlowExecutionStatus {
        self(job, last_step)
    }
}

/// Runs the steps of a flow on behalf of a job execution.
///
/// The job runner implements this; it owns restart rules, the ledger and the
/// stop signal.
#[async_trait]
pub trait FlowExecutor: Send + Sync {
    /// Runs `step` as part of `job` and returns its final execution.
    ///
    /// A step that is not rerun on restart returns its previous execution.
    async fn run_step(&self, step: &dyn Step, job: &mut JobExecution) -> Result<StepExecution, BatchError>;

    /// Reloads the job's step executions from the ledger.
    async fn refresh(&self, job: &mut JobExecution) -> Result<(), BatchError>;

    /// Persists the job-level execution context.
    async fn save_job_context(&self, job: &JobExecution) -> Result<(), BatchError>;

    /// Returns true if the job has been asked to stop.
    async fn is_stop_requested(&self, job: &JobExecution) -> Result<bool, BatchError>;
}

/// Terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndState {
    /// State name.
    pub name: String,
    /// Status the flow ends with.
    pub status: FlowExecutionStatus,
    /// Exit code folded into the job's exit status.
    pub exit_code: Option<String>,
    /// State to resume at when the job is restarted.
    pub restart: Option<String>,
}

impl EndState {
    /// Name of the default COMPLETED end state.
    pub const COMPLETED: &'static str = "end.completed";
    /// Name of the default FAILED end state.
    pub const FAILED: &'static str = "end.failed";
    /// Name of the default STOPPED end state.
    pub const STOPPED: &'static str = "end.stopped";

    /// Ends COMPLETED.
    #[must_use]
    pub fn completed() -> Self {
        Self::new(Self::COMPLETED, FlowExecutionStatus::completed())
    }

    /// Ends COMPLETED with a custom exit code.
    #[must_use]
    pub fn completed_with(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            exit_code: Some(code.clone()),
            ..Self::new(format!("{}.{code}", Self::COMPLETED), FlowExecutionStatus::completed())
        }
    }

    /// Ends FAILED.
    #[must_use]
    pub fn failed() -> Self {
        Self::new(Self::FAILED, FlowExecutionStatus::failed())
    }

    /// Ends STOPPED.
    #[must_use]
    pub fn stopped() -> Self {
        Self::new(Self::STOPPED, FlowExecutionStatus::stopped())
    }

    /// Ends STOPPED; a restart resumes at `target`.
    #[must_use]
    pub fn stopped_restarting_at(target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            restart: Some(target.clone()),
            ..Self::new(format!("{}.{target}", Self::STOPPED), FlowExecutionStatus::stopped())
        }
    }

    fn new(name: impl Into<String>, status: FlowExecutionStatus) -> Self {
        Self {
            name: name.into(),
            status,
            exit_code: None,
            restart: None,
        }
    }
}

/// A node of a flow.
#[derive(Clone)]
pub enum State {
    /// Runs a step; the outcome is the step's exit code.
    Step(Arc<dyn Step>),
    /// Runs a decider.
    Decision {
        /// State name.
        name: String,
        /// The decider.
        decider: Arc<dyn JobExecutionDecider>,
    },
    /// Runs sub-flows concurrently and aggregates their outcomes.
    Split {
        /// State name.
        name: String,
        /// The sub-flows.
        flows: Vec<Arc<Flow>>,
        /// Where the sub-flows run.
        strategy: Arc<dyn DistributionStrategy>,
    },
    /// Runs a nested flow; the outcome is the nested flow's status.
    Flow(Arc<Flow>),
    /// Ends the flow.
    End(EndState),
}

impl State {
    /// The state name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Step(step) => step.name(),
            Self::Decision { name, .. } | Self::Split { name, .. } => name,
            Self::Flow(flow) => flow.name(),
            Self::End(end) => &end.name,
        }
    }

    /// True for end states.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::End(_))
    }

    /// True if both states are the same definition.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Step(a), Self::Step(b)) => Arc::ptr_eq(a, b),
            (Self::Decision { name: a, decider: da }, Self::Decision { name: b, decider: db }) => {
                a == b && Arc::ptr_eq(da, db)
            }
            (Self::Split { name: a, .. }, Self::Split { name: b, .. }) => a == b,
            (Self::Flow(a), Self::Flow(b)) => Arc::ptr_eq(a, b),
            (Self::End(a), Self::End(b)) => a == b,
            _ => false,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::Decision { .. } => "decision",
            Self::Split { .. } => "split",
            Self::Flow(_) => "flow",
            Self::End(_) => "end",
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStep;

    #[test]
    fn test_end_state_names() {
        assert_eq!(EndState::completed().name, "end.completed");
        assert_eq!(EndState::completed_with("DONE").name, "end.completed.DONE");
        assert_eq!(EndState::completed_with("DONE").exit_code.as_deref(), Some("DONE"));
        let restart = EndState::stopped_restarting_at("load");
        assert_eq!(restart.name, "end.stopped.load");
        assert!(restart.status.is_stop());
        assert_eq!(restart.restart.as_deref(), Some("load"));
    }

    #[test]
    fn test_closure_decider() {
        let decider = |_: &JobExecution, last: Option<&StepExecution>| {
            FlowExecutionStatus::new(if last.is_some() { "SEEN" } else { "NONE" })
        };
        let job = JobExecution::new(
            1,
            crate::core::JobInstance {
                id: 1,
                job_name: "job".into(),
                job_key: String::new(),
            },
            crate::core::JobParameters::new(),
        );
        assert_eq!(decider.decide(&job, None).name(), "NONE");
    }

    #[test]
    fn test_same_as_compares_identity() {
        let step: Arc<dyn Step> = Arc::new(ScriptedStep::new("a"));
        let a = State::Step(Arc::clone(&step));
        let b = State::Step(step);
        let c = State::Step(Arc::new(ScriptedStep::new("a")));
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert_eq!(a.name(), "a");
    }
}
