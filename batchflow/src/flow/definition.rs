//! A validated flow and the state machine that runs it.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::state::{EndState, FlowExecutor, State};
use super::status::FlowExecutionStatus;
use super::transition::Transition;
use crate::core::{BatchStatus, ExitStatus, JobExecution, StepExecution};
use crate::errors::{BatchError, FlowValidationError};
use crate::partition::{DistributionStrategy, WorkOutcome};

/// Prefix of the job-context key holding the state a stopped flow resumes at.
pub const RESTART_STATE_KEY_PREFIX: &str = "batch.restart_state";

/// A graph of states joined by exit-code transitions.
///
/// Built and validated by [`super::FlowBuilder`].
pub struct Flow {
    name: String,
    start: String,
    states: HashMap<String, State>,
    order: Vec<String>,
    transitions: HashMap<String, Vec<Transition>>,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("states", &self.order)
            .finish_non_exhaustive()
    }
}

impl Flow {
    pub(super) fn new(
        name: String,
        start: String,
        states: HashMap<String, State>,
        order: Vec<String>,
        transitions: HashMap<String, Vec<Transition>>,
    ) -> Self {
        Self {
            name,
            start,
            states,
            order,
            transitions,
        }
    }

    /// The flow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the first state.
    #[must_use]
    pub fn start_state(&self) -> &str {
        &self.start
    }

    /// State names in the order they were added.
    #[must_use]
    pub fn state_names(&self) -> &[String] {
        &self.order
    }

    /// Returns a state by name.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    /// Outgoing transitions of a state, most specific first.
    #[must_use]
    pub fn transitions_from(&self, name: &str) -> &[Transition] {
        self.transitions.get(name).map_or(&[], Vec::as_slice)
    }

    /// Names of every step reachable in this flow and its nested flows.
    #[must_use]
    pub fn step_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for name in &self.order {
            match self.states.get(name) {
                Some(State::Step(step)) => names.push(step.name().to_string()),
                Some(State::Flow(flow)) => names.extend(flow.step_names()),
                Some(State::Split { flows, .. }) => {
                    for flow in flows {
                        names.extend(flow.step_names());
                    }
                }
                _ => {}
            }
        }
        names
    }

    /// Resolves the next state for `status` leaving `from`.
    pub fn next_state(&self, from: &str, status: &FlowExecutionStatus) -> Result<&str, BatchError> {
        self.transitions_from(from)
            .iter()
            .find(|t| t.pattern.matches(status.name()))
            .map(|t| t.to.as_str())
            .ok_or_else(|| {
                FlowValidationError::new(format!(
                    "No transition from state '{from}' in flow '{}' matches exit code '{status}'",
                    self.name
                ))
                .with_states(vec![from.to_string()])
                .into()
            })
    }

    fn restart_key(&self) -> String {
        format!("{RESTART_STATE_KEY_PREFIX}.{}", self.name)
    }

    /// Runs the flow until an end state, returning that state's status.
    ///
    /// A stop request, or a state that yields STOPPED, ends the flow early
    /// with STOPPED.
    pub fn execute<'a>(
        &'a self,
        executor: &'a Arc<dyn FlowExecutor>,
        job: &'a mut JobExecution,
    ) -> BoxFuture<'a, Result<FlowExecutionStatus, BatchError>> {
        self.run(executor, job).boxed()
    }

    async fn run(&self, executor: &Arc<dyn FlowExecutor>, job: &mut JobExecution) -> Result<FlowExecutionStatus, BatchError> {
        let mut current = self.resume_point(executor, job).await?;
        let mut last_step: Option<StepExecution> = None;
        info!(flow = %self.name, start = %current, "Flow started");

        loop {
            let state = self.states.get(&current).ok_or_else(|| {
                BatchError::from(
                    FlowValidationError::new(format!("Unknown state '{current}' in flow '{}'", self.name))
                        .with_states(vec![current.clone()]),
                )
            })?;

            if !state.is_end() && executor.is_stop_requested(job).await? {
                info!(flow = %self.name, state = %current, "Stop requested, flow stopping");
                return Ok(FlowExecutionStatus::stopped());
            }

            let status = match state {
                State::End(end) => return self.finish(end, executor, job).await,
                State::Step(step) => {
                    let execution = executor.run_step(step.as_ref(), job).await?;
                    let stopped = matches!(execution.status, BatchStatus::Stopping | BatchStatus::Stopped);
                    let status = FlowExecutionStatus::new(execution.exit_status.code.clone());
                    last_step = Some(execution);
                    if stopped {
                        return Ok(FlowExecutionStatus::stopped());
                    }
                    status
                }
                State::Decision { decider, .. } => decider.decide(job, last_step.as_ref()),
                State::Split { name, flows, strategy } => {
                    let status = run_split(name, flows, strategy.as_ref(), executor, job).await?;
                    last_step = job.step_executions.last().cloned();
                    status
                }
                State::Flow(flow) => {
                    let status = flow.execute(executor, job).await?;
                    last_step = job.step_executions.last().cloned();
                    status
                }
            };

            debug!(flow = %self.name, state = %current, status = %status, "State finished");
            if status.name() == FlowExecutionStatus::STOPPED {
                return Ok(status);
            }
            current = self.next_state(&current, &status)?.to_string();
        }
    }

    async fn resume_point(&self, executor: &Arc<dyn FlowExecutor>, job: &mut JobExecution) -> Result<String, BatchError> {
        let key = self.restart_key();
        let Some(target) = job.execution_context.get_str(&key).map(str::to_string) else {
            return Ok(self.start.clone());
        };
        job.execution_context.remove(&key);
        executor.save_job_context(job).await?;
        if self.states.contains_key(&target) {
            info!(flow = %self.name, state = %target, "Resuming flow at restart state");
            Ok(target)
        } else {
            warn!(flow = %self.name, state = %target, "Restart state no longer exists, starting over");
            Ok(self.start.clone())
        }
    }

    async fn finish(
        &self,
        end: &EndState,
        executor: &Arc<dyn FlowExecutor>,
        job: &mut JobExecution,
    ) -> Result<FlowExecutionStatus, BatchError> {
        if let Some(code) = &end.exit_code {
            job.exit_status = job.exit_status.and(&ExitStatus::new(code.clone()));
        }
        if let Some(target) = &end.restart {
            job.execution_context.put(self.restart_key(), target.clone());
            executor.save_job_context(job).await?;
        }
        info!(flow = %self.name, end = %end.name, status = %end.status, "Flow ended");
        Ok(end.status.clone())
    }
}

async fn run_split(
    name: &str,
    flows: &[Arc<Flow>],
    strategy: &dyn DistributionStrategy,
    executor: &Arc<dyn FlowExecutor>,
    job: &mut JobExecution,
) -> Result<FlowExecutionStatus, BatchError> {
    info!(split = %name, flows = flows.len(), "Split started");
    let mut handles = Vec::with_capacity(flows.len());
    for flow in flows {
        let flow = Arc::clone(flow);
        let unit_name = flow.name().to_string();
        let executor = Arc::clone(executor);
        let mut branch = job.clone();
        let unit = async move {
            match flow.execute(&executor, &mut branch).await {
                Ok(status) => {
                    WorkOutcome::new(flow.name(), status.batch_status(), ExitStatus::new(status.name()))
                }
                Err(e) => {
                    warn!(flow = %flow.name(), error = %e, "Split branch failed");
                    WorkOutcome::new(
                        flow.name(),
                        BatchStatus::Failed,
                        ExitStatus::failed().add_exit_description(e.to_string()),
                    )
                }
            }
        }
        .boxed();
        handles.push(strategy.submit(unit_name, unit).await);
    }

    let outcomes = strategy.await_all(handles).await;
    executor.refresh(job).await?;
    let status = BatchStatus::aggregate(outcomes.iter().map(|o| o.status));
    info!(split = %name, status = %status, "Split finished");
    Ok(FlowExecutionStatus::from(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowBuilder;
    use crate::job::JobFlowExecutor;
    use crate::partition::{LocalTaskExecutor, SyncTaskExecutor};
    use crate::step::Step;
    use crate::testing::{ScriptedStep, TestFixture};
    use pretty_assertions::assert_eq;

    fn step(name: &str) -> Arc<ScriptedStep> {
        Arc::new(ScriptedStep::new(name))
    }

    fn executor(fixture: &TestFixture) -> Arc<dyn FlowExecutor> {
        Arc::new(JobFlowExecutor::new(fixture.ledger.clone(), Arc::clone(&fixture.stop)))
    }

    fn ran(job: &JobExecution) -> Vec<String> {
        job.step_executions.iter().map(|s| s.step_name.clone()).collect()
    }

    #[tokio::test]
    async fn test_sequential_flow_completes() {
        let fixture = TestFixture::new("job").await.unwrap();
        let flow = FlowBuilder::new("main")
            .start(step("a"))
            .next(step("b"))
            .build()
            .unwrap();
        let mut job = fixture.job_execution.clone();

        let status = flow.execute(&executor(&fixture), &mut job).await.unwrap();
        assert_eq!(status, FlowExecutionStatus::completed());
        assert_eq!(ran(&job), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failed_step_routes_to_exact_transition() {
        let fixture = TestFixture::new("job").await.unwrap();
        let flow = FlowBuilder::new("main")
            .start(Arc::new(ScriptedStep::new("load").failing_times(1)))
            .on("FAILED")
            .to(step("cleanup"))
            .from("load")
            .on("*")
            .to(step("report"))
            .build()
            .unwrap();
        let mut job = fixture.job_execution.clone();

        let status = flow.execute(&executor(&fixture), &mut job).await.unwrap();
        assert_eq!(status, FlowExecutionStatus::completed());
        assert_eq!(ran(&job), vec!["load", "cleanup"]);
    }

    #[tokio::test]
    async fn test_next_fails_flow_on_failed_step() {
        let fixture = TestFixture::new("job").await.unwrap();
        let flow = FlowBuilder::new("main")
            .start(Arc::new(ScriptedStep::new("a").failing_times(1)))
            .next(step("b"))
            .build()
            .unwrap();
        let mut job = fixture.job_execution.clone();

        let status = flow.execute(&executor(&fixture), &mut job).await.unwrap();
        assert_eq!(status, FlowExecutionStatus::failed());
        assert_eq!(ran(&job), vec!["a"]);
    }

    #[tokio::test]
    async fn test_decision_picks_branch() {
        let fixture = TestFixture::new("job").await.unwrap();
        let flow = FlowBuilder::new("main")
            .start(Arc::new(ScriptedStep::new("check").with_exit_code("EMPTY")))
            .next_decision("route", |_: &JobExecution, last: Option<&StepExecution>| {
                match last.map(|s| s.exit_status.code.as_str()) {
                    Some("EMPTY") => FlowExecutionStatus::new("SKIP"),
                    _ => FlowExecutionStatus::new("LOAD"),
                }
            })
            .on("SKIP")
            .end_with("NOTHING_TO_DO")
            .from("route")
            .on("LOAD")
            .to(step("load"))
            .build()
            .unwrap();
        let mut job = fixture.job_execution.clone();

        let status = flow.execute(&executor(&fixture), &mut job).await.unwrap();
        assert_eq!(status, FlowExecutionStatus::completed());
        assert_eq!(ran(&job), vec!["check"]);
        assert_eq!(job.exit_status.code, "NOTHING_TO_DO");
    }

    #[tokio::test]
    async fn test_split_runs_all_branches_and_aggregates() {
        let fixture = TestFixture::new("job").await.unwrap();
        let left = Arc::new(FlowBuilder::new("left").start(step("l1")).next(step("l2")).build().unwrap());
        let right = Arc::new(
            FlowBuilder::new("right")
                .start(Arc::new(ScriptedStep::new("r1").failing_times(1)))
                .build()
                .unwrap(),
        );
        let flow = FlowBuilder::new("main")
            .split("fan_out", vec![left, right], Arc::new(LocalTaskExecutor::new()))
            .next(step("after"))
            .build()
            .unwrap();
        let mut job = fixture.job_execution.clone();

        let status = flow.execute(&executor(&fixture), &mut job).await.unwrap();
        assert_eq!(status, FlowExecutionStatus::failed());
        let mut names = ran(&job);
        names.sort();
        assert_eq!(names, vec!["l1", "l2", "r1"]);
    }

    #[tokio::test]
    async fn test_nested_flow_outcome_drives_outer_transition() {
        let fixture = TestFixture::new("job").await.unwrap();
        let inner = Arc::new(FlowBuilder::new("inner").start(step("i1")).build().unwrap());
        let flow = FlowBuilder::new("outer")
            .start_flow(inner)
            .next(step("o1"))
            .build()
            .unwrap();
        let mut job = fixture.job_execution.clone();

        let status = flow.execute(&executor(&fixture), &mut job).await.unwrap();
        assert_eq!(status, FlowExecutionStatus::completed());
        assert_eq!(ran(&job), vec!["i1", "o1"]);
    }

    #[tokio::test]
    async fn test_stop_and_restart_records_resume_state() {
        let fixture = TestFixture::new("job").await.unwrap();
        let second = step("second");
        let flow = FlowBuilder::new("main")
            .start(step("first"))
            .on("COMPLETED")
            .stop_and_restart("second")
            .add_state(State::Step(second.clone() as Arc<dyn Step>))
            .build()
            .unwrap();
        let exec = executor(&fixture);
        let mut job = fixture.job_execution.clone();

        let status = flow.execute(&exec, &mut job).await.unwrap();
        assert!(status.is_stop());
        assert_eq!(job.execution_context.get_str("batch.restart_state.main"), Some("second"));
        assert_eq!(second.calls(), 0);

        let status = flow.execute(&exec, &mut job).await.unwrap();
        assert_eq!(status, FlowExecutionStatus::completed());
        assert_eq!(second.calls(), 1);
        assert!(!job.execution_context.contains_key("batch.restart_state.main"));
    }

    #[tokio::test]
    async fn test_stop_request_halts_before_next_step() {
        let fixture = TestFixture::new("job").await.unwrap();
        let b = step("b");
        let flow = FlowBuilder::new("main")
            .start(step("a"))
            .next(b.clone())
            .build()
            .unwrap();
        fixture.stop.request_stop("operator");
        let mut job = fixture.job_execution.clone();

        let status = flow
            .execute(&executor(&fixture), &mut job)
            .await
            .unwrap();
        assert_eq!(status, FlowExecutionStatus::stopped());
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_sync_split_keeps_branch_order() {
        let fixture = TestFixture::new("job").await.unwrap();
        let one = Arc::new(FlowBuilder::new("one").start(step("s1")).build().unwrap());
        let two = Arc::new(FlowBuilder::new("two").start(step("s2")).build().unwrap());
        let flow = FlowBuilder::new("main")
            .split("pair", vec![one, two], Arc::new(SyncTaskExecutor))
            .build()
            .unwrap();
        let mut job = fixture.job_execution.clone();

        let status = flow.execute(&executor(&fixture), &mut job).await.unwrap();
        assert_eq!(status, FlowExecutionStatus::completed());
        assert_eq!(ran(&job), vec!["s1", "s2"]);
    }
}
