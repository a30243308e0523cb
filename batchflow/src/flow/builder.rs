//! Fluent builder for flows with validation.

use std::collections::HashMap;
use std::sync::Arc;

use super::definition::Flow;
use super::state::{EndState, JobExecutionDecider, State};
use super::status::FlowExecutionStatus;
use super::transition::{sort_by_specificity, Transition, TransitionPattern};
use crate::errors::FlowValidationError;
use crate::partition::DistributionStrategy;
use crate::step::Step;

/// Builder for [`Flow`]s.
///
/// `next` chains states on COMPLETED and fails the flow on anything else;
/// `from(..).on(pattern)` declares explicit transitions. Problems are
/// reported by [`FlowBuilder::build`].
#[derive(Debug)]
pub struct FlowBuilder {
    name: String,
    states: HashMap<String, State>,
    order: Vec<String>,
    transitions: Vec<(String, String, String)>,
    start: Option<String>,
    current: Option<String>,
    errors: Vec<FlowValidationError>,
}

impl FlowBuilder {
    /// Creates a builder for a flow named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: HashMap::new(),
            order: Vec::new(),
            transitions: Vec::new(),
            start: None,
            current: None,
            errors: Vec::new(),
        }
    }

    /// Starts the flow with a step.
    #[must_use]
    pub fn start(self, step: Arc<dyn Step>) -> Self {
        self.start_state(State::Step(step))
    }

    /// Starts the flow with a nested flow.
    #[must_use]
    pub fn start_flow(self, flow: Arc<Flow>) -> Self {
        self.start_state(State::Flow(flow))
    }

    /// Starts the flow with a decision.
    #[must_use]
    pub fn start_decision<D>(self, name: impl Into<String>, decider: D) -> Self
    where
        D: JobExecutionDecider + 'static,
    {
        self.start_state(State::Decision {
            name: name.into(),
            decider: Arc::new(decider),
        })
    }

    fn start_state(mut self, state: State) -> Self {
        let name = self.add(state);
        if let Some(existing) = &self.start {
            self.errors.push(
                FlowValidationError::new(format!("Flow '{}' already starts at '{existing}'", self.name))
                    .with_states(vec![existing.clone(), name.clone()]),
            );
        } else {
            self.start = Some(name.clone());
        }
        self.current = Some(name);
        self
    }

    /// Runs `step` when the current state COMPLETES; any other outcome
    /// fails the flow.
    #[must_use]
    pub fn next(self, step: Arc<dyn Step>) -> Self {
        self.next_state(State::Step(step))
    }

    /// Like [`FlowBuilder::next`] for a nested flow.
    #[must_use]
    pub fn next_flow(self, flow: Arc<Flow>) -> Self {
        self.next_state(State::Flow(flow))
    }

    /// Like [`FlowBuilder::next`] for a decision.
    #[must_use]
    pub fn next_decision<D>(self, name: impl Into<String>, decider: D) -> Self
    where
        D: JobExecutionDecider + 'static,
    {
        self.next_state(State::Decision {
            name: name.into(),
            decider: Arc::new(decider),
        })
    }

    /// Runs `flows` concurrently on `strategy` after the current state
    /// completes, or first if the flow has no start yet.
    #[must_use]
    pub fn split(
        self,
        name: impl Into<String>,
        flows: Vec<Arc<Flow>>,
        strategy: Arc<dyn DistributionStrategy>,
    ) -> Self {
        self.next_state(State::Split {
            name: name.into(),
            flows,
            strategy,
        })
    }

    fn next_state(mut self, state: State) -> Self {
        let Some(current) = self.current.clone() else {
            return self.start_state(state);
        };
        let name = self.add(state);
        let failed = self.add(State::End(EndState::failed()));
        self.transitions
            .push((current.clone(), FlowExecutionStatus::COMPLETED.to_string(), name.clone()));
        self.transitions.push((current, "*".to_string(), failed));
        self.current = Some(name);
        self
    }

    /// Adds a state without wiring it; transitions are declared with
    /// `from(..)`.
    #[must_use]
    pub fn add_state(mut self, state: State) -> Self {
        self.add(state);
        self
    }

    /// Makes `state` the source of the next `on(..)`.
    #[must_use]
    pub fn from(mut self, state: &str) -> Self {
        if !self.states.contains_key(state) {
            self.errors.push(
                FlowValidationError::new(format!("Unknown state '{state}' in flow '{}'", self.name))
                    .with_states(vec![state.to_string()]),
            );
        }
        self.current = Some(state.to_string());
        self
    }

    /// Declares a transition from the current state for exit codes matching
    /// `pattern`.
    #[must_use]
    pub fn on(self, pattern: impl Into<String>) -> TransitionBuilder {
        TransitionBuilder {
            builder: self,
            pattern: pattern.into(),
        }
    }

    fn add(&mut self, state: State) -> String {
        let name = state.name().to_string();
        match self.states.get(&name) {
            Some(existing) if existing.same_as(&state) => {}
            Some(_) => self.errors.push(
                FlowValidationError::new(format!(
                    "Duplicate state name '{name}' in flow '{}'",
                    self.name
                ))
                .with_states(vec![name.clone()]),
            ),
            None => {
                self.order.push(name.clone());
                self.states.insert(name.clone(), state);
            }
        }
        name
    }

    fn transition(&mut self, pattern: String, to: String) {
        match self.current.clone() {
            Some(from) => self.transitions.push((from, pattern, to)),
            None => self.errors.push(FlowValidationError::new(format!(
                "Transition on '{pattern}' in flow '{}' has no source state",
                self.name
            ))),
        }
    }

    /// Validates the flow and completes its transitions.
    ///
    /// A state without outgoing transitions ends the flow: COMPLETED goes to
    /// `end.completed` and anything else to `end.failed`. A state whose
    /// transitions miss COMPLETED or FAILED gets the matching default.
    pub fn build(mut self) -> Result<Flow, FlowValidationError> {
        if let Some(error) = self.errors.drain(..).next() {
            return Err(error);
        }
        let Some(start) = self.start.clone() else {
            return Err(FlowValidationError::new(format!("Flow '{}' has no start state", self.name)));
        };

        self.add_dangling_ends();

        let mut transitions: HashMap<String, Vec<Transition>> = HashMap::new();
        for (from, pattern, to) in &self.transitions {
            if !self.states.contains_key(to) {
                return Err(FlowValidationError::new(format!(
                    "Transition from '{from}' on '{pattern}' targets unknown state '{to}'"
                ))
                .with_states(vec![from.clone(), to.clone()]));
            }
            let rules = transitions.entry(from.clone()).or_default();
            if rules.iter().any(|t| t.pattern.as_str() == pattern) {
                continue;
            }
            rules.push(Transition::new(from.clone(), pattern, to.clone())?);
        }
        for rules in transitions.values_mut() {
            sort_by_specificity(rules);
        }

        for state in self.states.values() {
            if let State::End(EndState {
                name,
                restart: Some(target),
                ..
            }) = state
            {
                if !self.states.contains_key(target) {
                    return Err(FlowValidationError::new(format!(
                        "End state '{name}' restarts at unknown state '{target}'"
                    ))
                    .with_states(vec![name.clone(), target.clone()]));
                }
            }
        }

        Ok(Flow::new(self.name, start, self.states, self.order, transitions))
    }

    fn add_dangling_ends(&mut self) {
        let sources: Vec<String> = self
            .order
            .iter()
            .filter(|name| self.states.get(*name).is_some_and(|s| !s.is_end()))
            .cloned()
            .collect();

        for source in sources {
            let patterns: Vec<String> = self
                .transitions
                .iter()
                .filter(|(from, _, _)| *from == source)
                .map(|(_, pattern, _)| pattern.clone())
                .collect();
            let matches = |code: &str| {
                patterns
                    .iter()
                    .filter_map(|p| TransitionPattern::new(p.as_str()).ok())
                    .any(|p| p.matches(code))
            };
            let needs_completed = patterns.is_empty() || !matches(FlowExecutionStatus::COMPLETED);
            let needs_failed = patterns.is_empty() || !matches(FlowExecutionStatus::FAILED);

            if needs_completed {
                let completed = self.add(State::End(EndState::completed()));
                self.transitions
                    .push((source.clone(), FlowExecutionStatus::COMPLETED.to_string(), completed));
            }
            if needs_failed {
                let failed = self.add(State::End(EndState::failed()));
                self.transitions.push((source, "*".to_string(), failed));
            }
        }
    }
}

/// Completes an `on(pattern)` declaration.
#[derive(Debug)]
pub struct TransitionBuilder {
    builder: FlowBuilder,
    pattern: String,
}

impl TransitionBuilder {
    /// Goes to `step`, which becomes the current state.
    #[must_use]
    pub fn to(self, step: Arc<dyn Step>) -> FlowBuilder {
        self.to_new(State::Step(step))
    }

    /// Goes to a nested flow, which becomes the current state.
    #[must_use]
    pub fn to_flow(self, flow: Arc<Flow>) -> FlowBuilder {
        self.to_new(State::Flow(flow))
    }

    /// Goes to a decision, which becomes the current state.
    #[must_use]
    pub fn to_decision<D>(self, name: impl Into<String>, decider: D) -> FlowBuilder
    where
        D: JobExecutionDecider + 'static,
    {
        self.to_new(State::Decision {
            name: name.into(),
            decider: Arc::new(decider),
        })
    }

    /// Goes to a state added elsewhere, checked at build time.
    #[must_use]
    pub fn to_state(self, name: impl Into<String>) -> FlowBuilder {
        let Self { mut builder, pattern } = self;
        builder.transition(pattern, name.into());
        builder
    }

    /// Ends the flow COMPLETED.
    #[must_use]
    pub fn end(self) -> FlowBuilder {
        self.to_end(EndState::completed())
    }

    /// Ends the flow COMPLETED with a custom job exit code.
    #[must_use]
    pub fn end_with(self, exit_code: impl Into<String>) -> FlowBuilder {
        self.to_end(EndState::completed_with(exit_code))
    }

    /// Ends the flow FAILED.
    #[must_use]
    pub fn fail(self) -> FlowBuilder {
        self.to_end(EndState::failed())
    }

    /// Ends the flow STOPPED; a restart begins at the flow start.
    #[must_use]
    pub fn stop(self) -> FlowBuilder {
        self.to_end(EndState::stopped())
    }

    /// Ends the flow STOPPED; a restart resumes at `state`.
    #[must_use]
    pub fn stop_and_restart(self, state: impl Into<String>) -> FlowBuilder {
        self.to_end(EndState::stopped_restarting_at(state))
    }

    fn to_new(self, state: State) -> FlowBuilder {
        let Self { mut builder, pattern } = self;
        let name = builder.add(state);
        builder.transition(pattern, name.clone());
        builder.current = Some(name);
        builder
    }

    fn to_end(self, end: EndState) -> FlowBuilder {
        let Self { mut builder, pattern } = self;
        let name = builder.add(State::End(end));
        builder.transition(pattern, name);
        builder
    }
}
