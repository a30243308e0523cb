//! Job definitions.

use std::sync::Arc;

use crate::core::{JobParameters, JobParametersIncrementer, JobParametersValidator};
use crate::errors::{BatchError, ConfigValidationError};
use crate::flow::{Flow, FlowBuilder};
use crate::ledger::RestartRules;
use crate::step::{BatchListener, CompositeListener, Step};

/// A named, reusable flow of steps.
pub struct Job {
    name: String,
    flow: Arc<Flow>,
    restartable: bool,
    allow_restart_when_complete: bool,
    listeners: CompositeListener,
    validator: Option<Arc<dyn JobParametersValidator>>,
    incrementer: Option<Arc<dyn JobParametersIncrementer>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("flow", &self.flow.name())
            .field("restartable", &self.restartable)
            .field("allow_restart_when_complete", &self.allow_restart_when_complete)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Starts building a job.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }

    /// The job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The job's flow.
    #[must_use]
    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    /// Relaunch rules for the job's instances.
    #[must_use]
    pub const fn restart_rules(&self) -> RestartRules {
        RestartRules {
            restartable: self.restartable,
            allow_restart_when_complete: self.allow_restart_when_complete,
        }
    }

    /// Job lifecycle listeners.
    #[must_use]
    pub fn listeners(&self) -> &CompositeListener {
        &self.listeners
    }

    /// The incrementer used by "start next instance", if any.
    #[must_use]
    pub fn incrementer(&self) -> Option<&Arc<dyn JobParametersIncrementer>> {
        self.incrementer.as_ref()
    }

    /// Checks launch parameters against the configured validator.
    pub fn validate_parameters(&self, parameters: &JobParameters) -> Result<(), ConfigValidationError> {
        match &self.validator {
            Some(validator) => validator.validate(parameters),
            None => Ok(()),
        }
    }
}

/// Builder for [`Job`].
pub struct JobBuilder {
    name: String,
    flow: Option<Arc<Flow>>,
    steps: Vec<Arc<dyn Step>>,
    restartable: bool,
    allow_restart_when_complete: bool,
    listeners: CompositeListener,
    validator: Option<Arc<dyn JobParametersValidator>>,
    incrementer: Option<Arc<dyn JobParametersIncrementer>>,
}

impl std::fmt::Debug for JobBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobBuilder")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

impl JobBuilder {
    /// Creates a builder; jobs are restartable by default.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flow: None,
            steps: Vec::new(),
            restartable: true,
            allow_restart_when_complete: false,
            listeners: CompositeListener::new(),
            validator: None,
            incrementer: None,
        }
    }

    /// Runs `flow`.
    #[must_use]
    pub fn flow(mut self, flow: Arc<Flow>) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Appends a step to a sequential job. Ignored when a flow is set.
    #[must_use]
    pub fn step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Whether failed or stopped instances may be relaunched.
    #[must_use]
    pub const fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    /// Lets a COMPLETED instance run again from scratch.
    #[must_use]
    pub const fn allow_restart_when_complete(mut self) -> Self {
        self.allow_restart_when_complete = true;
        self
    }

    /// Adds a job listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn BatchListener>) -> Self {
        self.listeners.register(listener);
        self
    }

    /// Validates parameters before each launch.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn JobParametersValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Derives parameters for "start next instance".
    #[must_use]
    pub fn incrementer(mut self, incrementer: Arc<dyn JobParametersIncrementer>) -> Self {
        self.incrementer = Some(incrementer);
        self
    }

    /// Builds the job.
    pub fn build(self) -> Result<Job, BatchError> {
        if self.name.trim().is_empty() {
            return Err(ConfigValidationError::with_code("CONFIG-010-JOB_NAME", "job name must not be empty").into());
        }
        let flow = match self.flow {
            Some(flow) => flow,
            None => {
                let mut steps = self.steps.into_iter();
                let Some(first) = steps.next() else {
                    return Err(ConfigValidationError::with_code(
                        "CONFIG-008-MISSING_COMPONENT",
                        format!("job '{}' needs a flow or at least one step", self.name),
                    )
                    .into());
                };
                let builder = steps.fold(FlowBuilder::new(self.name.clone()).start(first), FlowBuilder::next);
                Arc::new(builder.build()?)
            }
        };

        Ok(Job {
            name: self.name,
            flow,
            restartable: self.restartable,
            allow_restart_when_complete: self.allow_restart_when_complete,
            listeners: self.listeners,
            validator: self.validator,
            incrementer: self.incrementer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DefaultJobParametersValidator;
    use crate::testing::ScriptedStep;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sequential_job_builds_flow() {
        let job = Job::builder("nightly")
            .step(Arc::new(ScriptedStep::new("extract")))
            .step(Arc::new(ScriptedStep::new("load")))
            .build()
            .unwrap();
        assert_eq!(job.flow().name(), "nightly");
        assert_eq!(job.flow().step_names(), vec!["extract".to_string(), "load".to_string()]);
        assert!(job.restart_rules().restartable);
    }

    #[test]
    fn test_job_without_steps_rejected() {
        let err = Job::builder("empty").build().unwrap_err();
        match err {
            BatchError::Validation(e) => assert_eq!(e.code(), Some("CONFIG-008-MISSING_COMPONENT")),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_validator_applied() {
        let job = Job::builder("params")
            .step(Arc::new(ScriptedStep::new("s")))
            .validator(Arc::new(DefaultJobParametersValidator::new().with_required(["input"])))
            .build()
            .unwrap();
        assert!(job.validate_parameters(&JobParameters::new()).is_err());
        let params = JobParameters::builder().string("input", "file.csv").build();
        assert!(job.validate_parameters(&params).is_ok());
    }
}
