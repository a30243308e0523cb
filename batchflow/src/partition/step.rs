//! The partitioned step: run a base step once per partition and aggregate.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::partitioner::Partitioner;
use super::splitter::StepExecutionSplitter;
use super::strategy::{DistributionStrategy, LocalTaskExecutor, WorkOutcome};
use crate::core::{BatchStatus, ExitStatus, StepExecution};
use crate::errors::{BatchError, ConfigValidationError};
use crate::step::{execute_step, BatchListener, CompositeListener, Step, StepContext};

/// What happens to running siblings when a partition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionFailurePolicy {
    /// Siblings run to completion.
    #[default]
    LetFinish,
    /// Siblings are asked to stop at their next chunk boundary.
    CancelSiblings,
}

/// Tunables of a partitioned step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Partitions requested from the partitioner.
    pub grid_size: usize,
    /// Sibling handling on failure.
    pub failure_policy: PartitionFailurePolicy,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            grid_size: 1,
            failure_policy: PartitionFailurePolicy::LetFinish,
        }
    }
}

impl PartitionConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.grid_size == 0 {
            return Err(ConfigValidationError::with_code(
                "CONFIG-009-GRID_SIZE",
                "grid_size must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Runs a base step as N child executions and aggregates their outcome into
/// the umbrella execution.
pub struct PartitionStep {
    name: String,
    step: Arc<dyn Step>,
    partitioner: Arc<dyn Partitioner>,
    strategy: Arc<dyn DistributionStrategy>,
    config: PartitionConfig,
    listeners: CompositeListener,
    start_limit: usize,
    allow_start_if_complete: bool,
}

impl std::fmt::Debug for PartitionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionStep")
            .field("name", &self.name)
            .field("step", &self.step.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PartitionStep {
    /// Starts a builder for a partitioned run of `step`.
    #[must_use]
    pub fn builder(name: impl Into<String>, step: Arc<dyn Step>) -> PartitionStepBuilder {
        PartitionStepBuilder {
            name: name.into(),
            step,
            partitioner: None,
            strategy: None,
            config: PartitionConfig::default(),
            listeners: CompositeListener::new(),
            start_limit: usize::MAX,
            allow_start_if_complete: false,
        }
    }
}

#[async_trait]
impl Step for PartitionStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_limit(&self) -> usize {
        self.start_limit
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn listener(&self) -> Option<&dyn BatchListener> {
        Some(&self.listeners)
    }

    async fn do_execute(&self, execution: &mut StepExecution, context: &StepContext) -> Result<(), BatchError> {
        let splitter = StepExecutionSplitter::new(context.ledger().clone(), Arc::clone(&self.partitioner));
        let children = splitter.split(execution, self.config.grid_size).await?;
        let group = context.stop_signal().child();

        let mut handles = Vec::with_capacity(children.len());
        let mut child_ids = Vec::with_capacity(children.len());
        for mut child in children {
            child_ids.push(child.id);
            let name = child.step_name.clone();
            let step = Arc::clone(&self.step);
            let child_context = context.with_stop_signal(group.child());
            let group = Arc::clone(&group);
            let policy = self.config.failure_policy;

            let unit = async move {
                if let Err(e) = execute_step(step.as_ref(), &mut child, &child_context).await {
                    warn!(partition = %child.step_name, error = %e, "Partition state not persisted");
                }
                if child.status == BatchStatus::Failed && policy == PartitionFailurePolicy::CancelSiblings {
                    group.request_stop(format!("partition {} failed", child.step_name));
                }
                WorkOutcome::new(child.step_name, child.status, child.exit_status)
            }
            .boxed();
            handles.push(self.strategy.submit(name, unit).await);
        }

        let outcomes = self.strategy.await_all(handles).await;

        for id in child_ids {
            if let Some(child) = context.ledger().get_step_execution(id).await? {
                execution.add_counts(&child);
            }
        }

        let status = BatchStatus::aggregate(outcomes.iter().map(|o| o.status));
        info!(
            step = %self.name,
            partitions = outcomes.len(),
            status = %status,
            "Partitions finished"
        );
        match status {
            BatchStatus::Failed | BatchStatus::Abandoned => Err(BatchError::PartitionFailed {
                step_name: self.name.clone(),
                failed: outcomes
                    .into_iter()
                    .filter(|o| o.status.is_unsuccessful())
                    .map(|o| o.name)
                    .collect(),
            }),
            BatchStatus::Stopped | BatchStatus::Stopping => {
                execution.status = BatchStatus::Stopped;
                execution.exit_status = execution.exit_status.and(&ExitStatus::stopped());
                Ok(())
            }
            BatchStatus::Unknown => {
                execution.status = BatchStatus::Unknown;
                execution.exit_status = execution.exit_status.and(&ExitStatus::unknown());
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Builder for [`PartitionStep`].
pub struct PartitionStepBuilder {
    name: String,
    step: Arc<dyn Step>,
    partitioner: Option<Arc<dyn Partitioner>>,
    strategy: Option<Arc<dyn DistributionStrategy>>,
    config: PartitionConfig,
    listeners: CompositeListener,
    start_limit: usize,
    allow_start_if_complete: bool,
}

impl std::fmt::Debug for PartitionStepBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionStepBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PartitionStepBuilder {
    /// Sets the partitioner.
    #[must_use]
    pub fn partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Some(Arc::new(partitioner));
        self
    }

    /// Sets the distribution strategy; defaults to [`LocalTaskExecutor`].
    #[must_use]
    pub fn strategy(mut self, strategy: Arc<dyn DistributionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Partitions requested from the partitioner.
    #[must_use]
    pub const fn grid_size(mut self, grid_size: usize) -> Self {
        self.config.grid_size = grid_size;
        self
    }

    /// Sibling handling on failure.
    #[must_use]
    pub const fn failure_policy(mut self, policy: PartitionFailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub const fn config(mut self, config: PartitionConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a listener on the umbrella step.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn BatchListener>) -> Self {
        self.listeners.register(listener);
        self
    }

    /// Starts allowed per job instance.
    #[must_use]
    pub const fn start_limit(mut self, limit: usize) -> Self {
        self.start_limit = limit;
        self
    }

    /// Reruns the step on restart even when complete.
    #[must_use]
    pub const fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    /// Validates and builds the step.
    pub fn build(self) -> Result<PartitionStep, BatchError> {
        self.config.validate()?;
        let partitioner = self.partitioner.ok_or_else(|| {
            ConfigValidationError::with_code(
                "CONFIG-008-MISSING_COMPONENT",
                format!("partitioned step '{}' has no partitioner", self.name),
            )
        })?;
        Ok(PartitionStep {
            name: self.name,
            step: self.step,
            partitioner,
            strategy: self
                .strategy
                .unwrap_or_else(|| Arc::new(LocalTaskExecutor::new())),
            config: self.config,
            listeners: self.listeners,
            start_limit: self.start_limit,
            allow_start_if_complete: self.allow_start_if_complete,
        })
    }
}
