//! Creates the child step executions of a partitioned step.

use std::sync::Arc;
use tracing::{debug, info};

use super::partitioner::Partitioner;
use crate::core::{BatchStatus, StepExecution};
use crate::errors::BatchError;
use crate::ledger::ExecutionLedger;

/// Name of the child execution of `partition` under `step_name`.
#[must_use]
pub fn partition_step_name(step_name: &str, partition: &str) -> String {
    format!("{step_name}:{partition}")
}

/// Splits an umbrella step execution into persisted child executions.
///
/// When the umbrella's previous execution in the same job instance did not
/// complete, children that completed last time are left out and the others
/// resume from their saved contexts.
pub struct StepExecutionSplitter {
    ledger: ExecutionLedger,
    partitioner: Arc<dyn Partitioner>,
}

impl std::fmt::Debug for StepExecutionSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutionSplitter").finish_non_exhaustive()
    }
}

impl StepExecutionSplitter {
    /// Creates a splitter.
    #[must_use]
    pub fn new(ledger: ExecutionLedger, partitioner: Arc<dyn Partitioner>) -> Self {
        Self { ledger, partitioner }
    }

    /// Creates the child executions for `umbrella`.
    pub async fn split(&self, umbrella: &StepExecution, grid_size: usize) -> Result<Vec<StepExecution>, BatchError> {
        let job = self
            .ledger
            .get_job_execution(umbrella.job_execution_id)
            .await?
            .ok_or(BatchError::NoSuchJobExecution(umbrella.job_execution_id))?;
        let instance_id = job.job_instance.id;
        let restarting = self.previous_umbrella(instance_id, umbrella).await?.is_some_and(|previous| {
            previous.status != BatchStatus::Completed
        });

        let mut children = Vec::new();
        for (partition, context) in self.partitioner.partition(grid_size) {
            let name = partition_step_name(&umbrella.step_name, &partition);
            let previous = if restarting {
                self.ledger.last_step_execution(instance_id, &name).await?
            } else {
                None
            };

            let context = match previous {
                Some(previous) if previous.status == BatchStatus::Completed => {
                    debug!(partition = %name, "Partition already complete, not rerun");
                    continue;
                }
                Some(previous) => previous.execution_context,
                None => context,
            };

            let mut child = self.ledger.add_step_execution(umbrella.job_execution_id, &name).await?;
            child.execution_context = context;
            self.ledger.update_execution_context(&mut child).await?;
            children.push(child);
        }

        info!(
            step = %umbrella.step_name,
            partitions = children.len(),
            restarting,
            "Split step into partitions"
        );
        Ok(children)
    }

    async fn previous_umbrella(
        &self,
        instance_id: u64,
        umbrella: &StepExecution,
    ) -> Result<Option<StepExecution>, BatchError> {
        let mut previous: Option<StepExecution> = None;
        for job in self.ledger.job_executions(instance_id).await? {
            for step in self.ledger.step_executions(job.id).await? {
                if step.step_name == umbrella.step_name
                    && step.id < umbrella.id
                    && previous.as_ref().map_or(true, |p| step.id > p.id)
                {
                    previous = Some(step);
                }
            }
        }
        Ok(previous)
    }
}
