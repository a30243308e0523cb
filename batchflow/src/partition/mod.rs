//! Partition coordinator: run one step as N concurrent sub-executions.
//!
//! A [`Partitioner`] names the partitions and seeds their contexts, the
//! [`StepExecutionSplitter`] persists one child execution per partition, a
//! [`DistributionStrategy`] runs them and [`PartitionStep`] aggregates the
//! outcome worst-of into the umbrella execution.

mod partitioner;
mod splitter;
mod step;
mod strategy;

pub use partitioner::{Partitioner, RangePartitioner, SimplePartitioner, RANGE_MAX_KEY, RANGE_MIN_KEY};
pub use splitter::{partition_step_name, StepExecutionSplitter};
pub use step::{PartitionConfig, PartitionFailurePolicy, PartitionStep, PartitionStepBuilder};
pub use strategy::{DistributionStrategy, LocalTaskExecutor, SyncTaskExecutor, WorkHandle, WorkOutcome, WorkUnit};
