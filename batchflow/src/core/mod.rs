//! Core batch domain types.
//!
//! This module contains the fundamental types used throughout batchflow:
//! - [`BatchStatus`] and [`ExitStatus`] - outcome vocabulary
//! - [`JobParameters`] - launch parameters and job identity
//! - [`JobInstance`], [`JobExecution`], [`StepExecution`] - ledger entities
//! - [`ExecutionContext`] - restart state
//! - [`KindClassifier`] - failure kind classification

mod classifier;
mod context;
mod execution;
mod parameters;
mod status;

pub use classifier::KindClassifier;
pub use context::ExecutionContext;
pub use execution::{
    ContextOwner, FailureRecord, JobExecution, JobInstance, StepContribution, StepExecution,
};
pub use parameters::{
    DefaultJobParametersValidator, JobParameter, JobParameters, JobParametersBuilder,
    JobParametersIncrementer, JobParametersValidator, ParameterValue, RunIdIncrementer,
};
pub use status::{BatchStatus, ExitStatus};
