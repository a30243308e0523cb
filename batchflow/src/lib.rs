//! # Batchflow
//!
//! A chunk-oriented batch job engine.
//!
//! Batchflow runs jobs made of steps and records every attempt in an
//! execution ledger so that failed or stopped work resumes where it left
//! off. It provides:
//!
//! - **Execution ledger**: job instances, job and step executions, persisted
//!   execution contexts and restart rules
//! - **Chunk steps**: read, process and write items in chunk transactions
//!   with skip and retry fault tolerance
//! - **Iteration and retry engines**: repeat templates with completion
//!   policies, retry templates with back-off policies
//! - **Partitioned steps**: run one step as many concurrent partitions and
//!   aggregate the outcome
//! - **Flows**: a state machine of steps, decisions, splits and end states
//!   routed by exit-code patterns
//! - **Operator surface**: launch, restart, stop and abandon executions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use batchflow::prelude::*;
//!
//! let load = ChunkStep::builder("load")
//!     .commit_interval(100)
//!     .skip("parse")
//!     .skip_limit(10)
//!     .reader(|_| ListItemReader::new(rows))
//!     .processor(PassThroughItemProcessor::new())
//!     .writer(|_| TableWriter::new())
//!     .build()?;
//!
//! let job = Job::builder("nightly-import").step(Arc::new(load)).build()?;
//! let launcher = JobLauncher::new(in_memory_ledger());
//! let execution = launcher.run(&job, parameters).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod core;
pub mod errors;
pub mod flow;
pub mod job;
pub mod ledger;
pub mod observability;
pub mod partition;
pub mod repeat;
pub mod retry;
pub mod step;
pub mod stop;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        BatchStatus, ExecutionContext, ExitStatus, JobExecution, JobInstance, JobParameters,
        JobParametersBuilder, StepExecution,
    };
    pub use crate::errors::{BatchError, ConfigValidationError, FlowValidationError, ItemError};
    pub use crate::flow::{Flow, FlowBuilder, FlowExecutionStatus, JobExecutionDecider};
    pub use crate::job::{Job, JobBuilder, JobLauncher, JobOperator, JobRegistry};
    pub use crate::ledger::{in_memory_ledger, ExecutionLedger, RestartRules};
    pub use crate::partition::{
        DistributionStrategy, LocalTaskExecutor, PartitionFailurePolicy, PartitionStep, Partitioner,
        RangePartitioner, SimplePartitioner,
    };
    pub use crate::repeat::{RepeatStatus, RepeatTemplate};
    pub use crate::retry::{BackOffPolicy, RetryTemplate, SimpleRetryPolicy};
    pub use crate::step::{
        BatchListener, ChunkStep, ItemProcessor, ItemReader, ItemStream, ItemWriter,
        ListItemReader, PassThroughItemProcessor, Step, TaskletStep,
    };
    pub use crate::stop::StopSignal;
}
