//! Jobs: definitions, the flow executor that runs their steps, launching and
//! the operator surface.
//!
//! This module provides:
//! - Job definitions and their builder
//! - The job lifecycle runner
//! - A launcher tracking running executions
//! - A registry and an operator for start, restart, stop and abandon

mod definition;
mod executor;
mod integration_tests;
mod launcher;
mod operator;
mod registry;
mod runner;

pub use definition::{Job, JobBuilder};
pub use executor::JobFlowExecutor;
pub use launcher::{JobLauncher, LaunchHandle};
pub use operator::JobOperator;
pub use registry::JobRegistry;
pub use runner::run_job;
