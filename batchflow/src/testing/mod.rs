//! Testing utilities for batch jobs.
//!
//! This module provides:
//! - Scripted readers, processors, writers and steps
//! - An in-memory ledger fixture
//! - Assertions on step and job executions

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_counts, assert_job_status, assert_step_status};
pub use fixtures::{job_parameters, TestFixture};
pub use mocks::{FailingProcessor, FlakyReader, RecordingWriter, ScriptedStep};
