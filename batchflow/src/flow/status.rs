//! Outcome of a flow state, used to pick the next transition.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::BatchStatus;

/// Status produced by a flow state: a step's exit code, a decider's outcome
/// or an end state's status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowExecutionStatus {
    name: String,
}

impl FlowExecutionStatus {
    /// The flow completed.
    pub const COMPLETED: &'static str = "COMPLETED";
    /// The flow stopped and may be restarted.
    pub const STOPPED: &'static str = "STOPPED";
    /// The flow failed.
    pub const FAILED: &'static str = "FAILED";
    /// The outcome is not known.
    pub const UNKNOWN: &'static str = "UNKNOWN";

    /// Creates a status with an arbitrary name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// COMPLETED.
    #[must_use]
    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    /// STOPPED.
    #[must_use]
    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    /// FAILED.
    #[must_use]
    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    /// UNKNOWN.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    /// The status name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for names starting with STOPPED.
    #[must_use]
    pub fn is_stop(&self) -> bool {
        self.name.starts_with(Self::STOPPED)
    }

    /// True for names starting with FAILED.
    #[must_use]
    pub fn is_fail(&self) -> bool {
        self.name.starts_with(Self::FAILED)
    }

    /// True for the statuses that end a job: COMPLETED, STOPPED or FAILED
    /// prefixes.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.is_stop() || self.is_fail() || self.name.starts_with(Self::COMPLETED)
    }

    /// The batch status whose name prefixes this status, else UNKNOWN.
    #[must_use]
    pub fn batch_status(&self) -> BatchStatus {
        [
            BatchStatus::Completed,
            BatchStatus::Stopped,
            BatchStatus::Failed,
            BatchStatus::Abandoned,
        ]
        .into_iter()
        .find(|status| self.name.starts_with(status.as_str()))
        .unwrap_or(BatchStatus::Unknown)
    }
}

impl From<BatchStatus> for FlowExecutionStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => Self::completed(),
            BatchStatus::Stopping | BatchStatus::Stopped => Self::stopped(),
            BatchStatus::Failed | BatchStatus::Abandoned => Self::failed(),
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Unknown => Self::unknown(),
        }
    }
}

impl fmt::Display for FlowExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
