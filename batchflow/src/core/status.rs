//! Batch and exit status vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job or step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Finished successfully.
    Completed,
    /// Created but not yet running.
    #[default]
    Starting,
    /// Running.
    Started,
    /// A stop was requested; running until the next chunk boundary.
    Stopping,
    /// Stopped on request; restartable.
    Stopped,
    /// Finished unsuccessfully; restartable.
    Failed,
    /// Given up on; never restarted.
    Abandoned,
    /// Outcome could not be recorded.
    Unknown,
}

impl BatchStatus {
    const fn ordinal(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Starting => 1,
            Self::Started => 2,
            Self::Stopping => 3,
            Self::Stopped => 4,
            Self::Failed => 5,
            Self::Abandoned => 6,
            Self::Unknown => 7,
        }
    }

    /// Rank used when aggregating sibling outcomes:
    /// FAILED > STOPPED > UNKNOWN > COMPLETED.
    const fn aggregation_rank(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Starting | Self::Started => 1,
            Self::Unknown => 2,
            Self::Stopping | Self::Stopped => 3,
            Self::Abandoned => 4,
            Self::Failed => 5,
        }
    }

    /// Returns true while an execution in this status may still make progress.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }

    /// Returns true for FAILED and worse.
    #[must_use]
    pub const fn is_unsuccessful(self) -> bool {
        self.ordinal() >= Self::Failed.ordinal()
    }

    /// Moves this status towards `other` without ever going backwards from a
    /// terminal status to a running one.
    #[must_use]
    pub fn upgrade_to(self, other: Self) -> Self {
        if self.ordinal() > Self::Started.ordinal() || other.ordinal() > Self::Started.ordinal() {
            self.max_ordinal(other)
        } else if self == Self::Completed || other == Self::Completed {
            Self::Completed
        } else {
            self.max_ordinal(other)
        }
    }

    fn max_ordinal(self, other: Self) -> Self {
        if other.ordinal() > self.ordinal() {
            other
        } else {
            self
        }
    }

    /// Returns the worse of two sibling outcomes.
    #[must_use]
    pub fn worst_of(self, other: Self) -> Self {
        if other.aggregation_rank() > self.aggregation_rank() {
            other
        } else {
            self
        }
    }

    /// Aggregates sibling outcomes; an empty set is COMPLETED.
    pub fn aggregate<I: IntoIterator<Item = Self>>(statuses: I) -> Self {
        statuses.into_iter().fold(Self::Completed, Self::worst_of)
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Abandoned => "ABANDONED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit code plus a free-form description.
///
/// Codes are open ended: flows route on custom codes produced by steps,
/// deciders and listeners.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitStatus {
    /// The exit code.
    pub code: String,
    /// Free-form description, typically failure messages.
    #[serde(default)]
    pub description: String,
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::executing()
    }
}

impl ExitStatus {
    /// Code of an outcome that could not be determined.
    pub const UNKNOWN: &'static str = "UNKNOWN";
    /// Code of a running execution.
    pub const EXECUTING: &'static str = "EXECUTING";
    /// Code of a successful execution.
    pub const COMPLETED: &'static str = "COMPLETED";
    /// Code of an execution that had nothing to do.
    pub const NOOP: &'static str = "NOOP";
    /// Code of a failed execution.
    pub const FAILED: &'static str = "FAILED";
    /// Code of a stopped execution.
    pub const STOPPED: &'static str = "STOPPED";

    /// Creates an exit status with the given code and no description.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: String::new(),
        }
    }

    /// UNKNOWN exit status.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    /// EXECUTING exit status.
    #[must_use]
    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    /// COMPLETED exit status.
    #[must_use]
    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    /// NOOP exit status.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Self::NOOP)
    }

    /// FAILED exit status.
    #[must_use]
    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    /// STOPPED exit status.
    #[must_use]
    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    fn severity(&self) -> u8 {
        match self.code.as_str() {
            Self::EXECUTING => 1,
            Self::COMPLETED => 2,
            Self::NOOP => 3,
            Self::STOPPED => 4,
            Self::FAILED => 5,
            Self::UNKNOWN => 6,
            _ => 7,
        }
    }

    /// Combines two statuses: the more severe code wins and descriptions are
    /// concatenated. Custom codes outrank every built-in code.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        let mut combined = if other.severity() > self.severity() {
            Self::new(other.code.clone())
        } else {
            Self::new(self.code.clone())
        };
        combined.description = join_descriptions(&self.description, &other.description);
        combined
    }

    /// Appends to the description.
    #[must_use]
    pub fn add_exit_description(mut self, description: impl AsRef<str>) -> Self {
        self.description = join_descriptions(&self.description, description.as_ref());
        self
    }

    /// Replaces the code, keeping the description.
    #[must_use]
    pub fn replace_exit_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Returns true while the code is EXECUTING or UNKNOWN.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.code == Self::EXECUTING || self.code == Self::UNKNOWN
    }
}

fn join_descriptions(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ if a == b => a.to_string(),
        _ => format!("{a}; {b}"),
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            f.write_str(&self.code)
        } else {
            write!(f, "{} ({})", self.code, self.description)
        }
    }
}

impl From<BatchStatus> for ExitStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => Self::completed(),
            BatchStatus::Starting | BatchStatus::Started => Self::executing(),
            BatchStatus::Stopping | BatchStatus::Stopped => Self::stopped(),
            BatchStatus::Failed | BatchStatus::Abandoned => Self::failed(),
            BatchStatus::Unknown => Self::unknown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_precedence() {
        use BatchStatus::*;
        assert_eq!(BatchStatus::aggregate([Completed, Unknown]), Unknown);
        assert_eq!(BatchStatus::aggregate([Unknown, Stopped]), Stopped);
        assert_eq!(BatchStatus::aggregate([Stopped, Failed, Completed]), Failed);
        assert_eq!(BatchStatus::aggregate(Vec::new()), Completed);
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        use BatchStatus::*;
        let statuses = [Completed, Failed, Stopped, Unknown, Completed];
        let forward = BatchStatus::aggregate(statuses);
        let backward = BatchStatus::aggregate(statuses.iter().rev().copied());
        let rotated = BatchStatus::aggregate(statuses[2..].iter().chain(&statuses[..2]).copied());
        assert_eq!(forward, Failed);
        assert_eq!(forward, backward);
        assert_eq!(forward, rotated);
    }

    #[test]
    fn test_upgrade_to() {
        use BatchStatus::*;
        assert_eq!(Started.upgrade_to(Completed), Completed);
        assert_eq!(Completed.upgrade_to(Started), Completed);
        assert_eq!(Started.upgrade_to(Stopping), Stopping);
        assert_eq!(Failed.upgrade_to(Completed), Failed);
        assert_eq!(Starting.upgrade_to(Started), Started);
    }

    #[test]
    fn test_is_running() {
        assert!(BatchStatus::Started.is_running());
        assert!(BatchStatus::Stopping.is_running());
        assert!(!BatchStatus::Failed.is_running());
        assert!(!BatchStatus::Completed.is_running());
    }

    #[test]
    fn test_exit_status_and_by_severity() {
        let completed = ExitStatus::completed();
        let failed = ExitStatus::failed().add_exit_description("boom");
        let combined = completed.and(&failed);
        assert_eq!(combined.code, "FAILED");
        assert_eq!(combined.description, "boom");

        let custom = ExitStatus::new("COMPLETED WITH SKIPS");
        assert_eq!(failed.and(&custom).code, "COMPLETED WITH SKIPS");
        assert_eq!(ExitStatus::executing().and(&completed).code, "COMPLETED");
    }

    #[test]
    fn test_exit_status_serde() {
        let status = ExitStatus::stopped();
        let json = serde_json::to_string(&status).unwrap();
        let back: ExitStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, back);
        assert_eq!(
            serde_json::to_string(&BatchStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
    }
}
