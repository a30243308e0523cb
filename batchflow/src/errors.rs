//! Error types for the batchflow engine.
//!
//! Item collaborators (readers, processors, writers) fail with [`ItemError`],
//! which carries a dotted *kind* such as `io.timeout`. Skip and retry rules
//! match a kind together with all of its dotted descendants, so a rule for
//! `io` also covers `io.timeout` and `io.disk.full`.
//!
//! Everything else surfaces as [`BatchError`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Kind reserved for readers that signal exhaustion by failing instead of
/// returning `None`. Always classified as fatal.
pub const END_OF_STREAM_KIND: &str = "batch.end_of_stream";

/// Anything that can be classified by a dotted failure kind.
pub trait FailureKind {
    /// Returns the dotted kind of this failure.
    fn failure_kind(&self) -> &str;
}

/// Returns true if `kind` equals `rule` or is a dotted descendant of it.
#[must_use]
pub fn kind_matches(rule: &str, kind: &str) -> bool {
    kind == rule
        || (kind.len() > rule.len()
            && kind.starts_with(rule)
            && kind.as_bytes()[rule.len()] == b'.')
}

/// The main error type for batchflow operations.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Invalid configuration or job parameters.
    #[error("{0}")]
    Validation(#[from] ConfigValidationError),

    /// A flow definition could not be built.
    #[error("{0}")]
    Flow(#[from] FlowValidationError),

    /// The execution ledger failed. Always fatal.
    #[error("{0}")]
    Ledger(#[from] LedgerError),

    /// A fatal item-level failure.
    #[error("Item failure: {0}")]
    Item(#[from] ItemError),

    /// The step exhausted its skip allowance.
    #[error("Skip limit of {limit} exceeded: {source}")]
    SkipLimitExceeded {
        /// The configured skip limit.
        limit: usize,
        /// The failure that could not be skipped.
        source: ItemError,
    },

    /// Another execution of the same job instance is still running.
    #[error("A job execution for job '{job_name}' (instance {instance_id}) is already running")]
    JobExecutionAlreadyRunning {
        /// The job name.
        job_name: String,
        /// The job instance id.
        instance_id: u64,
    },

    /// The job instance already completed and may not run again.
    #[error("Job instance {instance_id} of job '{job_name}' is already complete")]
    JobInstanceAlreadyComplete {
        /// The job name.
        job_name: String,
        /// The job instance id.
        instance_id: u64,
    },

    /// The job instance cannot be restarted.
    #[error("Job restart refused: {0}")]
    JobRestart(String),

    /// A step was started more often than its start limit allows.
    #[error("Step '{step_name}' reached its start limit of {limit}")]
    StartLimitExceeded {
        /// The step name.
        step_name: String,
        /// The configured start limit.
        limit: usize,
    },

    /// One or more partitions of a partitioned step failed.
    #[error("Partitioned step '{step_name}' failed in partitions {failed:?}")]
    PartitionFailed {
        /// The umbrella step name.
        step_name: String,
        /// Names of the failed partitions.
        failed: Vec<String>,
    },

    /// No job registered under the given name.
    #[error("No job registered under name '{0}'")]
    NoSuchJob(String),

    /// No job execution with the given id.
    #[error("No job execution with id {0}")]
    NoSuchJobExecution(u64),

    /// The job execution is not in a state that allows the operation.
    #[error("Job execution {execution_id} is not {expected}")]
    UnexpectedJobState {
        /// The job execution id.
        execution_id: u64,
        /// Describes the state required by the operation.
        expected: String,
    },

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    /// Returns true if this error came from the ledger.
    #[must_use]
    pub const fn is_ledger(&self) -> bool {
        matches!(self, Self::Ledger(_))
    }

    /// Converts to a dictionary representation for failure records.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert(
            "kind".to_string(),
            serde_json::Value::String(self.failure_kind().to_string()),
        );
        map.insert(
            "message".to_string(),
            serde_json::Value::String(self.to_string()),
        );
        if let Self::Validation(err) = self {
            if let Some(ref info) = err.error_info {
                let info_map: serde_json::Map<String, serde_json::Value> =
                    info.to_dict().into_iter().collect();
                map.insert("error_info".to_string(), serde_json::Value::Object(info_map));
            }
        }
        map
    }
}

impl FailureKind for BatchError {
    fn failure_kind(&self) -> &str {
        match self {
            Self::Validation(_) => "batch.validation",
            Self::Flow(_) => "batch.flow",
            Self::Ledger(_) => "batch.ledger",
            Self::Item(err) | Self::SkipLimitExceeded { source: err, .. } => &err.kind,
            Self::JobExecutionAlreadyRunning { .. } => "batch.job.already_running",
            Self::JobInstanceAlreadyComplete { .. } => "batch.job.already_complete",
            Self::JobRestart(_) => "batch.job.restart",
            Self::StartLimitExceeded { .. } => "batch.step.start_limit",
            Self::PartitionFailed { .. } => "batch.partition",
            Self::NoSuchJob(_) | Self::NoSuchJobExecution(_) => "batch.not_found",
            Self::UnexpectedJobState { .. } => "batch.job.state",
            Self::Internal(_) => "batch.internal",
        }
    }
}

/// A failure raised by a reader, processor, writer or tasklet.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("[{kind}] {message}")]
pub struct ItemError {
    /// Dotted failure kind, e.g. `io.timeout`.
    pub kind: String,
    /// Human readable message.
    pub message: String,
}

impl ItemError {
    /// Creates a new item error.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Creates the error a reader raises when it is exhausted.
    #[must_use]
    pub fn end_of_stream(message: impl Into<String>) -> Self {
        Self::new(END_OF_STREAM_KIND, message)
    }

    /// Returns true if this error is the reserved end-of-stream kind.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        kind_matches(END_OF_STREAM_KIND, &self.kind)
    }

    /// Returns true if this error's kind is `rule` or one of its descendants.
    #[must_use]
    pub fn is_kind(&self, rule: &str) -> bool {
        kind_matches(rule, &self.kind)
    }
}

impl FailureKind for ItemError {
    fn failure_kind(&self) -> &str {
        &self.kind
    }
}

/// Errors raised by a ledger store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// A referenced entity does not exist.
    #[error("{entity} {id} not found in ledger")]
    NotFound {
        /// Entity type, e.g. `job_execution`.
        entity: &'static str,
        /// The missing id.
        id: u64,
    },

    /// A job instance with the same name and key already exists.
    #[error("Job instance '{job_name}' with key {job_key} already exists")]
    DuplicateInstance {
        /// The job name.
        job_name: String,
        /// The job key.
        job_key: String,
    },

    /// A non-terminal execution already exists for the instance.
    #[error("Job instance {instance_id} already has a running execution ({execution_id})")]
    RunningExecutionExists {
        /// The job instance id.
        instance_id: u64,
        /// The running execution id.
        execution_id: u64,
    },

    /// The storage backend failed.
    #[error("Ledger backend failure: {0}")]
    Backend(String),
}

/// Metadata about a validation error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ValidationErrorInfo {
    /// Error code (e.g., "CONFIG-001-COMMIT_INTERVAL").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ValidationErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::Value::String(self.code.clone()));
        map.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::Value::String(hint.clone()));
        }
        if !self.context.is_empty() {
            let context_map: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context_map));
        }
        map
    }
}

/// Error raised when a configuration value or job parameter set is invalid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ConfigValidationError {
    /// The error message.
    pub message: String,
    /// Optional diagnostic info.
    pub error_info: Option<ValidationErrorInfo>,
}

impl ConfigValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_info: None,
        }
    }

    /// Creates a validation error with a diagnostic code.
    #[must_use]
    pub fn with_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error_info: Some(ValidationErrorInfo::new(code, message.clone())),
            message,
        }
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ValidationErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the diagnostic code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|i| i.code.as_str())
    }
}

/// Error raised when a flow definition is invalid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FlowValidationError {
    /// The error message.
    pub message: String,
    /// The states involved in the error.
    pub states: Vec<String>,
}

impl FlowValidationError {
    /// Creates a new flow validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            states: Vec::new(),
        }
    }

    /// Sets the states involved.
    #[must_use]
    pub fn with_states(mut self, states: Vec<String>) -> Self {
        self.states = states;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_exact_and_descendants() {
        assert!(kind_matches("io", "io"));
        assert!(kind_matches("io", "io.timeout"));
        assert!(kind_matches("io.disk", "io.disk.full"));
        assert!(!kind_matches("io", "iox"));
        assert!(!kind_matches("io", "iox.timeout"));
        assert!(!kind_matches("io.timeout", "io"));
    }

    #[test]
    fn test_item_error_display() {
        let err = ItemError::new("parse.number", "not a number: abc");
        assert_eq!(err.to_string(), "[parse.number] not a number: abc");
        assert!(err.is_kind("parse"));
    }

    #[test]
    fn test_end_of_stream() {
        let err = ItemError::end_of_stream("no more lines");
        assert!(err.is_end_of_stream());
        assert!(!ItemError::new("io", "x").is_end_of_stream());
    }

    #[test]
    fn test_batch_error_kind() {
        let err = BatchError::from(ItemError::new("db.deadlock", "boom"));
        assert_eq!(err.failure_kind(), "db.deadlock");

        let err = BatchError::from(LedgerError::Backend("disk gone".into()));
        assert!(err.is_ledger());
        assert_eq!(err.failure_kind(), "batch.ledger");
    }

    #[test]
    fn test_validation_error_code_in_dict() {
        let err = BatchError::from(ConfigValidationError::with_code(
            "CONFIG-001-COMMIT_INTERVAL",
            "commit interval must be at least 1",
        ));
        let dict = err.to_dict();
        assert_eq!(dict["kind"], "batch.validation");
        assert_eq!(dict["error_info"]["code"], "CONFIG-001-COMMIT_INTERVAL");
    }

    #[test]
    fn test_skip_limit_exceeded_message() {
        let err = BatchError::SkipLimitExceeded {
            limit: 1,
            source: ItemError::new("bad.record", "row 7"),
        };
        assert_eq!(err.to_string(), "Skip limit of 1 exceeded: [bad.record] row 7");
    }
}
