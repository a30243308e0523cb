//! Chunk step configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{ConfigValidationError, ValidationErrorInfo};
use crate::retry::{millis, BackOffPolicy};

/// Tunables of a chunk-oriented step.
///
/// Deserializable, so a job definition can carry it as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkStepConfig {
    /// Items per chunk transaction.
    pub commit_interval: usize,
    /// Optional cap on how long a chunk may spend reading.
    pub chunk_timeout_ms: Option<u64>,
    /// Skips allowed per step execution.
    pub skip_limit: usize,
    /// Kinds skipped on failure.
    pub skippable_kinds: Vec<String>,
    /// Kinds retried on failure.
    pub retryable_kinds: Vec<String>,
    /// Kinds that always fail the step.
    pub fatal_kinds: Vec<String>,
    /// Attempts per item or chunk, first attempt included.
    pub retry_limit: usize,
    /// Delay between attempts.
    pub backoff: BackOffPolicy,
    /// Starts allowed per job instance.
    pub start_limit: Option<usize>,
    /// Rerun the step on restart even if it completed.
    pub allow_start_if_complete: bool,
}

impl Default for ChunkStepConfig {
    fn default() -> Self {
        Self {
            commit_interval: 10,
            chunk_timeout_ms: None,
            skip_limit: 0,
            skippable_kinds: Vec::new(),
            retryable_kinds: Vec::new(),
            fatal_kinds: Vec::new(),
            retry_limit: 1,
            backoff: BackOffPolicy::None,
            start_limit: None,
            allow_start_if_complete: false,
        }
    }
}

impl ChunkStepConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the commit interval.
    #[must_use]
    pub const fn with_commit_interval(mut self, interval: usize) -> Self {
        self.commit_interval = interval;
        self
    }

    /// Sets the chunk read timeout.
    #[must_use]
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout_ms = Some(millis(timeout));
        self
    }

    /// Sets the skip limit.
    #[must_use]
    pub const fn with_skip_limit(mut self, limit: usize) -> Self {
        self.skip_limit = limit;
        self
    }

    /// Adds a skippable kind.
    #[must_use]
    pub fn with_skippable(mut self, kind: impl Into<String>) -> Self {
        self.skippable_kinds.push(kind.into());
        self
    }

    /// Adds a retryable kind.
    #[must_use]
    pub fn with_retryable(mut self, kind: impl Into<String>) -> Self {
        self.retryable_kinds.push(kind.into());
        self
    }

    /// Adds a fatal kind.
    #[must_use]
    pub fn with_fatal(mut self, kind: impl Into<String>) -> Self {
        self.fatal_kinds.push(kind.into());
        self
    }

    /// Sets the attempt limit.
    #[must_use]
    pub const fn with_retry_limit(mut self, limit: usize) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Sets the back-off policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackOffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the start limit.
    #[must_use]
    pub const fn with_start_limit(mut self, limit: usize) -> Self {
        self.start_limit = Some(limit);
        self
    }

    /// Reruns the step on restart even when complete.
    #[must_use]
    pub const fn with_allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    /// Chunk timeout as a duration.
    #[must_use]
    pub fn chunk_timeout(&self) -> Option<Duration> {
        self.chunk_timeout_ms.map(Duration::from_millis)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.commit_interval == 0 {
            return Err(invalid(
                "CONFIG-001-COMMIT_INTERVAL",
                "commit_interval must be at least 1",
                "Set commit_interval to the number of items per transaction",
            ));
        }
        if self.retry_limit == 0 {
            return Err(invalid(
                "CONFIG-002-RETRY_LIMIT",
                "retry_limit must be at least 1",
                "retry_limit counts attempts including the first; use 1 to disable retries",
            ));
        }
        if self.chunk_timeout_ms == Some(0) {
            return Err(invalid(
                "CONFIG-003-CHUNK_TIMEOUT",
                "chunk_timeout_ms must be positive",
                "Remove chunk_timeout_ms or set it above zero",
            ));
        }
        if self.start_limit == Some(0) {
            return Err(invalid(
                "CONFIG-004-START_LIMIT",
                "start_limit must be at least 1",
                "Remove start_limit to allow unlimited starts",
            ));
        }
        let all_kinds = self
            .skippable_kinds
            .iter()
            .chain(&self.retryable_kinds)
            .chain(&self.fatal_kinds);
        for kind in all_kinds {
            if kind.is_empty() || kind.split('.').any(str::is_empty) {
                return Err(ConfigValidationError::with_code(
                    "CONFIG-005-KIND",
                    format!("invalid failure kind '{kind}'"),
                )
                .with_error_info(
                    ValidationErrorInfo::new("CONFIG-005-KIND", "invalid failure kind")
                        .with_fix_hint("Kinds are non-empty dotted names such as 'io.timeout'")
                        .with_context_entry("kind", kind.clone()),
                ));
            }
        }
        for kind in &self.skippable_kinds {
            if self.fatal_kinds.contains(kind) {
                return Err(ConfigValidationError::with_code(
                    "CONFIG-006-CONFLICTING_KIND",
                    format!("kind '{kind}' is both skippable and fatal"),
                ));
            }
        }
        if let BackOffPolicy::Exponential { multiplier, .. }
        | BackOffPolicy::ExponentialRandom { multiplier, .. } = self.backoff
        {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(invalid(
                    "CONFIG-007-BACKOFF",
                    "back-off multiplier must be a finite number of at least 1",
                    "Use a multiplier such as 2.0",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(code: &str, summary: &str, hint: &str) -> ConfigValidationError {
    ConfigValidationError::new(summary)
        .with_error_info(ValidationErrorInfo::new(code, summary).with_fix_hint(hint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ChunkStepConfig::default().validate().is_ok());
    }

    #[test]
    fn test_chunk_timeout_saturates() {
        let config = ChunkStepConfig::new().with_chunk_timeout(Duration::MAX);
        assert_eq!(config.chunk_timeout_ms, Some(u64::MAX));
    }

    #[test]
    fn test_rejects_zero_commit_interval() {
        let err = ChunkStepConfig::new().with_commit_interval(0).validate().unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-001-COMMIT_INTERVAL"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            (ChunkStepConfig::new().with_retry_limit(0), "CONFIG-002-RETRY_LIMIT"),
            (
                ChunkStepConfig::new().with_chunk_timeout(Duration::ZERO),
                "CONFIG-003-CHUNK_TIMEOUT",
            ),
            (ChunkStepConfig::new().with_start_limit(0), "CONFIG-004-START_LIMIT"),
            (ChunkStepConfig::new().with_skippable("io..disk"), "CONFIG-005-KIND"),
            (
                ChunkStepConfig::new().with_skippable("io").with_fatal("io"),
                "CONFIG-006-CONFLICTING_KIND",
            ),
            (
                ChunkStepConfig::new().with_backoff(BackOffPolicy::exponential(
                    Duration::from_millis(1),
                    0.5,
                    Duration::from_millis(10),
                )),
                "CONFIG-007-BACKOFF",
            ),
        ];
        for (config, code) in cases {
            assert_eq!(config.validate().unwrap_err().code(), Some(code));
        }
    }

    #[test]
    fn test_deserializes_with_defaults() {
        let config: ChunkStepConfig = serde_json::from_value(serde_json::json!({
            "commit_interval": 2,
            "skippable_kinds": ["parse"],
            "skip_limit": 1,
            "backoff": {"type": "fixed", "period_ms": 100}
        }))
        .unwrap();
        assert_eq!(config.commit_interval, 2);
        assert_eq!(config.retry_limit, 1);
        assert_eq!(config.backoff.delay_for(1), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }
}
