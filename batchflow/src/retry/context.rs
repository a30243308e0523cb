//! Per-operation retry state.

use std::time::{Duration, Instant};

use crate::errors::FailureKind;

/// State of one logical retryable operation.
///
/// Nested operations get their own context linked to a snapshot of the
/// enclosing one, so inner retries never touch the outer counts.
#[derive(Debug, Clone)]
pub struct RetryContext {
    attempts: usize,
    retry_count: usize,
    last_error: Option<String>,
    last_kind: Option<String>,
    started: Instant,
    exhausted: bool,
    parent: Option<Box<RetryContext>>,
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryContext {
    /// Opens a top-level context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            attempts: 0,
            retry_count: 0,
            last_error: None,
            last_kind: None,
            started: Instant::now(),
            exhausted: false,
            parent: None,
        }
    }

    /// Opens a context nested inside `parent`.
    #[must_use]
    pub fn nested(parent: &Self) -> Self {
        Self {
            parent: Some(Box::new(parent.clone())),
            ..Self::new()
        }
    }

    /// Number of times the operation has been invoked.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    /// Number of failures registered so far.
    #[must_use]
    pub const fn retry_count(&self) -> usize {
        self.retry_count
    }

    /// Message of the most recent failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Kind of the most recent failure.
    #[must_use]
    pub fn last_kind(&self) -> Option<&str> {
        self.last_kind.as_deref()
    }

    /// Time since the context was opened.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Returns true once the policy refused further attempts.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Returns the enclosing context, if nested.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    /// Records the start of an attempt.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Records a failed attempt.
    pub fn register_failure<E: FailureKind + std::fmt::Display>(&mut self, error: &E) {
        self.retry_count += 1;
        self.last_kind = Some(error.failure_kind().to_string());
        self.last_error = Some(error.to_string());
    }

    /// Marks the operation as out of attempts.
    pub fn set_exhausted(&mut self) {
        self.exhausted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ItemError;

    #[test]
    fn test_register_failure() {
        let mut ctx = RetryContext::new();
        ctx.begin_attempt();
        ctx.register_failure(&ItemError::new("net.reset", "peer reset"));
        assert_eq!(ctx.attempts(), 1);
        assert_eq!(ctx.retry_count(), 1);
        assert_eq!(ctx.last_kind(), Some("net.reset"));
        assert_eq!(ctx.last_error(), Some("[net.reset] peer reset"));
    }

    #[test]
    fn test_nested_context_is_independent() {
        let mut outer = RetryContext::new();
        outer.register_failure(&ItemError::new("a", "x"));
        let mut inner = RetryContext::nested(&outer);
        inner.register_failure(&ItemError::new("b", "y"));
        inner.register_failure(&ItemError::new("b", "y"));

        assert_eq!(outer.retry_count(), 1);
        assert_eq!(inner.retry_count(), 2);
        assert_eq!(inner.parent().map(RetryContext::retry_count), Some(1));
    }
}
