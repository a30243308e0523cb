//! Completion policies and exception handlers for the iteration engine.

use std::fmt;
use std::time::Duration;
use tracing::warn;

use super::context::{RepeatContext, RepeatStatus};

/// Decides when an iteration loop is complete.
pub trait CompletionPolicy: Send + Sync {
    /// Returns true if no further iteration should start.
    fn is_complete(&self, context: &RepeatContext) -> bool;

    /// Returns true if the loop is complete after an iteration produced
    /// `result`. A FINISHED result always completes the loop.
    fn is_complete_after(&self, context: &RepeatContext, result: RepeatStatus) -> bool {
        result == RepeatStatus::Finished || self.is_complete(context)
    }
}

/// Completes only when an iteration returns FINISHED.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResultCompletionPolicy;

impl CompletionPolicy for DefaultResultCompletionPolicy {
    fn is_complete(&self, _context: &RepeatContext) -> bool {
        false
    }
}

/// Completes after a fixed number of iterations.
#[derive(Debug, Clone, Copy)]
pub struct SimpleCompletionPolicy {
    chunk_size: usize,
}

impl SimpleCompletionPolicy {
    /// Creates a policy completing after `chunk_size` iterations.
    #[must_use]
    pub const fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Returns the configured size.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl CompletionPolicy for SimpleCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        context.count() >= self.chunk_size
    }
}

/// Completes once the loop has been running for longer than a timeout.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutTerminationPolicy {
    timeout: Duration,
}

impl TimeoutTerminationPolicy {
    /// Creates a policy with the given timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CompletionPolicy for TimeoutTerminationPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        context.elapsed() >= self.timeout
    }
}

/// Completes as soon as any of its delegates is complete.
#[derive(Default)]
pub struct CompositeCompletionPolicy {
    policies: Vec<Box<dyn CompletionPolicy>>,
}

impl CompositeCompletionPolicy {
    /// Creates an empty composite, which never completes on its own.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a delegate.
    #[must_use]
    pub fn with(mut self, policy: impl CompletionPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }
}

impl fmt::Debug for CompositeCompletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeCompletionPolicy")
            .field("policies", &self.policies.len())
            .finish()
    }
}

impl CompletionPolicy for CompositeCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        self.policies.iter().any(|p| p.is_complete(context))
    }

    fn is_complete_after(&self, context: &RepeatContext, result: RepeatStatus) -> bool {
        self.policies
            .iter()
            .any(|p| p.is_complete_after(context, result))
    }
}

/// Decides whether an iteration failure aborts the loop.
pub trait ExceptionHandler<E>: Send + Sync {
    /// Returns `Ok` to tolerate the error and keep iterating, or hands the
    /// error back to abort.
    fn handle_exception(&self, context: &mut RepeatContext, error: E) -> Result<(), E>;
}

/// Aborts on the first error.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionHandler;

impl<E> ExceptionHandler<E> for DefaultExceptionHandler {
    fn handle_exception(&self, _context: &mut RepeatContext, error: E) -> Result<(), E> {
        Err(error)
    }
}

/// Tolerates up to `limit` errors per loop, then aborts.
#[derive(Debug, Clone, Copy)]
pub struct SimpleLimitExceptionHandler {
    limit: usize,
}

impl SimpleLimitExceptionHandler {
    /// Creates a handler tolerating `limit` errors.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl<E: fmt::Display> ExceptionHandler<E> for SimpleLimitExceptionHandler {
    fn handle_exception(&self, context: &mut RepeatContext, error: E) -> Result<(), E> {
        context.record_error();
        if context.error_count() > self.limit {
            return Err(error);
        }
        warn!(
            errors = context.error_count(),
            limit = self.limit,
            error = %error,
            "Tolerating iteration failure"
        );
        Ok(())
    }
}
