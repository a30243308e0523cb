//! The iteration loop.

use async_trait::async_trait;
use std::fmt;

use super::context::{RepeatContext, RepeatStatus};
use super::policy::{
    CompletionPolicy, DefaultExceptionHandler, DefaultResultCompletionPolicy, ExceptionHandler,
};

/// One unit of repeated work.
#[async_trait]
pub trait RepeatCallback<E>: Send {
    /// Runs one iteration.
    async fn do_in_iteration(&mut self, context: &mut RepeatContext) -> Result<RepeatStatus, E>;
}

/// Repeats a callback until its completion policy says stop.
pub struct RepeatTemplate<E> {
    completion_policy: Box<dyn CompletionPolicy>,
    exception_handler: Box<dyn ExceptionHandler<E>>,
}

impl<E: Send + 'static> Default for RepeatTemplate<E> {
    fn default() -> Self {
        Self {
            completion_policy: Box::new(DefaultResultCompletionPolicy),
            exception_handler: Box::new(DefaultExceptionHandler),
        }
    }
}

impl<E> fmt::Debug for RepeatTemplate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatTemplate").finish_non_exhaustive()
    }
}

impl<E: Send + 'static> RepeatTemplate<E> {
    /// Creates a template that runs until an iteration returns FINISHED.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the completion policy.
    #[must_use]
    pub fn with_completion_policy(mut self, policy: impl CompletionPolicy + 'static) -> Self {
        self.completion_policy = Box::new(policy);
        self
    }

    /// Sets the exception handler.
    #[must_use]
    pub fn with_exception_handler(mut self, handler: impl ExceptionHandler<E> + 'static) -> Self {
        self.exception_handler = Box::new(handler);
        self
    }

    /// Runs the callback until the policy completes, an iteration returns
    /// FINISHED, or an error is not tolerated.
    ///
    /// Returns the status of the last iteration: CONTINUABLE when the loop
    /// stopped with work still available, FINISHED when the callback ran out
    /// of work. A tolerated error counts as a CONTINUABLE iteration.
    pub async fn iterate<C>(&self, callback: &mut C) -> Result<RepeatStatus, E>
    where
        C: RepeatCallback<E> + ?Sized,
    {
        let mut context = RepeatContext::new();
        let mut result = RepeatStatus::Continuable;

        while !(context.is_complete_only()
            || context.is_terminate_only()
            || self.completion_policy.is_complete(&context))
        {
            let outcome = callback.do_in_iteration(&mut context).await;
            context.increment_count();
            result = match outcome {
                Ok(status) => status,
                Err(error) => {
                    self.exception_handler.handle_exception(&mut context, error)?;
                    RepeatStatus::Continuable
                }
            };
            if self.completion_policy.is_complete_after(&context, result) {
                break;
            }
        }

        Ok(result)
    }
}
