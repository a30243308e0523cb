//! Running work under a retry policy.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::backoff::BackOffPolicy;
use super::context::RetryContext;
use super::policy::{RetryPolicy, SimpleRetryPolicy};
use crate::errors::FailureKind;

/// Outcome of asking the policy about a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay.
    Retry(Duration),
    /// The failure is retryable but no attempts remain.
    Exhausted,
    /// The failure is not retryable.
    NotRetryable,
}

/// Result of a retried operation together with its final context.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// The final result.
    pub result: Result<T, E>,
    /// The context after the last attempt.
    pub context: RetryContext,
}

/// Runs work under a retry policy and back-off policy.
#[derive(Clone)]
pub struct RetryTemplate {
    retry_policy: Arc<dyn RetryPolicy>,
    backoff: BackOffPolicy,
}

impl Default for RetryTemplate {
    fn default() -> Self {
        Self {
            retry_policy: Arc::new(SimpleRetryPolicy::default()),
            backoff: BackOffPolicy::None,
        }
    }
}

impl fmt::Debug for RetryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTemplate")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RetryTemplate {
    /// Creates a template with three attempts and no back-off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    /// Sets a shared retry policy.
    #[must_use]
    pub fn with_shared_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the back-off policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackOffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &dyn RetryPolicy {
        self.retry_policy.as_ref()
    }

    /// Returns the back-off policy.
    #[must_use]
    pub const fn backoff(&self) -> BackOffPolicy {
        self.backoff
    }

    /// Decides what to do after the failure just registered in `context`.
    #[must_use]
    pub fn decide(&self, context: &RetryContext) -> RetryDecision {
        if let Some(kind) = context.last_kind() {
            if !self.retry_policy.is_retryable(kind) {
                return RetryDecision::NotRetryable;
            }
        }
        if self.retry_policy.can_retry(context) {
            RetryDecision::Retry(self.backoff.delay_for(context.retry_count()))
        } else {
            RetryDecision::Exhausted
        }
    }

    /// Runs `work` until it succeeds or the policy gives up, propagating the
    /// last failure.
    pub async fn execute<T, E, F, Fut>(&self, work: F) -> Result<T, E>
    where
        F: FnMut(&RetryContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureKind + fmt::Display,
    {
        self.execute_with_context(RetryContext::new(), work).await.result
    }

    /// Runs `work` and, if the policy gives up, hands the last failure to
    /// `recover` for a fallback result.
    pub async fn execute_with_recovery<T, E, F, Fut, R, RFut>(
        &self,
        work: F,
        recover: R,
    ) -> Result<T, E>
    where
        F: FnMut(&RetryContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(RetryContext, E) -> RFut,
        RFut: Future<Output = Result<T, E>>,
        E: FailureKind + fmt::Display,
    {
        let outcome = self.execute_with_context(RetryContext::new(), work).await;
        match outcome.result {
            Ok(value) => Ok(value),
            Err(error) => {
                debug!(
                    attempts = outcome.context.attempts(),
                    error = %error,
                    "Retry gave up, recovering"
                );
                recover(outcome.context, error).await
            }
        }
    }

    /// Runs `work` nested inside an enclosing retry operation.
    pub async fn execute_nested<T, E, F, Fut>(&self, parent: &RetryContext, work: F) -> RetryOutcome<T, E>
    where
        F: FnMut(&RetryContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureKind + fmt::Display,
    {
        self.execute_with_context(RetryContext::nested(parent), work)
            .await
    }

    /// Runs `work` in the given context and returns the result together with
    /// the final context.
    pub async fn execute_with_context<T, E, F, Fut>(
        &self,
        mut context: RetryContext,
        mut work: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(&RetryContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureKind + fmt::Display,
    {
        loop {
            context.begin_attempt();
            match work(&context).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        context,
                    }
                }
                Err(error) => {
                    context.register_failure(&error);
                    match self.decide(&context) {
                        RetryDecision::Retry(delay) => {
                            debug!(
                                attempt = context.attempts(),
                                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                error = %error,
                                "Retrying after error"
                            );
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                        }
                        RetryDecision::Exhausted | RetryDecision::NotRetryable => {
                            context.set_exhausted();
                            warn!(
                                attempts = context.attempts(),
                                error = %error,
                                "Giving up after error"
                            );
                            return RetryOutcome {
                                result: Err(error),
                                context,
                            };
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ItemError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn flaky(failures: usize, counter: &Arc<AtomicUsize>) -> impl FnMut(&RetryContext) -> std::future::Ready<Result<&'static str, ItemError>> {
        let counter = Arc::clone(counter);
        move |_ctx| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            if call < failures {
                std::future::ready(Err(ItemError::new("net.timeout", format!("call {call}"))))
            } else {
                std::future::ready(Ok("done"))
            }
        }
    }

    #[tokio::test]
    async fn test_succeeds_within_limit_with_fixed_backoff() {
        let template = RetryTemplate::new()
            .with_retry_policy(SimpleRetryPolicy::new(3))
            .with_backoff(BackOffPolicy::fixed(Duration::from_millis(100)));
        let counter = Arc::new(AtomicUsize::new(0));

        let started = Instant::now();
        let outcome = template
            .execute_with_context(RetryContext::new(), flaky(2, &counter))
            .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.context.attempts(), 3);
        assert_eq!(outcome.context.retry_count(), 2);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_fails_when_limit_not_above_failures() {
        let template = RetryTemplate::new().with_retry_policy(SimpleRetryPolicy::new(2));
        let counter = Arc::new(AtomicUsize::new(0));
        let result = template.execute(flaky(2, &counter)).await;
        assert_eq!(result.unwrap_err().message, "call 1");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let template =
            RetryTemplate::new().with_retry_policy(SimpleRetryPolicy::with_retryable(5, ["db"]));
        let counter = Arc::new(AtomicUsize::new(0));
        let outcome = template
            .execute_with_context(RetryContext::new(), flaky(3, &counter))
            .await;
        assert!(outcome.result.is_err());
        assert!(outcome.context.is_exhausted());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovery_path() {
        let template = RetryTemplate::new().with_retry_policy(SimpleRetryPolicy::new(2));
        let counter = Arc::new(AtomicUsize::new(0));
        let result = template
            .execute_with_recovery(flaky(10, &counter), |ctx, _err| async move {
                assert_eq!(ctx.attempts(), 2);
                Ok::<_, ItemError>("fallback")
            })
            .await;
        assert_eq!(result.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn test_nested_retry_keeps_outer_count() {
        let template = RetryTemplate::new().with_retry_policy(SimpleRetryPolicy::new(3));
        let mut outer = RetryContext::new();
        outer.register_failure(&ItemError::new("io", "outer"));

        let counter = Arc::new(AtomicUsize::new(0));
        let inner = template.execute_nested(&outer, flaky(1, &counter)).await;
        assert!(inner.result.is_ok());
        assert_eq!(inner.context.retry_count(), 1);
        assert_eq!(inner.context.parent().map(RetryContext::retry_count), Some(1));
        assert_eq!(outer.retry_count(), 1);
    }

    #[test]
    fn test_decide() {
        let template = RetryTemplate::new()
            .with_retry_policy(SimpleRetryPolicy::with_retryable(2, ["io"]))
            .with_backoff(BackOffPolicy::fixed(Duration::from_millis(5)));
        let mut ctx = RetryContext::new();
        ctx.register_failure(&ItemError::new("io", "x"));
        assert_eq!(template.decide(&ctx), RetryDecision::Retry(Duration::from_millis(5)));
        ctx.register_failure(&ItemError::new("io", "x"));
        assert_eq!(template.decide(&ctx), RetryDecision::Exhausted);

        let mut ctx = RetryContext::new();
        ctx.register_failure(&ItemError::new("parse", "x"));
        assert_eq!(template.decide(&ctx), RetryDecision::NotRetryable);
    }
}
