//! Retry policies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::context::RetryContext;
use crate::core::KindClassifier;

/// Decides whether a failed operation may be attempted again.
pub trait RetryPolicy: Send + Sync {
    /// Returns true if another attempt is allowed given the failures
    /// registered in `context`. Always true before the first failure.
    fn can_retry(&self, context: &RetryContext) -> bool;

    /// Returns true if failures of `kind` are retryable at all, regardless of
    /// how many attempts remain.
    fn is_retryable(&self, _kind: &str) -> bool {
        true
    }
}

/// Retries classified kinds up to a maximum number of attempts.
///
/// `max_attempts` counts every invocation, the first included.
#[derive(Debug, Clone)]
pub struct SimpleRetryPolicy {
    max_attempts: usize,
    classifier: KindClassifier<bool>,
}

impl Default for SimpleRetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl SimpleRetryPolicy {
    /// Retries every kind up to `max_attempts` attempts.
    #[must_use]
    pub const fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            classifier: KindClassifier::new(true),
        }
    }

    /// Retries only the listed kinds (and their descendants).
    #[must_use]
    pub fn with_retryable<I, S>(max_attempts: usize, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            max_attempts,
            classifier: KindClassifier::new(false).with_rules(kinds, &true),
        }
    }

    /// Marks kinds as never retryable.
    #[must_use]
    pub fn with_non_retryable<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classifier = self.classifier.with_rules(kinds, &false);
        self
    }

    /// Returns the attempt limit.
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

impl RetryPolicy for SimpleRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        let retryable = context.last_kind().map_or(true, |k| self.classifier.classify(k));
        retryable && context.retry_count() < self.max_attempts
    }

    fn is_retryable(&self, kind: &str) -> bool {
        self.classifier.classify(kind)
    }
}

/// Allows exactly one attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetryPolicy;

impl RetryPolicy for NeverRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        context.retry_count() == 0
    }

    fn is_retryable(&self, _kind: &str) -> bool {
        false
    }
}

/// Retries forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetryPolicy;

impl RetryPolicy for AlwaysRetryPolicy {
    fn can_retry(&self, _context: &RetryContext) -> bool {
        true
    }
}

/// Retries until a time budget measured from the first attempt is spent.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutRetryPolicy {
    timeout: Duration,
}

impl TimeoutRetryPolicy {
    /// Creates a policy with the given budget.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RetryPolicy for TimeoutRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        context.elapsed() <= self.timeout
    }
}

/// Combines several policies.
///
/// Pessimistic (the default) retries only if every delegate allows it;
/// optimistic retries if any delegate does.
#[derive(Default)]
pub struct CompositeRetryPolicy {
    policies: Vec<Arc<dyn RetryPolicy>>,
    optimistic: bool,
}

impl CompositeRetryPolicy {
    /// Creates an empty pessimistic composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a delegate.
    #[must_use]
    pub fn with(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Switches to optimistic combination.
    #[must_use]
    pub const fn optimistic(mut self) -> Self {
        self.optimistic = true;
        self
    }
}

impl fmt::Debug for CompositeRetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeRetryPolicy")
            .field("policies", &self.policies.len())
            .field("optimistic", &self.optimistic)
            .finish()
    }
}

impl RetryPolicy for CompositeRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        if self.policies.is_empty() {
            return true;
        }
        if self.optimistic {
            self.policies.iter().any(|p| p.can_retry(context))
        } else {
            self.policies.iter().all(|p| p.can_retry(context))
        }
    }

    fn is_retryable(&self, kind: &str) -> bool {
        if self.optimistic {
            self.policies.iter().any(|p| p.is_retryable(kind))
        } else {
            self.policies.iter().all(|p| p.is_retryable(kind))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ItemError;

    fn failed(times: usize, kind: &str) -> RetryContext {
        let mut ctx = RetryContext::new();
        for _ in 0..times {
            ctx.register_failure(&ItemError::new(kind, "x"));
        }
        ctx
    }

    #[test]
    fn test_simple_policy_counts_attempts() {
        let policy = SimpleRetryPolicy::new(3);
        assert!(policy.can_retry(&RetryContext::new()));
        assert!(policy.can_retry(&failed(2, "io")));
        assert!(!policy.can_retry(&failed(3, "io")));
    }

    #[test]
    fn test_simple_policy_classifies_kinds() {
        let policy =
            SimpleRetryPolicy::with_retryable(5, ["io"]).with_non_retryable(["io.disk.full"]);
        assert!(policy.can_retry(&failed(1, "io.timeout")));
        assert!(!policy.can_retry(&failed(1, "io.disk.full")));
        assert!(!policy.can_retry(&failed(1, "parse")));
        assert!(!policy.is_retryable("parse"));
    }

    #[test]
    fn test_never_and_always() {
        assert!(NeverRetryPolicy.can_retry(&RetryContext::new()));
        assert!(!NeverRetryPolicy.can_retry(&failed(1, "io")));
        assert!(AlwaysRetryPolicy.can_retry(&failed(1000, "io")));
    }

    #[test]
    fn test_composite() {
        let pessimistic = CompositeRetryPolicy::new()
            .with(SimpleRetryPolicy::new(5))
            .with(NeverRetryPolicy);
        assert!(!pessimistic.can_retry(&failed(1, "io")));

        let optimistic = CompositeRetryPolicy::new()
            .with(SimpleRetryPolicy::new(5))
            .with(NeverRetryPolicy)
            .optimistic();
        assert!(optimistic.can_retry(&failed(1, "io")));
    }

    #[test]
    fn test_timeout_policy() {
        assert!(TimeoutRetryPolicy::new(Duration::from_secs(60)).can_retry(&failed(3, "io")));
        assert!(!TimeoutRetryPolicy::new(Duration::ZERO).can_retry(&{
            let ctx = failed(1, "io");
            std::thread::sleep(Duration::from_millis(2));
            ctx
        }));
    }
}
