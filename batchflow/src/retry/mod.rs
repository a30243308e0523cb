//! Retry engine: run work under a retry policy and a back-off policy.

mod backoff;
mod context;
mod policy;
mod template;

pub use backoff::BackOffPolicy;
pub(crate) use backoff::millis;
pub use context::RetryContext;
pub use policy::{
    AlwaysRetryPolicy, CompositeRetryPolicy, NeverRetryPolicy, RetryPolicy, SimpleRetryPolicy,
    TimeoutRetryPolicy,
};
pub use template::{RetryDecision, RetryOutcome, RetryTemplate};
