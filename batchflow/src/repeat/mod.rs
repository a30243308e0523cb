//! Iteration engine: repeat a unit of work until a completion policy says
//! stop.

mod context;
mod policy;
mod template;

pub use context::{RepeatContext, RepeatStatus};
pub use policy::{
    CompletionPolicy, CompositeCompletionPolicy, DefaultExceptionHandler,
    DefaultResultCompletionPolicy, ExceptionHandler, SimpleCompletionPolicy,
    SimpleLimitExceptionHandler, TimeoutTerminationPolicy,
};
pub use template::{RepeatCallback, RepeatTemplate};
