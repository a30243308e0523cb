//! Flow state machine.
//!
//! A flow is a graph of states: steps, decisions, splits, nested flows and
//! end states. Each non-end state yields an exit code; the most specific
//! transition pattern matching that code picks the next state. The flow's
//! final status becomes the job's status.

mod builder;
mod definition;
mod state;
mod status;
mod transition;

pub use builder::{FlowBuilder, TransitionBuilder};
pub use definition::{Flow, RESTART_STATE_KEY_PREFIX};
pub use state::{EndState, FlowExecutor, JobExecutionDecider, State};
pub use status::FlowExecutionStatus;
pub use transition::{sort_by_specificity, Transition, TransitionPattern};
