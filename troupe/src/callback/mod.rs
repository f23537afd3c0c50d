//! Run context and lifecycle hook layer.
//!
//! See [`RunContext`] for the wrapper passed into tools and predicates,
//! and [`RunHooks`] / [`AgentHooks`] for the two subscriber layers.

mod context;
mod hooks;

pub use context::{CancelSignal, RunContext};
pub use hooks::{AgentHooks, NoopRunHooks, RunHooks, SharedAgentHooks, SharedRunHooks};
