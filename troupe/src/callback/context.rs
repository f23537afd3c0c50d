//! Run-scoped context passed to tools, predicates, and hooks.
//!
//! [`RunContext`] is the wrapper the runner threads through every tool
//! invocation, dynamic instruction, enablement predicate, and hook: the
//! user-provided context value, the currently executing agent, a snapshot
//! of the working message list, the usage tracker, and the run's
//! cancellation signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use crate::message::Message;
use crate::usage::UsageTracker;

/// Single-shot cancellation signal for a run.
///
/// Cloning shares the underlying flag. The runner checks it before each
/// model call; tools that wish to honor it read it from the run context.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    /// Create a new, unsignalled cancel signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Irreversible.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context passed into every tool invocation and dynamic predicate.
///
/// Hooks and tools receive `&RunContext`: they observe the run but do not
/// steer it. The runner refreshes the snapshot fields (agent, step,
/// messages, usage) at the top of each step.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    context: Value,
    agent_name: String,
    step: u64,
    messages: Vec<Message>,
    usage: UsageTracker,
    cancel: CancelSignal,
}

impl RunContext {
    /// Create a new run context around a user-provided context value.
    #[must_use]
    pub fn new(context: Value) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    /// The opaque user-provided context value.
    #[must_use]
    pub const fn context(&self) -> &Value {
        &self.context
    }

    /// Name of the currently executing agent.
    #[must_use]
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Current step number (1-indexed during execution, 0 before start).
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Snapshot of the current working message list.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Snapshot of the run's usage tracker.
    #[must_use]
    pub const fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// The run's cancellation signal.
    #[must_use]
    pub const fn cancel(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Check whether the run was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn set_agent_name(&mut self, name: impl Into<String>) {
        self.agent_name = name.into();
    }

    pub(crate) const fn set_step(&mut self, step: u64) {
        self.step = step;
    }

    pub(crate) fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub(crate) const fn set_usage(&mut self, usage: UsageTracker) {
        self.usage = usage;
    }
}
