//! Lifecycle hook traits for runs and agents.
//!
//! Two subscriber layers observe a run:
//!
//! - [`RunHooks`] — run-level hooks that see **all** agents in a run; every
//!   method receives the agent name.
//! - [`AgentHooks`] — per-agent hooks bound to one agent configuration;
//!   the agent is implicit.
//!
//! Both traits provide default no-op implementations for every method, so
//! subscribers override only the events they care about. Handlers are
//! fire-and-forget: they return nothing and cannot steer the run.

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::ToolCallRecord;
use crate::error::Error;
use crate::message::Message;
use crate::model::ModelResponse;

use super::context::RunContext;

/// A shared, thread-safe [`RunHooks`] trait object.
pub type SharedRunHooks = std::sync::Arc<dyn RunHooks>;

/// A shared, thread-safe [`AgentHooks`] trait object.
pub type SharedAgentHooks = std::sync::Arc<dyn AgentHooks>;

/// Run-level lifecycle hooks, observing every agent in the run.
#[async_trait]
pub trait RunHooks: Send + Sync {
    /// Called when an agent begins execution (at run start, and again for
    /// the callee after each transfer).
    async fn on_agent_start(&self, _ctx: &RunContext, _agent_name: &str) {}

    /// Called after an agent produces the run's final output.
    async fn on_agent_end(&self, _ctx: &RunContext, _agent_name: &str, _output: &Value) {}

    /// Called just before invoking the model.
    async fn on_model_start(
        &self,
        _ctx: &RunContext,
        _agent_name: &str,
        _system_prompt: Option<&str>,
        _messages: &[Message],
    ) {
    }

    /// Called immediately after the model returns a response.
    async fn on_model_end(&self, _ctx: &RunContext, _agent_name: &str, _response: &ModelResponse) {}

    /// Called immediately before a tool is invoked.
    async fn on_tool_start(&self, _ctx: &RunContext, _agent_name: &str, _tool_name: &str) {}

    /// Called immediately after a tool completes, with the full record
    /// (result or error, and wall-clock duration).
    async fn on_tool_end(
        &self,
        _ctx: &RunContext,
        _agent_name: &str,
        _tool_name: &str,
        _record: &ToolCallRecord,
    ) {
    }

    /// Called when control is transferred from one agent to another.
    async fn on_transfer(
        &self,
        _ctx: &RunContext,
        _from_agent: &str,
        _to_agent: &str,
        _reason: Option<&str>,
    ) {
    }

    /// Called for non-fatal anomalies (tool name collisions, dropped
    /// transfer signals).
    async fn on_warning(&self, _ctx: &RunContext, _agent_name: &str, _message: &str) {}

    /// Called when a fatal error ends the run.
    async fn on_error(&self, _ctx: &RunContext, _agent_name: &str, _error: &Error) {}
}

/// Per-agent lifecycle hooks, bound to one agent configuration.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Called when this agent begins execution.
    async fn on_start(&self, _ctx: &RunContext) {}

    /// Called after this agent produces the run's final output.
    async fn on_end(&self, _ctx: &RunContext, _output: &Value) {}

    /// Called just before invoking the model for this agent.
    async fn on_model_start(
        &self,
        _ctx: &RunContext,
        _system_prompt: Option<&str>,
        _messages: &[Message],
    ) {
    }

    /// Called immediately after the model returns a response for this agent.
    async fn on_model_end(&self, _ctx: &RunContext, _response: &ModelResponse) {}

    /// Called immediately before a tool is invoked by this agent.
    async fn on_tool_start(&self, _ctx: &RunContext, _tool_name: &str) {}

    /// Called immediately after a tool completes for this agent.
    async fn on_tool_end(&self, _ctx: &RunContext, _tool_name: &str, _record: &ToolCallRecord) {}

    /// Called when this agent hands off control to another agent.
    async fn on_transfer(&self, _ctx: &RunContext, _to_agent: &str, _reason: Option<&str>) {}

    /// Called for non-fatal anomalies raised while this agent is current.
    async fn on_warning(&self, _ctx: &RunContext, _message: &str) {}

    /// Called when a fatal error ends the run under this agent.
    async fn on_error(&self, _ctx: &RunContext, _error: &Error) {}
}

/// A [`RunHooks`] implementation that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunHooks;

#[async_trait]
impl RunHooks for NoopRunHooks {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHooks {
        agent_start: AtomicUsize,
        tool_end: AtomicUsize,
        transfer: AtomicUsize,
    }

    #[async_trait]
    impl RunHooks for CountingHooks {
        async fn on_agent_start(&self, _ctx: &RunContext, _agent_name: &str) {
            self.agent_start.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_tool_end(
            &self,
            _ctx: &RunContext,
            _agent_name: &str,
            _tool_name: &str,
            _record: &ToolCallRecord,
        ) {
            self.tool_end.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_transfer(
            &self,
            _ctx: &RunContext,
            _from: &str,
            _to: &str,
            _reason: Option<&str>,
        ) {
            self.transfer.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn overridden_methods_fire_and_defaults_are_noops() {
        let hooks = Arc::new(CountingHooks::default());
        let ctx = RunContext::default();

        hooks.on_agent_start(&ctx, "a").await;
        hooks.on_transfer(&ctx, "a", "b", Some("why")).await;
        // Default no-op should not panic or count.
        hooks.on_warning(&ctx, "a", "collision").await;

        assert_eq!(hooks.agent_start.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.transfer.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.tool_end.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn noop_hooks_are_usable_as_trait_objects() {
        let hooks: SharedRunHooks = Arc::new(NoopRunHooks);
        hooks.on_agent_start(&RunContext::default(), "a").await;
    }
}
