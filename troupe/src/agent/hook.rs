//! Hook dispatch bridge for the execution engine.
//!
//! [`HookPair`] combines run-level [`RunHooks`] and the current agent's
//! optional [`AgentHooks`] into a single dispatcher, firing both layers
//! concurrently via [`tokio::join!`]. Rebuilt whenever the current agent
//! changes.

use serde_json::Value;

use crate::agent::ToolCallRecord;
use crate::callback::{AgentHooks, RunContext, RunHooks};
use crate::error::Error;
use crate::message::Message;
use crate::model::ModelResponse;

pub(super) struct HookPair<'a> {
    run: &'a dyn RunHooks,
    agent: Option<&'a dyn AgentHooks>,
    name: &'a str,
}

impl<'a> HookPair<'a> {
    pub fn new(run: &'a dyn RunHooks, agent: Option<&'a dyn AgentHooks>, name: &'a str) -> Self {
        Self { run, agent, name }
    }

    pub async fn agent_start(&self, ctx: &RunContext) {
        if let Some(ah) = self.agent {
            tokio::join!(self.run.on_agent_start(ctx, self.name), ah.on_start(ctx));
        } else {
            self.run.on_agent_start(ctx, self.name).await;
        }
    }

    pub async fn agent_end(&self, ctx: &RunContext, output: &Value) {
        if let Some(ah) = self.agent {
            tokio::join!(
                self.run.on_agent_end(ctx, self.name, output),
                ah.on_end(ctx, output)
            );
        } else {
            self.run.on_agent_end(ctx, self.name, output).await;
        }
    }

    pub async fn model_start(&self, ctx: &RunContext, system: Option<&str>, msgs: &[Message]) {
        if let Some(ah) = self.agent {
            tokio::join!(
                self.run.on_model_start(ctx, self.name, system, msgs),
                ah.on_model_start(ctx, system, msgs)
            );
        } else {
            self.run.on_model_start(ctx, self.name, system, msgs).await;
        }
    }

    pub async fn model_end(&self, ctx: &RunContext, response: &ModelResponse) {
        if let Some(ah) = self.agent {
            tokio::join!(
                self.run.on_model_end(ctx, self.name, response),
                ah.on_model_end(ctx, response)
            );
        } else {
            self.run.on_model_end(ctx, self.name, response).await;
        }
    }

    pub async fn tool_start(&self, ctx: &RunContext, tool_name: &str) {
        if let Some(ah) = self.agent {
            tokio::join!(
                self.run.on_tool_start(ctx, self.name, tool_name),
                ah.on_tool_start(ctx, tool_name)
            );
        } else {
            self.run.on_tool_start(ctx, self.name, tool_name).await;
        }
    }

    pub async fn tool_end(&self, ctx: &RunContext, tool_name: &str, record: &ToolCallRecord) {
        if let Some(ah) = self.agent {
            tokio::join!(
                self.run.on_tool_end(ctx, self.name, tool_name, record),
                ah.on_tool_end(ctx, tool_name, record)
            );
        } else {
            self.run
                .on_tool_end(ctx, self.name, tool_name, record)
                .await;
        }
    }

    pub async fn transfer(&self, ctx: &RunContext, to_agent: &str, reason: Option<&str>) {
        if let Some(ah) = self.agent {
            tokio::join!(
                self.run.on_transfer(ctx, self.name, to_agent, reason),
                ah.on_transfer(ctx, to_agent, reason)
            );
        } else {
            self.run.on_transfer(ctx, self.name, to_agent, reason).await;
        }
    }

    pub async fn warning(&self, ctx: &RunContext, message: &str) {
        if let Some(ah) = self.agent {
            tokio::join!(
                self.run.on_warning(ctx, self.name, message),
                ah.on_warning(ctx, message)
            );
        } else {
            self.run.on_warning(ctx, self.name, message).await;
        }
    }

    pub async fn error(&self, ctx: &RunContext, err: &Error) {
        if let Some(ah) = self.agent {
            tokio::join!(self.run.on_error(ctx, self.name, err), ah.on_error(ctx, err));
        } else {
            self.run.on_error(ctx, self.name, err).await;
        }
    }
}
