//! Agents, the agent registry, and the execution engine.
//!
//! An [`Agent`] is an immutable, named configuration: instructions, a model
//! reference, tools, transfer targets, guardrails, model settings, and a
//! step budget. Agents live in an [`AgentRegistry`] arena and reference
//! each other by [`AgentId`], so cyclic coordinator ↔ specialist
//! topologies need no shared ownership and run snapshots stay trivially
//! serializable.
//!
//! The [`Runner`] drives a registered agent through the execution loop;
//! see [`runner`] for the loop itself.

mod dispatch;
mod events;
mod hook;
mod result;
mod runner;
mod state;
mod streaming;

pub use dispatch::{OutcomeKind, ToolOutcome};
pub use events::RunEvent;
pub use result::{
    AgentMetrics, RunError, RunErrorKind, RunMetadata, RunResult, RunStatus, StepResult,
    ToolCallRecord,
};
pub use runner::{RunConfig, Runner};
pub use state::{PendingApproval, PendingStep, RunSnapshot};
pub use streaming::StreamedRun;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::callback::{RunContext, SharedAgentHooks};
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::model::{Model, ModelSettings};
use crate::schema::OutputSchema;
use crate::tool::{DynTool, SharedTool, Tool};

/// Default per-agent step budget.
pub const DEFAULT_MAX_STEPS: u64 = 20;

/// Index of an agent inside an [`AgentRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub(crate) usize);

/// Agent instructions: a literal string or a function of the run context.
#[derive(Clone)]
pub enum Instructions {
    /// A literal system prompt.
    Static(String),
    /// Resolved against the run context before each model call.
    Dynamic(Arc<dyn Fn(&RunContext) -> String + Send + Sync>),
}

impl Instructions {
    /// Resolve the instructions for the given context.
    #[must_use]
    pub fn resolve(&self, context: &RunContext) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Dynamic(f) => f(context),
        }
    }
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Named, immutable agent configuration.
///
/// Mutating an agent's tools or transfer targets mid-run is undefined
/// behavior; all wiring happens before the first run, either through the
/// builder or [`AgentRegistry::link`].
pub struct Agent {
    name: String,
    instructions: Instructions,
    model: Option<Arc<dyn Model>>,
    settings: ModelSettings,
    tools: Vec<SharedTool>,
    handoffs: Vec<AgentId>,
    transfer_description: Option<String>,
    output_schema: Option<OutputSchema>,
    input_guardrails: Vec<InputGuardrail>,
    output_guardrails: Vec<OutputGuardrail>,
    max_steps: u64,
    hooks: Option<SharedAgentHooks>,
}

impl Agent {
    /// Create a new agent builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    /// The agent's name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The agent's model settings.
    #[inline]
    #[must_use]
    pub const fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// The agent's per-agent step budget.
    #[inline]
    #[must_use]
    pub const fn max_steps(&self) -> u64 {
        self.max_steps
    }

    /// The agent's tools, in declaration order.
    #[must_use]
    pub fn tools(&self) -> &[SharedTool] {
        &self.tools
    }

    /// Ids of the sub-agents this agent may transfer to.
    #[must_use]
    pub fn handoffs(&self) -> &[AgentId] {
        &self.handoffs
    }

    /// Description used in the synthesized transfer tool targeting this
    /// agent.
    #[must_use]
    pub fn transfer_description(&self) -> Option<&str> {
        self.transfer_description.as_deref()
    }

    /// The agent's output schema, if any.
    #[must_use]
    pub const fn output_schema(&self) -> Option<&OutputSchema> {
        self.output_schema.as_ref()
    }

    /// The agent's input guardrails.
    #[must_use]
    pub fn input_guardrails(&self) -> &[InputGuardrail] {
        &self.input_guardrails
    }

    /// The agent's output guardrails.
    #[must_use]
    pub fn output_guardrails(&self) -> &[OutputGuardrail] {
        &self.output_guardrails
    }

    /// The agent's per-agent hooks, if any.
    #[must_use]
    pub fn hooks(&self) -> Option<&SharedAgentHooks> {
        self.hooks.as_ref()
    }

    /// The agent's own model reference, if any.
    #[must_use]
    pub fn model(&self) -> Option<&Arc<dyn Model>> {
        self.model.as_ref()
    }

    /// Resolve the system prompt for the given context.
    #[must_use]
    pub fn resolve_instructions(&self, context: &RunContext) -> String {
        self.instructions.resolve(context)
    }

    /// Clone this agent into a builder for override-style cloning.
    #[must_use]
    pub fn to_builder(&self) -> AgentBuilder {
        AgentBuilder {
            name: self.name.clone(),
            instructions: self.instructions.clone(),
            model: self.model.clone(),
            settings: self.settings,
            tools: self.tools.clone(),
            handoffs: self.handoffs.clone(),
            transfer_description: self.transfer_description.clone(),
            output_schema: self.output_schema.clone(),
            input_guardrails: self.input_guardrails.clone(),
            output_guardrails: self.output_guardrails.clone(),
            max_steps: self.max_steps,
            hooks: self.hooks.clone(),
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("handoffs", &self.handoffs)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    name: String,
    instructions: Instructions,
    model: Option<Arc<dyn Model>>,
    settings: ModelSettings,
    tools: Vec<SharedTool>,
    handoffs: Vec<AgentId>,
    transfer_description: Option<String>,
    output_schema: Option<OutputSchema>,
    input_guardrails: Vec<InputGuardrail>,
    output_guardrails: Vec<OutputGuardrail>,
    max_steps: u64,
    hooks: Option<SharedAgentHooks>,
}

impl AgentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Instructions::Static(String::new()),
            model: None,
            settings: ModelSettings::default(),
            tools: Vec::new(),
            handoffs: Vec::new(),
            transfer_description: None,
            output_schema: None,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
            hooks: None,
        }
    }

    /// Set literal instructions.
    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Instructions::Static(instructions.into());
        self
    }

    /// Set instructions resolved from the run context before each model
    /// call.
    #[must_use]
    pub fn instructions_fn(
        mut self,
        f: impl Fn(&RunContext) -> String + Send + Sync + 'static,
    ) -> Self {
        self.instructions = Instructions::Dynamic(Arc::new(f));
        self
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Model + 'static) -> Self {
        self.model = Some(Arc::new(model));
        self
    }

    /// Set an already-shared model.
    #[must_use]
    pub fn shared_model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the model settings.
    #[must_use]
    pub const fn settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Add a typed tool.
    #[must_use]
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self
    where
        T::Output: 'static,
    {
        self.tools.push(Arc::new(tool));
        self
    }

    /// Add an already-shared tool.
    #[must_use]
    pub fn shared_tool(mut self, tool: SharedTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add multiple shared tools.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = SharedTool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Add a sub-agent this agent may transfer to.
    #[must_use]
    pub fn handoff(mut self, target: AgentId) -> Self {
        self.handoffs.push(target);
        self
    }

    /// Add multiple transfer targets.
    #[must_use]
    pub fn handoffs(mut self, targets: impl IntoIterator<Item = AgentId>) -> Self {
        self.handoffs.extend(targets);
        self
    }

    /// Set the description shown on transfer tools targeting this agent.
    #[must_use]
    pub fn transfer_description(mut self, description: impl Into<String>) -> Self {
        self.transfer_description = Some(description.into());
        self
    }

    /// Set the output schema applied to the final assistant text.
    #[must_use]
    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Add an input guardrail.
    #[must_use]
    pub fn input_guardrail(mut self, guardrail: InputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    /// Add an output guardrail.
    #[must_use]
    pub fn output_guardrail(mut self, guardrail: OutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    /// Set the per-agent step budget.
    #[must_use]
    pub const fn max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set per-agent hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: impl crate::callback::AgentHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Build the agent.
    #[must_use]
    pub fn build(self) -> Agent {
        Agent {
            name: self.name,
            instructions: self.instructions,
            model: self.model,
            settings: self.settings,
            tools: self.tools,
            handoffs: self.handoffs,
            transfer_description: self.transfer_description,
            output_schema: self.output_schema,
            input_guardrails: self.input_guardrails,
            output_guardrails: self.output_guardrails,
            max_steps: self.max_steps,
            hooks: self.hooks,
        }
    }
}

impl fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("name", &self.name)
            .field("has_model", &self.model.is_some())
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

/// Arena of registered agents.
///
/// Agent names should be unique within a registry; transfer resolution
/// returns the first agent with a matching name.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
}

impl AgentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent and return its id.
    pub fn register(&mut self, agent: Agent) -> AgentId {
        self.agents.push(agent);
        AgentId(self.agents.len() - 1)
    }

    /// Get an agent by id.
    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id.0)
    }

    /// Find an agent id by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<AgentId> {
        self.agents
            .iter()
            .position(|a| a.name == name)
            .map(AgentId)
    }

    /// Add `child` to `parent`'s transfer targets after registration.
    ///
    /// This is how cyclic topologies (coordinator ↔ specialist) are wired.
    /// Returns `false` when either id is invalid; linking an existing
    /// target again is a no-op.
    pub fn link(&mut self, parent: AgentId, child: AgentId) -> bool {
        if child.0 >= self.agents.len() {
            return false;
        }
        let Some(agent) = self.agents.get_mut(parent.0) else {
            return false;
        };
        if !agent.handoffs.contains(&child) {
            agent.handoffs.push(child);
        }
        true
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    #[test]
    fn builder_defaults() {
        let agent = Agent::builder("Math").build();
        assert_eq!(agent.name(), "Math");
        assert_eq!(agent.max_steps(), DEFAULT_MAX_STEPS);
        assert!(agent.tools().is_empty());
        assert!(agent.handoffs().is_empty());
        assert!(agent.model().is_none());
    }

    #[test]
    fn dynamic_instructions_resolve_against_context() {
        let agent = Agent::builder("Helper")
            .instructions_fn(|ctx| format!("You are helping tenant {}.", ctx.context()["tenant"]))
            .build();
        let ctx = RunContext::new(serde_json::json!({"tenant": "acme"}));
        assert_eq!(
            agent.resolve_instructions(&ctx),
            r#"You are helping tenant "acme"."#
        );
    }

    #[test]
    fn to_builder_clones_with_overrides() {
        let agent = Agent::builder("Math")
            .instructions("Do math.")
            .max_steps(5)
            .build();
        let clone = agent.to_builder().max_steps(7).build();
        assert_eq!(clone.name(), "Math");
        assert_eq!(clone.max_steps(), 7);
        assert_eq!(agent.max_steps(), 5);
    }

    #[test]
    fn registry_round_trip() {
        let mut registry = AgentRegistry::new();
        let research = registry.register(
            Agent::builder("Research")
                .model(ScriptedModel::new([]))
                .build(),
        );
        let coord = registry.register(Agent::builder("Coord").handoff(research).build());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.by_name("Research"), Some(research));
        assert_eq!(registry.by_name("missing"), None);
        assert_eq!(registry.get(coord).unwrap().handoffs(), &[research]);
    }

    #[test]
    fn link_wires_cycles() {
        let mut registry = AgentRegistry::new();
        let coord = registry.register(Agent::builder("Coord").build());
        let research = registry.register(Agent::builder("Research").build());

        assert!(registry.link(coord, research));
        assert!(registry.link(research, coord));
        // Linking again is a no-op.
        assert!(registry.link(coord, research));
        assert_eq!(registry.get(coord).unwrap().handoffs(), &[research]);
        assert_eq!(registry.get(research).unwrap().handoffs(), &[coord]);

        assert!(!registry.link(coord, AgentId(99)));
    }
}
