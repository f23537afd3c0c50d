//! Convenience re-exports of the common API surface.
//!
//! ```rust,ignore
//! use troupe::prelude::*;
//! ```

pub use crate::agent::{
    Agent, AgentBuilder, AgentId, AgentMetrics, AgentRegistry, Instructions, PendingApproval,
    RunConfig, RunError, RunErrorKind, RunEvent, RunMetadata, RunResult, RunSnapshot, RunStatus,
    Runner, StepResult, StreamedRun, ToolCallRecord,
};
pub use crate::callback::{
    AgentHooks, CancelSignal, NoopRunHooks, RunContext, RunHooks, SharedAgentHooks, SharedRunHooks,
};
pub use crate::error::{Error, Result, ToolError};
pub use crate::guardrail::{
    GuardrailStage, GuardrailVerdict, InputGuardrail, InputGuardrailCheck, OutputGuardrail,
    OutputGuardrailCheck,
};
pub use crate::message::{ContentPart, Message, Role, ToolCall, ToolResult};
pub use crate::model::{
    FinishReason, Model, ModelDelta, ModelRequest, ModelResponse, ModelSettings, ModelStream,
    ScriptedModel, default_model, set_default_model,
};
pub use crate::schema::{InputSchema, OutputSchema};
pub use crate::session::{
    CompactionConfig, InMemorySession, SUMMARY_SENTINEL, Session, SessionConfig, StorageKind,
};
pub use crate::tool::{
    DynTool, FunctionTool, FunctionToolBuilder, SharedTool, Tool, ToolDefinition, ToolMetadata,
    ToolSet,
};
pub use crate::transfer::{TransferSignal, transfer_tool_name};
pub use crate::usage::{Usage, UsageTracker};

#[cfg(all(feature = "redis", feature = "mongodb"))]
pub use crate::session::HybridSession;
#[cfg(feature = "mongodb")]
pub use crate::session::MongoSession;
#[cfg(feature = "redis")]
pub use crate::session::RedisSession;
