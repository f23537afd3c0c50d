//! Run result types: step records, per-agent metrics, and the final
//! [`RunResult`] with its metadata record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::state::{PendingApproval, RunSnapshot};
use crate::message::Message;
use crate::model::FinishReason;
use crate::transfer::TransferSignal;
use crate::usage::Usage;

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run produced a final output.
    Complete,
    /// The run is suspended waiting for tool-call approvals; the result
    /// carries a serialized [`RunSnapshot`].
    Paused,
    /// A fatal error ended the run.
    Failed,
}

impl RunStatus {
    /// Check if the run completed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Check if the run is paused.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Check if the run failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// One executed tool call within a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// The call identifier.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// The call arguments.
    pub arguments: Value,
    /// The payload reported back to the model (an error payload for
    /// failures, the marker payload for transfer signals).
    pub result: Value,
    /// The error message, when the call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The transfer signal, when the call signalled one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferSignal>,
    /// Wall-clock duration of the call in milliseconds.
    pub duration_ms: u64,
}

impl ToolCallRecord {
    /// Check if the call failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Check if the call signalled a transfer.
    #[must_use]
    pub const fn is_transfer(&self) -> bool {
        self.transfer.is_some()
    }
}

/// The record of one step: one model call plus the tool calls it
/// requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Monotonically increasing step number (1-indexed).
    pub step: u64,
    /// Agent that drove this step.
    pub agent: String,
    /// Text produced by the model, if any.
    pub text: Option<String>,
    /// Finish reason reported by the model.
    pub finish_reason: FinishReason,
    /// Tool calls executed at this step, in the model's request order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Token usage reported by the model for this step.
    pub usage: Usage,
}

/// Accumulated metrics for one agent across a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// The agent's name.
    pub agent_name: String,
    /// Model calls made under this agent.
    pub turns: u64,
    /// Token usage charged to this agent.
    pub usage: Usage,
    /// Tool calls dispatched under this agent.
    pub tool_calls: u64,
    /// Wall-clock time spent as the current agent, in milliseconds.
    pub duration_ms: u64,
}

impl AgentMetrics {
    /// Fresh metrics for the named agent.
    #[must_use]
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            turns: 0,
            usage: Usage::zero(),
            tool_calls: 0,
            duration_ms: 0,
        }
    }
}

/// Kind of fatal run error, mirrored from [`Error`](crate::Error) into a
/// serializable shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Per-agent step budget exhausted.
    MaxSteps,
    /// Whole-run token budget exhausted.
    TokenBudget,
    /// An input guardrail rejected the run.
    InputGuardrail,
    /// An output guardrail rejected the run.
    OutputGuardrail,
    /// The model endpoint raised.
    Model,
    /// The final output did not parse against the output schema.
    OutputParse,
    /// The run was cancelled.
    Cancelled,
}

/// Serializable record of the fatal error that ended a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// The error kind.
    pub kind: RunErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl RunError {
    /// Create a new run error record.
    #[must_use]
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Execution metadata attached to every [`RunResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Unique id of this run (stable across pause/resume).
    pub run_id: Uuid,
    /// Total prompt tokens across all steps.
    pub prompt_tokens: u64,
    /// Total completion tokens across all steps.
    pub completion_tokens: u64,
    /// Total tokens across all steps.
    pub total_tokens: u64,
    /// Finish reason of the final model call.
    pub finish_reason: FinishReason,
    /// Total dispatched tool calls (validation failures included).
    pub total_tool_calls: u64,
    /// Agents visited, in first-visit order, with explicit re-transfers
    /// appended again.
    pub handoff_chain: Vec<String>,
    /// Per-agent metrics, in first-visit order.
    pub agent_metrics: Vec<AgentMetrics>,
    /// Token usage consumed by guardrail checks (separate bucket, not
    /// charged to any agent).
    pub guardrail_usage: Usage,
    /// The output-schema parse error, when the final text did not conform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_parse_error: Option<String>,
    /// Approval requests outstanding when the run paused.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_approvals: Vec<PendingApproval>,
}

/// The result of a run: final output, transcript, step records, optional
/// pause snapshot, and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Terminal state of the run.
    pub status: RunStatus,
    /// The final output: a string, or the parsed object when the agent has
    /// an output schema. `None` for paused runs and budget failures.
    pub final_output: Option<Value>,
    /// Every message produced during the run (session history excluded).
    pub messages: Vec<Message>,
    /// Step records in step-number order.
    pub steps: Vec<StepResult>,
    /// Serialized run state, present when the run paused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<RunSnapshot>,
    /// Execution metadata.
    pub metadata: RunMetadata,
    /// The fatal error, when the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl RunResult {
    /// Check if the run completed with a final output.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Check if the run is paused for approvals.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.status.is_paused()
    }

    /// Check if the run failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    /// The final output as text, when it is a string.
    #[must_use]
    pub fn final_text(&self) -> Option<&str> {
        self.final_output.as_ref().and_then(Value::as_str)
    }

    /// Take the pause snapshot out of the result.
    #[must_use]
    pub fn take_state(&mut self) -> Option<RunSnapshot> {
        self.state.take()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_predicates() {
        assert!(RunStatus::Complete.is_complete());
        assert!(RunStatus::Paused.is_paused());
        assert!(RunStatus::Failed.is_failed());
        assert!(!RunStatus::Failed.is_complete());
    }

    #[test]
    fn record_predicates() {
        let record = ToolCallRecord {
            id: "c1".into(),
            name: "add".into(),
            arguments: serde_json::json!({}),
            result: serde_json::json!({"error": "boom"}),
            error: Some("boom".into()),
            transfer: None,
            duration_ms: 3,
        };
        assert!(record.is_error());
        assert!(!record.is_transfer());
    }

    #[test]
    fn metadata_serializes_to_stable_shape() {
        let metadata = RunMetadata {
            run_id: Uuid::nil(),
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            finish_reason: FinishReason::Stop,
            total_tool_calls: 1,
            handoff_chain: vec!["Math".into()],
            agent_metrics: vec![AgentMetrics::new("Math")],
            guardrail_usage: Usage::zero(),
            output_parse_error: None,
            pending_approvals: Vec::new(),
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["total_tokens"], 15);
        assert_eq!(json["finish_reason"], "stop");
        assert_eq!(json["handoff_chain"][0], "Math");
        assert!(json.get("output_parse_error").is_none());
        assert!(json.get("pending_approvals").is_none());
    }
}
