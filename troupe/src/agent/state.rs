//! Serializable run state for pause and resume.
//!
//! A paused run serializes into a [`RunSnapshot`]: everything needed to
//! restore the runner to the point *before* the suspended tool dispatch.
//! The caller marks each pending approval granted or denied (via
//! [`RunSnapshot::approve`] / [`RunSnapshot::reject`]) and hands the
//! snapshot to [`Runner::resume`](super::Runner::resume). Given the same
//! registry and deterministic model behavior, the resumed run is
//! indistinguishable from an uninterrupted one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::result::{AgentMetrics, StepResult};
use crate::error::{Error, Result};
use crate::message::{Message, ToolCall};
use crate::model::FinishReason;
use crate::usage::{Usage, UsageTracker};

/// A consent record for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    /// Identifier of the gated call.
    pub call_id: String,
    /// Name of the tool.
    pub tool_name: String,
    /// Arguments of the gated call.
    pub arguments: Value,
    /// `None` while undecided; the caller sets it before resuming.
    pub approved: Option<bool>,
}

impl PendingApproval {
    /// A fresh, undecided approval request.
    #[must_use]
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            approved: None,
        }
    }
}

/// Model-response details of the step that was suspended, needed to record
/// its [`StepResult`] after the resumed dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingStep {
    /// Text produced by the suspended step's model call.
    pub text: Option<String>,
    /// Finish reason of the suspended step's model call.
    pub finish_reason: FinishReason,
    /// Usage of the suspended step's model call.
    pub usage: Usage,
}

/// Serializable snapshot of a paused run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// Name of the root agent.
    pub root_agent: String,
    /// Name of the agent that was current when the run paused.
    pub current_agent: String,
    /// The user-provided context value.
    pub context: Value,
    /// The working message list presented to the current agent.
    pub messages: Vec<Message>,
    /// Every message produced during the run so far.
    pub transcript: Vec<Message>,
    /// Completed model calls (global step counter).
    pub step: u64,
    /// Completed model calls under the current agent.
    pub steps_under_agent: u64,
    /// Agents visited so far.
    pub handoff_chain: Vec<String>,
    /// The run's usage tracker.
    pub usage: UsageTracker,
    /// Usage consumed by guardrail checks.
    pub guardrail_usage: Usage,
    /// Per-agent metrics so far.
    pub agent_metrics: Vec<AgentMetrics>,
    /// Step records so far.
    pub steps_taken: Vec<StepResult>,
    /// The suspended step's full tool-call list, redispatched on resume.
    pub pending_calls: Vec<ToolCall>,
    /// Model-response details of the suspended step.
    pub pending_step: PendingStep,
    /// Approval requests; mark each before resuming.
    pub pending_approvals: Vec<PendingApproval>,
}

impl RunSnapshot {
    /// Mark the approval for `call_id` as granted.
    ///
    /// Returns `false` when no approval with that call id exists.
    pub fn approve(&mut self, call_id: &str) -> bool {
        self.set_approval(call_id, true)
    }

    /// Mark the approval for `call_id` as denied.
    ///
    /// Returns `false` when no approval with that call id exists.
    pub fn reject(&mut self, call_id: &str) -> bool {
        self.set_approval(call_id, false)
    }

    /// Grant every outstanding approval.
    pub fn approve_all(&mut self) {
        for approval in &mut self.pending_approvals {
            approval.approved = Some(true);
        }
    }

    fn set_approval(&mut self, call_id: &str, approved: bool) -> bool {
        match self
            .pending_approvals
            .iter_mut()
            .find(|a| a.call_id == call_id)
        {
            Some(approval) => {
                approval.approved = Some(approved);
                true
            }
            None => false,
        }
    }

    /// Serialize to a stable JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on serialization failure.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restore a snapshot from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] when the input is not a valid snapshot.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_snapshot() -> RunSnapshot {
        RunSnapshot {
            run_id: Uuid::nil(),
            root_agent: "Coord".into(),
            current_agent: "Coord".into(),
            context: Value::Null,
            messages: vec![Message::user("delete the file")],
            transcript: vec![Message::user("delete the file")],
            step: 1,
            steps_under_agent: 1,
            handoff_chain: vec!["Coord".into()],
            usage: UsageTracker::new(),
            guardrail_usage: Usage::zero(),
            agent_metrics: vec![AgentMetrics::new("Coord")],
            steps_taken: Vec::new(),
            pending_calls: vec![ToolCall::new(
                "c1",
                "delete",
                json!({"path": "/system/x"}),
            )],
            pending_step: PendingStep {
                text: None,
                finish_reason: FinishReason::ToolCalls,
                usage: Usage::new(10, 5),
            },
            pending_approvals: vec![PendingApproval::new(
                "c1",
                "delete",
                json!({"path": "/system/x"}),
            )],
        }
    }

    #[test]
    fn approve_and_reject_by_call_id() {
        let mut snapshot = sample_snapshot();
        assert!(snapshot.approve("c1"));
        assert_eq!(snapshot.pending_approvals[0].approved, Some(true));

        assert!(snapshot.reject("c1"));
        assert_eq!(snapshot.pending_approvals[0].approved, Some(false));

        assert!(!snapshot.approve("missing"));
    }

    #[test]
    fn approve_all_grants_everything() {
        let mut snapshot = sample_snapshot();
        snapshot
            .pending_approvals
            .push(PendingApproval::new("c2", "delete", json!({})));
        snapshot.approve_all();
        assert!(
            snapshot
                .pending_approvals
                .iter()
                .all(|a| a.approved == Some(true))
        );
    }

    #[test]
    fn json_round_trip_is_stable() {
        let snapshot = sample_snapshot();
        let json = snapshot.to_json().unwrap();
        let restored = RunSnapshot::from_json(&json).unwrap();
        assert_eq!(restored.current_agent, snapshot.current_agent);
        assert_eq!(restored.pending_calls, snapshot.pending_calls);
        assert_eq!(restored.pending_step, snapshot.pending_step);
        assert_eq!(restored.messages, snapshot.messages);
    }
}
