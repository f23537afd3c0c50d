//! Agent-to-agent transfer (handoff) plumbing.
//!
//! For every sub-agent an agent may delegate to, the runner synthesizes one
//! `transfer_to_<slug>` tool. Its execute function does not switch agents —
//! it returns a marker payload ([`TransferSignal`]) that the dispatcher
//! classifies and the runner acts on: the first transfer outcome of a step
//! wins, the current agent is replaced, and the working message list is
//! reset to the originating user query plus a synthetic system note.
//!
//! The full reset keeps context growth bounded across deep handoff chains
//! and gives the callee a clean view of the task.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::callback::RunContext;
use crate::error::ToolError;
use crate::message::{Message, Role};
use crate::schema::InputSchema;
use crate::tool::DynTool;

/// Marker key carried by a transfer tool's return payload.
pub const TRANSFER_MARKER: &str = "__transfer";

const TRANSFER_PREFIX: &str = "transfer_to_";

/// Lowercase an agent name and replace whitespace with underscores.
#[must_use]
pub fn transfer_slug(agent_name: &str) -> String {
    agent_name
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Tool name synthesized for transfers to the named agent.
#[must_use]
pub fn transfer_tool_name(agent_name: &str) -> String {
    format!("{TRANSFER_PREFIX}{}", transfer_slug(agent_name))
}

/// A transfer request signalled by a tool result.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransferSignal {
    /// Name of the agent to transfer to.
    pub agent_name: String,
    /// Why control is being transferred.
    pub reason: Option<String>,
    /// Free-form context forwarded to the callee.
    pub context: Option<String>,
}

impl TransferSignal {
    /// Create a new signal targeting `agent_name`.
    #[must_use]
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            reason: None,
            context: None,
        }
    }

    /// The marker payload a transfer tool returns to the model.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut payload = json!({
            TRANSFER_MARKER: true,
            "agent_name": self.agent_name,
        });
        if let Some(obj) = payload.as_object_mut() {
            if let Some(reason) = &self.reason {
                obj.insert("reason".to_owned(), Value::String(reason.clone()));
            }
            if let Some(context) = &self.context {
                obj.insert("context".to_owned(), Value::String(context.clone()));
            }
        }
        payload
    }

    /// Detect a transfer marker in a tool result payload.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get(TRANSFER_MARKER) != Some(&Value::Bool(true)) {
            return None;
        }
        let agent_name = value.get("agent_name")?.as_str()?.to_owned();
        Some(Self {
            agent_name,
            reason: value
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_owned),
            context: value
                .get("context")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }
}

/// Synthetic tool exposing one sub-agent as a transfer target.
pub(crate) struct TransferTool {
    tool_name: String,
    target: String,
    description: String,
}

impl TransferTool {
    /// Build the transfer tool for the named target agent.
    pub fn new(target: &str, transfer_description: Option<&str>) -> Self {
        let description = match transfer_description {
            Some(when) => {
                format!("Transfer the conversation to the {target} agent. Use this when: {when}")
            }
            None => format!("Transfer the conversation to the {target} agent."),
        };
        Self {
            tool_name: transfer_tool_name(target),
            target: target.to_owned(),
            description,
        }
    }
}

impl std::fmt::Debug for TransferTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferTool")
            .field("tool_name", &self.tool_name)
            .field("target", &self.target)
            .finish()
    }
}

#[async_trait]
impl DynTool for TransferTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::json(json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Why control is being transferred."
                },
                "context": {
                    "type": "string",
                    "description": "Optional context to forward to the receiving agent."
                }
            }
        }))
    }

    async fn is_enabled(&self, _context: &RunContext) -> bool {
        true
    }

    async fn needs_approval(&self, _context: &RunContext, _args: &Value, _call_id: &str) -> bool {
        false
    }

    async fn call_json(&self, args: Value, _context: &RunContext) -> Result<Value, ToolError> {
        let mut signal = TransferSignal::new(&self.target);
        signal.reason = args.get("reason").and_then(Value::as_str).map(str::to_owned);
        signal.context = args
            .get("context")
            .and_then(Value::as_str)
            .map(str::to_owned);
        Ok(signal.to_value())
    }
}

/// Serialized text of the originating user query: the first user-role
/// message from the oldest end of the list. Empty when none exists.
#[must_use]
pub fn originating_query(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(Message::text)
        .unwrap_or_default()
}

/// The callee's fresh message list: one synthetic system note explaining
/// the transfer, then the originating user query.
#[must_use]
pub fn handoff_messages(signal: &TransferSignal, from: &str, query: &str) -> Vec<Message> {
    let mut note = format!(
        "The conversation was transferred from the {from} agent to the {} agent.",
        signal.agent_name
    );
    if let Some(reason) = &signal.reason {
        note.push_str(&format!(" Reason: {reason}"));
    }
    if let Some(context) = &signal.context {
        note.push_str(&format!("\nForwarded context: {context}"));
    }
    vec![Message::system(note), Message::user(query)]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod naming {
        use super::*;

        #[test]
        fn slug_lowercases_and_joins_whitespace() {
            assert_eq!(transfer_slug("Research"), "research");
            assert_eq!(transfer_slug("Billing Support"), "billing_support");
            assert_eq!(transfer_slug("  Edge  Case "), "edge_case");
        }

        #[test]
        fn tool_name_has_prefix() {
            assert_eq!(transfer_tool_name("Research"), "transfer_to_research");
        }
    }

    mod signal {
        use super::*;
        use serde_json::json;

        #[test]
        fn round_trips_through_payload() {
            let mut signal = TransferSignal::new("Research");
            signal.reason = Some("needs a literature search".into());
            signal.context = Some("user prefers recent sources".into());

            let payload = signal.to_value();
            assert_eq!(payload[TRANSFER_MARKER], true);
            assert_eq!(TransferSignal::from_value(&payload).unwrap(), signal);
        }

        #[test]
        fn plain_values_are_not_signals() {
            assert!(TransferSignal::from_value(&json!({"result": 5})).is_none());
            assert!(TransferSignal::from_value(&json!("text")).is_none());
            assert!(
                TransferSignal::from_value(&json!({TRANSFER_MARKER: false, "agent_name": "x"}))
                    .is_none()
            );
        }

        #[test]
        fn marker_without_agent_name_is_ignored() {
            assert!(TransferSignal::from_value(&json!({TRANSFER_MARKER: true})).is_none());
        }
    }

    mod transfer_tool {
        use super::*;
        use serde_json::json;

        #[test]
        fn description_includes_transfer_hint() {
            let tool = TransferTool::new("Research", Some("the user asks for sources"));
            assert_eq!(
                tool.description(),
                "Transfer the conversation to the Research agent. \
                 Use this when: the user asks for sources"
            );

            let bare = TransferTool::new("Research", None);
            assert_eq!(
                bare.description(),
                "Transfer the conversation to the Research agent."
            );
        }

        #[tokio::test]
        async fn execute_signals_instead_of_transferring() {
            let tool = TransferTool::new("Research", None);
            let ctx = RunContext::default();
            let payload = tool
                .call_json(json!({"reason": "deep dive"}), &ctx)
                .await
                .unwrap();

            let signal = TransferSignal::from_value(&payload).unwrap();
            assert_eq!(signal.agent_name, "Research");
            assert_eq!(signal.reason.as_deref(), Some("deep dive"));
            assert_eq!(signal.context, None);
        }

        #[test]
        fn schema_fields_are_optional() {
            let tool = TransferTool::new("Research", None);
            let schema = tool.input_schema();
            assert!(schema.validate(&json!({})).is_ok());
            assert!(schema.validate(&json!({"reason": "r"})).is_ok());
        }
    }

    mod reset {
        use super::*;

        #[test]
        fn originating_query_picks_first_user_message() {
            let messages = vec![
                Message::system("sys"),
                Message::user("first question"),
                Message::assistant("answer"),
                Message::user("second question"),
            ];
            assert_eq!(originating_query(&messages), "first question");
        }

        #[test]
        fn originating_query_empty_without_user_message() {
            let messages = vec![Message::system("sys")];
            assert_eq!(originating_query(&messages), "");
        }

        #[test]
        fn handoff_messages_are_note_then_query() {
            let mut signal = TransferSignal::new("Research");
            signal.context = Some("budget is tight".into());
            let messages = handoff_messages(&signal, "Coord", "find me a laptop");

            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].role, Role::System);
            assert!(messages[0].text().contains("transferred from the Coord"));
            assert!(messages[0].text().contains("budget is tight"));
            assert_eq!(messages[1].role, Role::User);
            assert_eq!(messages[1].text(), "find me a laptop");
        }
    }
}
