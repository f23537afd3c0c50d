//! Message types for agent-model communication.
//!
//! A [`Message`] carries a [`Role`] and an ordered sequence of
//! [`ContentPart`]s: plain text, tool-call requests made by the model, and
//! tool results reported back to it. Tool-call parts carry a unique call
//! identifier that links a request to exactly one result. Messages are
//! immutable once appended to a conversation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool result message.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for the call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments to pass to the tool.
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The result of a tool call, reported back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Identifier of the call this result answers.
    pub call_id: String,
    /// The result payload (an error payload when `is_error` is set).
    pub output: Value,
    /// Whether the call failed.
    #[serde(default)]
    pub is_error: bool,
}

/// One part of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// A tool-call request (assistant messages only).
    ToolCall(ToolCall),
    /// A tool-call result (tool messages only).
    ToolResult(ToolResult),
}

impl ContentPart {
    /// Create a new text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get the text content if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,
    /// Ordered content parts.
    pub content: Vec<ContentPart>,
}

impl Message {
    /// Create a new system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Create a new user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Create a new assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Create an assistant message carrying tool-call requests.
    ///
    /// `text` becomes a leading text part when non-empty.
    #[must_use]
    pub fn assistant_with_tool_calls(text: Option<String>, calls: Vec<ToolCall>) -> Self {
        let mut content = Vec::with_capacity(calls.len() + 1);
        if let Some(text) = text
            && !text.is_empty()
        {
            content.push(ContentPart::text(text));
        }
        content.extend(calls.into_iter().map(ContentPart::ToolCall));
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Create a tool-result message answering `call_id`.
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, output: Value) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult(ToolResult {
                call_id: call_id.into(),
                output,
                is_error: false,
            })],
        }
    }

    /// Create a tool-result message carrying an error payload.
    #[must_use]
    pub fn tool_error(call_id: impl Into<String>, output: Value) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult(ToolResult {
                call_id: call_id.into(),
                output,
                is_error: true,
            })],
        }
    }

    /// Concatenated text of all text parts, joined with newlines.
    ///
    /// Non-text parts are ignored.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All tool-call request parts in order.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// All tool-result parts in order.
    #[must_use]
    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolResult(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    /// Check if this message carries any tool-call requests.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|part| matches!(part, ContentPart::ToolCall(_)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    mod construction {
        use super::*;

        #[test]
        fn role_constructors_set_role_and_text() {
            assert_eq!(Message::system("be helpful").role, Role::System);
            assert_eq!(Message::user("hi").role, Role::User);
            assert_eq!(Message::assistant("hello").role, Role::Assistant);
            assert_eq!(Message::user("hi").text(), "hi");
        }

        #[test]
        fn assistant_with_tool_calls_orders_parts() {
            let msg = Message::assistant_with_tool_calls(
                Some("thinking".into()),
                vec![
                    ToolCall::new("c1", "add", json!({"a": 1})),
                    ToolCall::new("c2", "time", json!({})),
                ],
            );
            assert_eq!(msg.text(), "thinking");
            let calls = msg.tool_calls();
            assert_eq!(calls.len(), 2);
            assert_eq!(calls[0].id, "c1");
            assert_eq!(calls[1].id, "c2");
        }

        #[test]
        fn empty_text_is_not_a_part() {
            let msg = Message::assistant_with_tool_calls(
                Some(String::new()),
                vec![ToolCall::new("c1", "add", json!({}))],
            );
            assert_eq!(msg.content.len(), 1);
        }

        #[test]
        fn tool_error_sets_flag() {
            let msg = Message::tool_error("c9", json!({"error": "boom"}));
            assert_eq!(msg.role, Role::Tool);
            let results = msg.tool_results();
            assert_eq!(results.len(), 1);
            assert!(results[0].is_error);
            assert_eq!(results[0].call_id, "c9");
        }
    }

    mod text_extraction {
        use super::*;

        #[test]
        fn text_joins_parts_with_newlines() {
            let msg = Message {
                role: Role::Assistant,
                content: vec![ContentPart::text("one"), ContentPart::text("two")],
            };
            assert_eq!(msg.text(), "one\ntwo");
        }

        #[test]
        fn text_ignores_non_text_parts() {
            let msg = Message::assistant_with_tool_calls(
                Some("note".into()),
                vec![ToolCall::new("c1", "add", json!({}))],
            );
            assert_eq!(msg.text(), "note");
        }

        #[test]
        fn text_of_tool_message_is_empty() {
            let msg = Message::tool_result("c1", json!({"ok": true}));
            assert_eq!(msg.text(), "");
        }
    }

    mod serde_shape {
        use super::*;

        #[test]
        fn roles_serialize_lowercase() {
            assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), r#""tool""#);
        }

        #[test]
        fn content_parts_are_tagged() {
            let part = ContentPart::text("hi");
            let json = serde_json::to_value(&part).unwrap();
            assert_eq!(json["type"], "text");

            let part = ContentPart::ToolCall(ToolCall::new("c1", "add", json!({"a": 1})));
            let json = serde_json::to_value(&part).unwrap();
            assert_eq!(json["type"], "tool_call");
            assert_eq!(json["id"], "c1");
        }

        #[test]
        fn round_trip() {
            let msg = Message::assistant_with_tool_calls(
                Some("hm".into()),
                vec![ToolCall::new("c1", "add", json!({"a": 2, "b": 3}))],
            );
            let encoded = serde_json::to_string(&msg).unwrap();
            let decoded: Message = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, msg);
        }
    }
}
