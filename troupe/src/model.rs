//! Model interface consumed by the runner.
//!
//! The engine treats language models as an external capability behind the
//! [`Model`] trait: one `generate` entry point plus a streaming variant
//! that falls back to non-streaming. Provider adapters live outside this
//! crate.
//!
//! A process-wide default model may be installed once at startup with
//! [`set_default_model`]; the runner snapshots it into the run's effective
//! configuration at run start, so swapping it mid-run has no effect.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::callback::CancelSignal;
use crate::error::{Error, Result};
use crate::message::{Message, ToolCall};
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// Model sampling and budget settings.
///
/// The accepted options are frozen; there is no extension point for
/// provider-specific keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Presence penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Frequency penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Per-response completion token cap, forwarded to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_tokens: Option<u32>,

    /// Whole-run token budget, enforced by the runner before each model
    /// call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

impl ModelSettings {
    /// Create default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the nucleus sampling parameter.
    #[must_use]
    pub const fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set the per-response completion token cap.
    #[must_use]
    pub const fn with_response_tokens(mut self, tokens: u32) -> Self {
        self.response_tokens = Some(tokens);
        self
    }

    /// Set the whole-run token budget.
    #[must_use]
    pub const fn with_max_tokens(mut self, tokens: u64) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FinishReason {
    /// Natural stop (end of response).
    #[default]
    Stop,
    /// The model requested tool calls.
    ToolCalls,
    /// Maximum token limit reached.
    Length,
    /// Content was filtered by safety systems.
    ContentFilter,
}

impl FinishReason {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
        }
    }

    /// Returns `true` if the model completed normally.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Stop | Self::ToolCalls)
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generation request assembled by the runner for one step.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// Composed system message, if any.
    pub system: Option<String>,
    /// The working message list for the current agent.
    pub messages: Vec<Message>,
    /// Tool descriptors in model-ready schema form.
    pub tools: Vec<ToolDefinition>,
    /// Effective model settings.
    pub settings: ModelSettings,
    /// Optional cancellation signal, readable by the adapter.
    pub cancel: Option<CancelSignal>,
}

/// Response from one model generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated assistant message (text and/or tool-call parts).
    pub message: Message,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Token usage reported by the model.
    #[serde(default)]
    pub usage: Usage,
}

impl ModelResponse {
    /// A plain text reply with finish reason `stop`.
    #[must_use]
    pub fn text_reply(text: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(text),
            finish_reason: FinishReason::Stop,
            usage: Usage::zero(),
        }
    }

    /// A reply requesting the given tool calls.
    #[must_use]
    pub fn tool_use(calls: Vec<ToolCall>) -> Self {
        Self {
            message: Message::assistant_with_tool_calls(None, calls),
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::zero(),
        }
    }

    /// Attach a usage record.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Text content of the reply, if any.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        let text = self.message.text();
        (!text.is_empty()).then_some(text)
    }

    /// Tool calls requested by the reply.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.message.tool_calls()
    }
}

/// An incremental unit of a streamed model response.
#[derive(Debug, Clone)]
pub enum ModelDelta {
    /// Incremental text content.
    Text(String),
    /// The stream ended; carries the complete final payload.
    Done(Box<ModelResponse>),
}

/// Stream of model response deltas.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelDelta>> + Send>>;

/// The interface for language model endpoints.
#[async_trait]
pub trait Model: Send + Sync {
    /// Get the model identifier.
    fn model_id(&self) -> &str;

    /// Generate a response for the given request.
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse>;

    /// Generate a streaming response.
    ///
    /// The default implementation falls back to [`generate`](Self::generate)
    /// and emits a single text delta followed by the final payload.
    async fn generate_stream(&self, request: ModelRequest) -> Result<ModelStream> {
        let response = self.generate(request).await?;
        let mut items = Vec::with_capacity(2);
        if let Some(text) = response.text() {
            items.push(Ok(ModelDelta::Text(text)));
        }
        items.push(Ok(ModelDelta::Done(Box::new(response))));
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

static DEFAULT_MODEL: OnceLock<std::sync::Arc<dyn Model>> = OnceLock::new();

/// Install the process-wide default model.
///
/// Must be called before any run starts; the runner snapshots the value at
/// run start.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if a default model is already set.
pub fn set_default_model(model: std::sync::Arc<dyn Model>) -> Result<()> {
    DEFAULT_MODEL
        .set(model)
        .map_err(|_| Error::configuration("default model is already set"))
}

/// The process-wide default model, if one was installed.
#[must_use]
pub fn default_model() -> Option<std::sync::Arc<dyn Model>> {
    DEFAULT_MODEL.get().cloned()
}

/// A model that replays a scripted sequence of responses.
///
/// Each `generate` call pops the next response from the script; an
/// exhausted script is a model error. Deterministic by construction, which
/// makes it the backbone of the end-to-end scenario tests.
#[derive(Debug)]
pub struct ScriptedModel {
    model_id: String,
    script: Mutex<VecDeque<ModelResponse>>,
}

impl ScriptedModel {
    /// Create a scripted model from a response sequence.
    #[must_use]
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            model_id: "scripted".to_owned(),
            script: Mutex::new(responses.into_iter().collect()),
        }
    }

    /// Number of responses left in the script.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, _request: ModelRequest) -> Result<ModelResponse> {
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .ok_or_else(|| Error::model("scripted model has no responses left"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scripted_model_replays_in_order() {
        let model = ScriptedModel::new([
            ModelResponse::tool_use(vec![ToolCall::new("c1", "add", json!({"a": 2, "b": 3}))]),
            ModelResponse::text_reply("5"),
        ]);
        assert_eq!(model.remaining(), 2);

        let first = model.generate(ModelRequest::default()).await.unwrap();
        assert_eq!(first.finish_reason, FinishReason::ToolCalls);
        assert_eq!(first.tool_calls().len(), 1);

        let second = model.generate(ModelRequest::default()).await.unwrap();
        assert_eq!(second.text().as_deref(), Some("5"));

        assert!(model.generate(ModelRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn default_stream_falls_back_to_generate() {
        use futures::StreamExt as _;

        let model = ScriptedModel::new([ModelResponse::text_reply("hello")]);
        let mut stream = model.generate_stream(ModelRequest::default()).await.unwrap();

        let mut deltas = Vec::new();
        while let Some(item) = stream.next().await {
            deltas.push(item.unwrap());
        }
        assert_eq!(deltas.len(), 2);
        assert!(matches!(&deltas[0], ModelDelta::Text(t) if t == "hello"));
        assert!(matches!(&deltas[1], ModelDelta::Done(_)));
    }

    #[test]
    fn finish_reason_completion() {
        assert!(FinishReason::Stop.is_complete());
        assert!(FinishReason::ToolCalls.is_complete());
        assert!(!FinishReason::Length.is_complete());
        assert_eq!(FinishReason::ToolCalls.to_string(), "tool_calls");
    }

    #[test]
    fn settings_builders() {
        let settings = ModelSettings::new()
            .with_temperature(0.2)
            .with_response_tokens(256)
            .with_max_tokens(10_000);
        assert_eq!(settings.temperature, Some(0.2));
        assert_eq!(settings.response_tokens, Some(256));
        assert_eq!(settings.max_tokens, Some(10_000));
    }
}
