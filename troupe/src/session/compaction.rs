//! Summarization-based compaction for session transcripts.
//!
//! When an append pushes the non-summary message count past the
//! threshold, everything but the most recent messages is folded into one
//! summary system message, prefixed with
//! [`SUMMARY_SENTINEL`](super::SUMMARY_SENTINEL). A configured summary
//! model produces the summary; without one, a deterministic heuristic
//! picks sentences carrying first-person identity cues. The heuristic is a
//! best-effort backup, not a contract.
//!
//! If summarization fails, the session falls back to a plain sliding
//! window. Recent messages are never lost.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::{SUMMARY_SENTINEL, SessionConfig};
use crate::message::{Message, Role};
use crate::model::{Model, ModelRequest};

const DEFAULT_SUMMARY_PROMPT: &str = "Summarize the conversation below in a few sentences. \
     Preserve the user's identity and any key facts they shared. \
     Reply with the summary only.";

/// First-person cues the heuristic fallback looks for.
const IDENTITY_CUES: &[&str] = &[
    "i am ", "i'm ", "my name", "i like", "i work", "i live", "i have", "call me",
];

/// Configuration of the compaction policy.
#[derive(Clone)]
pub struct CompactionConfig {
    /// Whether compaction is active.
    pub enabled: bool,
    /// Compact once the non-summary message count exceeds this.
    pub message_threshold: usize,
    /// Raw messages kept after the summary.
    pub keep_recent_messages: usize,
    /// Model used to produce summaries. Heuristic fallback when absent.
    pub summary_model: Option<Arc<dyn Model>>,
    /// Override for the summarization instruction.
    pub summary_prompt: Option<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            message_threshold: 20,
            keep_recent_messages: 5,
            summary_model: None,
            summary_prompt: None,
        }
    }
}

impl CompactionConfig {
    /// Create the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message threshold.
    #[must_use]
    pub const fn with_threshold(mut self, message_threshold: usize) -> Self {
        self.message_threshold = message_threshold;
        self
    }

    /// Set how many raw messages survive compaction.
    #[must_use]
    pub const fn with_keep_recent(mut self, keep_recent_messages: usize) -> Self {
        self.keep_recent_messages = keep_recent_messages;
        self
    }

    /// Set the summary model.
    #[must_use]
    pub fn with_summary_model(mut self, model: Arc<dyn Model>) -> Self {
        self.summary_model = Some(model);
        self
    }

    /// Override the summarization instruction.
    #[must_use]
    pub fn with_summary_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.summary_prompt = Some(prompt.into());
        self
    }
}

impl fmt::Debug for CompactionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactionConfig")
            .field("enabled", &self.enabled)
            .field("message_threshold", &self.message_threshold)
            .field("keep_recent_messages", &self.keep_recent_messages)
            .field("has_summary_model", &self.summary_model.is_some())
            .finish_non_exhaustive()
    }
}

/// Check if a message is the compaction summary.
#[must_use]
pub fn is_summary(message: &Message) -> bool {
    message.role == Role::System && message.text().starts_with(SUMMARY_SENTINEL)
}

/// Keep only the last `max` messages.
#[must_use]
pub fn sliding_window(mut messages: Vec<Message>, max: usize) -> Vec<Message> {
    if messages.len() > max {
        messages.drain(..messages.len() - max);
    }
    messages
}

/// Apply the session's invariants to a freshly appended message list.
///
/// Order of application: compaction when enabled and over threshold,
/// otherwise the plain `max_messages` sliding window.
pub(crate) async fn maintain(config: &SessionConfig, messages: Vec<Message>) -> Vec<Message> {
    if let Some(compaction) = config.compaction.as_ref().filter(|c| c.enabled) {
        let (prior_summary, rest) = split_summary(messages);
        if rest.len() > compaction.message_threshold {
            return compact(compaction, config.max_messages, prior_summary, rest).await;
        }
        let mut reassembled = Vec::with_capacity(rest.len() + 1);
        if let Some(summary) = prior_summary {
            reassembled.push(summary_message(&summary));
        }
        reassembled.extend(rest);
        return reassembled;
    }
    match config.max_messages {
        Some(max) => sliding_window(messages, max),
        None => messages,
    }
}

/// Remove an existing summary message, returning its body and the
/// remaining messages.
fn split_summary(messages: Vec<Message>) -> (Option<String>, Vec<Message>) {
    let mut body = None;
    let mut rest = Vec::with_capacity(messages.len());
    for message in messages {
        if body.is_none() && is_summary(&message) {
            body = Some(
                message
                    .text()
                    .trim_start_matches(SUMMARY_SENTINEL)
                    .trim()
                    .to_owned(),
            );
        } else {
            rest.push(message);
        }
    }
    (body, rest)
}

fn summary_message(body: &str) -> Message {
    Message::system(format!("{SUMMARY_SENTINEL} {body}"))
}

async fn compact(
    config: &CompactionConfig,
    max_messages: Option<usize>,
    prior_summary: Option<String>,
    rest: Vec<Message>,
) -> Vec<Message> {
    let keep = config.keep_recent_messages.min(rest.len());
    let split_at = rest.len() - keep;
    let (to_summarize, recent) = rest.split_at(split_at);

    match summarize(config, prior_summary.as_deref(), to_summarize).await {
        Ok(body) => {
            let mut compacted = Vec::with_capacity(recent.len() + 1);
            compacted.push(summary_message(&body));
            compacted.extend_from_slice(recent);
            compacted
        }
        Err(e) => {
            warn!(error = %e, "Summary model failed; falling back to sliding window");
            let mut fallback = Vec::with_capacity(rest.len() + 1);
            if let Some(summary) = prior_summary {
                fallback.push(summary_message(&summary));
            }
            fallback.extend(rest);
            let window = max_messages.unwrap_or(config.message_threshold);
            sliding_window(fallback, window)
        }
    }
}

async fn summarize(
    config: &CompactionConfig,
    prior_summary: Option<&str>,
    to_summarize: &[Message],
) -> Result<String, String> {
    let transcript = render_transcript(to_summarize);
    let Some(model) = &config.summary_model else {
        return Ok(heuristic_summary(prior_summary, &transcript, to_summarize.len()));
    };

    let instruction = config
        .summary_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SUMMARY_PROMPT);
    let mut body = String::new();
    if let Some(prior) = prior_summary {
        body.push_str("Earlier summary:\n");
        body.push_str(prior);
        body.push_str("\n\n");
    }
    body.push_str("Conversation:\n");
    body.push_str(&transcript);

    let request = ModelRequest {
        system: Some(instruction.to_owned()),
        messages: vec![Message::user(body)],
        tools: Vec::new(),
        settings: crate::model::ModelSettings::default(),
        cancel: None,
    };
    let response = model.generate(request).await.map_err(|e| e.to_string())?;
    response
        .text()
        .ok_or_else(|| "summary model returned no text".to_owned())
}

/// Render messages as `role: text` lines for the summary prompt.
fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic fallback: keep sentences carrying first-person identity
/// cues.
fn heuristic_summary(prior_summary: Option<&str>, transcript: &str, dropped: usize) -> String {
    let mut kept: Vec<String> = prior_summary
        .map(|p| vec![p.trim_end_matches('.').to_owned()])
        .unwrap_or_default();

    for sentence in transcript
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let lowered = sentence.to_lowercase();
        if IDENTITY_CUES.iter().any(|cue| lowered.contains(cue)) {
            kept.push(sentence.to_owned());
        }
    }

    if kept.is_empty() {
        format!("The user and assistant exchanged {dropped} earlier messages.")
    } else {
        let mut summary = kept.join(". ");
        summary.push('.');
        summary
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{ModelResponse, ScriptedModel};

    fn user_messages(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(format!("msg-{i}"))).collect()
    }

    mod window {
        use super::*;

        #[test]
        fn sliding_window_keeps_tail() {
            let windowed = sliding_window(user_messages(5), 3);
            assert_eq!(windowed.len(), 3);
            assert_eq!(windowed[0].text(), "msg-2");
            assert_eq!(windowed[2].text(), "msg-4");
        }

        #[test]
        fn sliding_window_no_op_under_max() {
            assert_eq!(sliding_window(user_messages(2), 5).len(), 2);
        }

        #[tokio::test]
        async fn maintain_without_compaction_uses_window() {
            let config = SessionConfig::new().with_max_messages(4);
            let maintained = maintain(&config, user_messages(10)).await;
            assert_eq!(maintained.len(), 4);
            assert_eq!(maintained[0].text(), "msg-6");
        }

        #[tokio::test]
        async fn maintain_unbounded_is_identity() {
            let config = SessionConfig::new();
            assert_eq!(maintain(&config, user_messages(10)).await.len(), 10);
        }
    }

    mod compaction_policy {
        use super::*;

        fn config(threshold: usize, keep: usize) -> SessionConfig {
            SessionConfig::new().with_compaction(
                CompactionConfig::new()
                    .with_threshold(threshold)
                    .with_keep_recent(keep),
            )
        }

        #[tokio::test]
        async fn under_threshold_is_untouched() {
            let maintained = maintain(&config(10, 3), user_messages(10)).await;
            assert_eq!(maintained.len(), 10);
        }

        #[tokio::test]
        async fn over_threshold_compacts_to_summary_plus_recent() {
            let maintained = maintain(&config(10, 3), user_messages(12)).await;
            assert_eq!(maintained.len(), 4);
            assert!(is_summary(&maintained[0]));
            assert_eq!(maintained[1].text(), "msg-9");
            assert_eq!(maintained[3].text(), "msg-11");
        }

        #[tokio::test]
        async fn existing_summary_is_folded_not_duplicated() {
            let mut messages = vec![Message::system(format!(
                "{SUMMARY_SENTINEL} The user is called Ada."
            ))];
            messages.extend(user_messages(12));

            let maintained = maintain(&config(10, 3), messages).await;
            let summaries = maintained.iter().filter(|m| is_summary(m)).count();
            assert_eq!(summaries, 1);
            assert!(maintained[0].text().contains("Ada"));
            assert_eq!(maintained.len(), 4);
        }

        #[tokio::test]
        async fn model_backed_summary_is_used() {
            let model = Arc::new(ScriptedModel::new([ModelResponse::text_reply(
                "The user is planning a trip to Oslo.",
            )]));
            let config = SessionConfig::new().with_compaction(
                CompactionConfig::new()
                    .with_threshold(5)
                    .with_keep_recent(2)
                    .with_summary_model(model),
            );

            let maintained = maintain(&config, user_messages(6)).await;
            assert!(is_summary(&maintained[0]));
            assert!(maintained[0].text().contains("Oslo"));
            assert_eq!(maintained.len(), 3);
        }

        #[tokio::test]
        async fn model_failure_falls_back_to_window() {
            // An exhausted script makes every generate call fail.
            let model = Arc::new(ScriptedModel::new([]));
            let config = SessionConfig::new().with_max_messages(4).with_compaction(
                CompactionConfig::new()
                    .with_threshold(5)
                    .with_keep_recent(2)
                    .with_summary_model(model),
            );

            let maintained = maintain(&config, user_messages(8)).await;
            // Window of 4, most recent messages survive.
            assert_eq!(maintained.len(), 4);
            assert_eq!(maintained[3].text(), "msg-7");
        }
    }

    mod heuristics {
        use super::*;

        #[test]
        fn picks_identity_sentences() {
            let summary = heuristic_summary(
                None,
                "Hello there. I am Ada and I work at Acme. The weather is nice.",
                3,
            );
            assert!(summary.contains("I am Ada"));
            assert!(!summary.contains("weather"));
        }

        #[test]
        fn keeps_prior_summary() {
            let summary = heuristic_summary(Some("The user is called Ada."), "Nothing else.", 2);
            assert!(summary.contains("Ada"));
        }

        #[test]
        fn counts_dropped_messages_when_no_cues() {
            let summary = heuristic_summary(None, "Nothing personal here.", 7);
            assert!(summary.contains('7'));
        }
    }
}
