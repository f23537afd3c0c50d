//! Error types for the troupe engine.
//!
//! Two error layers exist:
//!
//! - [`Error`] — crate-level failures raised by the runner, sessions, and
//!   configuration. Fatal run failures are additionally mirrored into the
//!   serializable [`RunError`](crate::agent::RunError) carried by a
//!   [`RunResult`](crate::agent::RunResult) so the partial transcript is
//!   never lost.
//! - [`ToolError`] — failures inside the tool layer. These are non-fatal:
//!   the dispatcher reports them back to the model as error payloads.

use thiserror::Error;

use crate::guardrail::GuardrailStage;

/// A type alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The main error type for engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An agent exhausted its per-agent step budget.
    #[error("agent '{agent}' exceeded its step budget of {max_steps}")]
    MaxStepsExceeded {
        /// Name of the agent that ran out of steps.
        agent: String,
        /// The configured step budget.
        max_steps: u64,
    },

    /// The whole-run token budget was exhausted.
    #[error("run token budget exhausted: {used} of {limit} tokens consumed")]
    TokenBudgetExhausted {
        /// Tokens consumed so far.
        used: u64,
        /// The configured budget.
        limit: u64,
    },

    /// An input or output guardrail rejected the run.
    #[error("{stage} guardrail '{name}' rejected the run: {message}")]
    GuardrailTriggered {
        /// Stage at which the guardrail ran.
        stage: GuardrailStage,
        /// Name of the rejecting guardrail.
        name: String,
        /// Reason reported by the guardrail.
        message: String,
    },

    /// The model endpoint raised.
    #[error("model call failed: {message}")]
    Model {
        /// The underlying error message.
        message: String,
    },

    /// The final assistant text did not parse against the output schema.
    #[error("final output did not match the output schema: {message}")]
    OutputParse {
        /// The parse error message.
        message: String,
    },

    /// The run was cancelled via its cancellation signal.
    #[error("run was cancelled")]
    Cancelled,

    /// A name did not resolve to a registered agent.
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    /// A session backend operation failed.
    #[error("session backend error: {message}")]
    Session {
        /// The underlying error message.
        message: String,
    },

    /// Invalid engine or agent configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration issue.
        message: String,
    },

    /// Generic internal error.
    #[error("internal error: {message}")]
    Internal {
        /// The underlying error message.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a new model error.
    #[must_use]
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Create a new session backend error.
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a new guardrail rejection error.
    #[must_use]
    pub fn guardrail(
        stage: GuardrailStage,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::GuardrailTriggered {
            stage,
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::session(err.to_string())
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        Self::session(err.to_string())
    }
}

/// Errors raised inside the tool layer.
///
/// Tool errors never abort a run: the dispatcher converts them into error
/// payloads on the matching tool-result message so the model can recover.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The requested tool is not in the active tool set.
    #[error("tool '{0}' is not available")]
    NotFound(String),

    /// The call arguments did not satisfy the tool's input schema.
    #[error("argument validation failed: {0}")]
    InvalidArguments(String),

    /// The tool's execute function failed.
    #[error("tool execution failed: {0}")]
    Execution(String),

    /// The call was denied by its approval record.
    #[error("tool call was denied: {0}")]
    Denied(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_structured_fields() {
        let err = Error::MaxStepsExceeded {
            agent: "triage".into(),
            max_steps: 5,
        };
        assert_eq!(
            err.to_string(),
            "agent 'triage' exceeded its step budget of 5"
        );

        let err = Error::TokenBudgetExhausted {
            used: 1200,
            limit: 1000,
        };
        assert!(err.to_string().contains("1200 of 1000"));
    }

    #[test]
    fn guardrail_error_names_stage_and_guardrail() {
        let err = Error::guardrail(GuardrailStage::Input, "pii-filter", "found an SSN");
        assert_eq!(
            err.to_string(),
            "input guardrail 'pii-filter' rejected the run: found an SSN"
        );
    }

    #[test]
    fn tool_error_display() {
        assert_eq!(
            ToolError::NotFound("delete".into()).to_string(),
            "tool 'delete' is not available"
        );
        assert!(
            ToolError::InvalidArguments("missing field `a`".into())
                .to_string()
                .starts_with("argument validation failed")
        );
    }
}
