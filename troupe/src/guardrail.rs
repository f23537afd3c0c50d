//! Guardrails — validation applied to user input and final output.
//!
//! Input guardrails run once, on the concatenated text of the initial user
//! message, before the first model call. Output guardrails run once, on the
//! final assistant text, before the run returns. The first failing verdict
//! aborts the run with [`Error::GuardrailTriggered`](crate::Error),
//! carrying the guardrail's name and reason.
//!
//! Guardrails may themselves invoke models; any usage they report on their
//! verdict is charged to a separate guardrail bucket in the run metadata,
//! never to the per-agent metrics.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callback::RunContext;
use crate::error::Result;
use crate::usage::Usage;

/// Stage at which a guardrail runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailStage {
    /// Validates user input before the first model call.
    Input,
    /// Validates the final assistant output.
    Output,
}

impl GuardrailStage {
    /// Get the string representation of the stage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for GuardrailStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The verdict of a guardrail check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    /// Whether the content passed the check.
    pub passed: bool,

    /// Reason for a rejection, or diagnostic detail for a pass.
    pub message: Option<String>,

    /// Structured information about the check (scores, matches, ...).
    pub metadata: Value,

    /// Token usage consumed by the check, when the guardrail invoked a
    /// model. Accounted to the guardrail bucket.
    pub usage: Option<Usage>,
}

impl GuardrailVerdict {
    /// A passing verdict.
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            passed: true,
            message: None,
            metadata: Value::Null,
            usage: None,
        }
    }

    /// A rejecting verdict with a reason.
    #[must_use]
    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: Some(message.into()),
            metadata: Value::Null,
            usage: None,
        }
    }

    /// Attach structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach usage consumed by the check.
    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Check logic for an input guardrail.
#[async_trait]
pub trait InputGuardrailCheck: Send + Sync {
    /// Validate the concatenated text of the initial user message.
    async fn check(
        &self,
        context: &RunContext,
        agent_name: &str,
        input: &str,
    ) -> Result<GuardrailVerdict>;
}

/// A named input guardrail.
#[derive(Clone)]
pub struct InputGuardrail {
    name: String,
    check: Arc<dyn InputGuardrailCheck>,
}

impl InputGuardrail {
    /// Create a new input guardrail with the given name and check logic.
    #[must_use]
    pub fn new(name: impl Into<String>, check: impl InputGuardrailCheck + 'static) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Create an input guardrail from a plain function.
    #[must_use]
    pub fn from_fn(
        name: impl Into<String>,
        check: impl Fn(&RunContext, &str) -> GuardrailVerdict + Send + Sync + 'static,
    ) -> Self {
        struct FnCheck<F>(F);

        #[async_trait]
        impl<F> InputGuardrailCheck for FnCheck<F>
        where
            F: Fn(&RunContext, &str) -> GuardrailVerdict + Send + Sync,
        {
            async fn check(
                &self,
                context: &RunContext,
                _agent_name: &str,
                input: &str,
            ) -> Result<GuardrailVerdict> {
                Ok((self.0)(context, input))
            }
        }

        Self::new(name, FnCheck(check))
    }

    /// Returns the name of this guardrail.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute the check.
    ///
    /// # Errors
    ///
    /// Propagates failures of the check itself (not rejections).
    pub async fn run(
        &self,
        context: &RunContext,
        agent_name: &str,
        input: &str,
    ) -> Result<GuardrailVerdict> {
        self.check.check(context, agent_name, input).await
    }
}

impl std::fmt::Debug for InputGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputGuardrail")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Check logic for an output guardrail.
#[async_trait]
pub trait OutputGuardrailCheck: Send + Sync {
    /// Validate the final assistant text.
    async fn check(
        &self,
        context: &RunContext,
        agent_name: &str,
        output: &str,
    ) -> Result<GuardrailVerdict>;
}

/// A named output guardrail.
#[derive(Clone)]
pub struct OutputGuardrail {
    name: String,
    check: Arc<dyn OutputGuardrailCheck>,
}

impl OutputGuardrail {
    /// Create a new output guardrail with the given name and check logic.
    #[must_use]
    pub fn new(name: impl Into<String>, check: impl OutputGuardrailCheck + 'static) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Create an output guardrail from a plain function.
    #[must_use]
    pub fn from_fn(
        name: impl Into<String>,
        check: impl Fn(&RunContext, &str) -> GuardrailVerdict + Send + Sync + 'static,
    ) -> Self {
        struct FnCheck<F>(F);

        #[async_trait]
        impl<F> OutputGuardrailCheck for FnCheck<F>
        where
            F: Fn(&RunContext, &str) -> GuardrailVerdict + Send + Sync,
        {
            async fn check(
                &self,
                context: &RunContext,
                _agent_name: &str,
                output: &str,
            ) -> Result<GuardrailVerdict> {
                Ok((self.0)(context, output))
            }
        }

        Self::new(name, FnCheck(check))
    }

    /// Returns the name of this guardrail.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute the check.
    ///
    /// # Errors
    ///
    /// Propagates failures of the check itself (not rejections).
    pub async fn run(
        &self,
        context: &RunContext,
        agent_name: &str,
        output: &str,
    ) -> Result<GuardrailVerdict> {
        self.check.check(context, agent_name, output).await
    }
}

impl std::fmt::Debug for OutputGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputGuardrail")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_fn_input_guardrail() {
        let guardrail = InputGuardrail::from_fn("no-forbidden", |_ctx, input| {
            if input.contains("forbidden") {
                GuardrailVerdict::reject("forbidden content detected")
            } else {
                GuardrailVerdict::pass()
            }
        });

        let ctx = RunContext::default();
        let ok = guardrail.run(&ctx, "agent", "hello").await.unwrap();
        assert!(ok.passed);

        let bad = guardrail
            .run(&ctx, "agent", "something forbidden")
            .await
            .unwrap();
        assert!(!bad.passed);
        assert_eq!(bad.message.as_deref(), Some("forbidden content detected"));
    }

    #[tokio::test]
    async fn verdict_carries_usage_for_guardrail_bucket() {
        let guardrail = OutputGuardrail::from_fn("toxicity", |_ctx, _output| {
            GuardrailVerdict::pass().with_usage(Usage::new(30, 5))
        });

        let ctx = RunContext::default();
        let verdict = guardrail.run(&ctx, "agent", "fine").await.unwrap();
        assert_eq!(verdict.usage, Some(Usage::new(30, 5)));
    }

    #[test]
    fn stage_display() {
        assert_eq!(GuardrailStage::Input.to_string(), "input");
        assert_eq!(GuardrailStage::Output.to_string(), "output");
    }
}
