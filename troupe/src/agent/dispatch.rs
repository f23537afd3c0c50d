//! Parallel tool dispatch for one step.
//!
//! Given the model's requested calls, the dispatcher validates arguments
//! against each tool's schema, applies approval policies against the run's
//! recorded approvals, then starts every executable call concurrently and
//! awaits them all. Outcomes come back in the model's request order
//! regardless of completion order, each classified as a plain value, a
//! transfer signal, or an error.
//!
//! A call that needs approval with no recorded decision suspends the whole
//! step before anything executes: the runner pauses the run and the step's
//! first dispatch happens after resume.

use std::time::Instant;

use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{Instrument as _, info_span, warn};

use super::events::{EventSink, RunEvent};
use super::hook::HookPair;
use super::result::ToolCallRecord;
use super::state::PendingApproval;
use crate::callback::RunContext;
use crate::error::ToolError;
use crate::message::ToolCall;
use crate::tool::{SharedTool, ToolSet};
use crate::transfer::TransferSignal;

/// Classified result of one dispatched call.
#[derive(Debug, Clone)]
pub enum OutcomeKind {
    /// The tool returned a plain value.
    Value(Value),
    /// The tool signalled a transfer.
    Transfer(TransferSignal),
    /// The call failed (validation, missing tool, denial, or execution).
    Error(String),
}

/// One dispatched call with its classified outcome and timing.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// The originating call.
    pub call: ToolCall,
    /// The classified outcome.
    pub kind: OutcomeKind,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ToolOutcome {
    /// The payload reported back to the model as the tool result.
    #[must_use]
    pub fn payload(&self) -> Value {
        match &self.kind {
            OutcomeKind::Value(value) => value.clone(),
            OutcomeKind::Transfer(signal) => signal.to_value(),
            OutcomeKind::Error(message) => json!({ "error": message }),
        }
    }

    /// The error message, when the call failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.kind {
            OutcomeKind::Error(message) => Some(message),
            _ => None,
        }
    }

    /// The transfer signal, when the call signalled one.
    #[must_use]
    pub const fn transfer(&self) -> Option<&TransferSignal> {
        match &self.kind {
            OutcomeKind::Transfer(signal) => Some(signal),
            _ => None,
        }
    }

    /// Build the step record for this outcome.
    #[must_use]
    pub fn record(&self) -> ToolCallRecord {
        ToolCallRecord {
            id: self.call.id.clone(),
            name: self.call.name.clone(),
            arguments: self.call.arguments.clone(),
            result: self.payload(),
            error: self.error().map(str::to_owned),
            transfer: self.transfer().cloned(),
            duration_ms: self.duration_ms,
        }
    }
}

/// Result of dispatching one step's calls.
pub(super) enum DispatchVerdict {
    /// All calls ran (or were rejected pre-execution); outcomes are in
    /// request order.
    Completed(Vec<ToolOutcome>),
    /// At least one call needs an approval with no recorded decision.
    /// Nothing was executed.
    NeedsApproval(Vec<PendingApproval>),
}

/// A call after validation and approval screening, before execution.
enum Staged {
    Ready(SharedTool),
    Rejected(String),
}

pub(super) async fn dispatch(
    calls: &[ToolCall],
    tools: &ToolSet,
    context: &RunContext,
    hooks: &HookPair<'_>,
    sink: &EventSink,
    approvals: &[PendingApproval],
) -> DispatchVerdict {
    let mut staged = Vec::with_capacity(calls.len());
    let mut pending = Vec::new();

    for call in calls {
        let Some(tool) = tools.get(&call.name) else {
            staged.push(Staged::Rejected(
                ToolError::NotFound(call.name.clone()).to_string(),
            ));
            continue;
        };

        if let Err(e) = tool.input_schema().validate(&call.arguments) {
            staged.push(Staged::Rejected(e.to_string()));
            continue;
        }

        if tool.needs_approval(context, &call.arguments, &call.id).await {
            match approvals
                .iter()
                .find(|a| a.call_id == call.id)
                .and_then(|a| a.approved)
            {
                Some(true) => staged.push(Staged::Ready(SharedTool::clone(tool))),
                Some(false) => staged.push(Staged::Rejected(
                    ToolError::Denied("approval was denied".to_owned()).to_string(),
                )),
                None => {
                    pending.push(PendingApproval::new(
                        &call.id,
                        &call.name,
                        call.arguments.clone(),
                    ));
                    staged.push(Staged::Rejected(String::new()));
                }
            }
        } else {
            staged.push(Staged::Ready(SharedTool::clone(tool)));
        }
    }

    if !pending.is_empty() {
        return DispatchVerdict::NeedsApproval(pending);
    }

    let futures = calls
        .iter()
        .zip(staged)
        .map(|(call, staged)| execute_one(call, staged, context, hooks, sink));
    DispatchVerdict::Completed(join_all(futures).await)
}

/// Execute one staged call with lifecycle events and a tracing span.
async fn execute_one(
    call: &ToolCall,
    staged: Staged,
    context: &RunContext,
    hooks: &HookPair<'_>,
    sink: &EventSink,
) -> ToolOutcome {
    let span = info_span!(
        "tool",
        tool.name = %call.name,
        tool.id = %call.id,
        tool.input = %call.arguments,
        tool.output = tracing::field::Empty,
        tool.success = tracing::field::Empty,
        error = tracing::field::Empty,
    );

    async {
        sink.emit(RunEvent::ToolStarted {
            id: call.id.clone(),
            name: call.name.clone(),
        });
        hooks.tool_start(context, &call.name).await;

        let started = Instant::now();
        let kind = match staged {
            Staged::Rejected(message) => {
                warn!(tool = %call.name, error = %message, "Tool call rejected before execution");
                OutcomeKind::Error(message)
            }
            Staged::Ready(tool) => match tool.call_json(call.arguments.clone(), context).await {
                Ok(value) => match TransferSignal::from_value(&value) {
                    Some(signal) => OutcomeKind::Transfer(signal),
                    None => OutcomeKind::Value(value),
                },
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool execution failed");
                    OutcomeKind::Error(e.to_string())
                }
            },
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = ToolOutcome {
            call: call.clone(),
            kind,
            duration_ms,
        };
        let record = outcome.record();

        let current = tracing::Span::current();
        current.record("tool.success", !record.is_error());
        current.record("tool.output", record.result.to_string().as_str());
        if let Some(error) = &record.error {
            current.record("error", error.as_str());
        }

        hooks.tool_end(context, &call.name, &record).await;
        sink.emit(RunEvent::ToolCompleted { record });

        outcome
    }
    .instrument(span)
    .await
}
