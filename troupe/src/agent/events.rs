//! Run lifecycle events emitted over the streaming channel.

use tokio::sync::mpsc;
use uuid::Uuid;

use super::result::{RunResult, StepResult, ToolCallRecord};
use super::state::PendingApproval;

/// An event observed during a streamed run.
///
/// Events are emitted in temporal order per run; across runs no ordering
/// is promised.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// The run started under the named root agent.
    RunStarted {
        /// Unique id of the run.
        run_id: Uuid,
        /// Name of the root agent.
        agent: String,
    },
    /// A step's model call is about to be made.
    StepStarted {
        /// The step number (1-indexed).
        step: u64,
        /// The current agent.
        agent: String,
    },
    /// Incremental text from the model.
    TextDelta {
        /// The text fragment.
        delta: String,
    },
    /// A tool call is being dispatched.
    ToolStarted {
        /// The call identifier.
        id: String,
        /// The tool name.
        name: String,
    },
    /// A tool call finished (result or error).
    ToolCompleted {
        /// The completed call record.
        record: ToolCallRecord,
    },
    /// Control transferred between agents.
    Transfer {
        /// The agent handing off.
        from: String,
        /// The agent taking over.
        to: String,
        /// Reason given by the model, if any.
        reason: Option<String>,
    },
    /// A step completed (model call plus any tool dispatch).
    StepCompleted {
        /// The step record.
        step: Box<StepResult>,
    },
    /// A non-fatal anomaly was observed.
    Warning {
        /// Description of the anomaly.
        message: String,
    },
    /// The run paused waiting for approvals.
    RunPaused {
        /// The outstanding approval requests.
        approvals: Vec<PendingApproval>,
    },
    /// The run reached a terminal state. Always the last event.
    RunCompleted {
        /// The final result (complete, paused, or failed).
        result: Box<RunResult>,
    },
}

impl RunEvent {
    /// The text fragment, when this is a text-delta event.
    #[must_use]
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            Self::TextDelta { delta } => Some(delta),
            _ => None,
        }
    }
}

/// Outbound side of the run event channel. Inactive for blocking runs.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventSink {
    pub fn new(tx: Option<mpsc::UnboundedSender<RunEvent>>) -> Self {
        Self { tx }
    }

    /// Whether a consumer is attached (drives streaming model calls).
    pub const fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    /// Emit an event. Send failures (dropped receiver) are ignored.
    pub fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
