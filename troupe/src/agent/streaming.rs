//! Streaming adapter over the runner's event channel.
//!
//! [`Runner::run_streamed`](super::Runner::run_streamed) spawns the run
//! onto the runtime and returns a [`StreamedRun`]: a handle holding the
//! event receiver, the completion future, and the run's cancellation
//! signal. Two derived views exist over the one event sequence — the full
//! [`RunEvent`] stream and a text-delta-only stream. Both are lazy and
//! non-restartable; consuming one consumes the underlying channel.
//!
//! The final result resolves separately through [`StreamedRun::finish`],
//! which also drains any unread events. Cancelling the handle triggers
//! cancellation of the underlying run.

use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::RunEvent;
use super::result::RunResult;
use super::runner::{RunConfig, Runner};
use super::state::RunSnapshot;
use super::{AgentId, AgentRegistry};
use crate::callback::CancelSignal;
use crate::error::{Error, Result};

/// Handle to a run executing in the background with streaming events.
#[derive(Debug)]
pub struct StreamedRun {
    events: mpsc::UnboundedReceiver<RunEvent>,
    handle: JoinHandle<Result<RunResult>>,
    cancel: CancelSignal,
}

impl StreamedRun {
    pub(super) fn spawn(
        registry: Arc<AgentRegistry>,
        root: AgentId,
        input: String,
        config: RunConfig,
    ) -> Self {
        let cancel = config.cancel.clone().unwrap_or_default();
        let config = RunConfig {
            cancel: Some(cancel.clone()),
            ..config
        };
        let (tx, events) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            Runner::run_with_sink(&registry, root, input, config, Some(tx)).await
        });
        Self {
            events,
            handle,
            cancel,
        }
    }

    pub(super) fn spawn_resume(
        registry: Arc<AgentRegistry>,
        snapshot: RunSnapshot,
        config: RunConfig,
    ) -> Self {
        let cancel = config.cancel.clone().unwrap_or_default();
        let config = RunConfig {
            cancel: Some(cancel.clone()),
            ..config
        };
        let (tx, events) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            Runner::resume_with_sink(&registry, snapshot, config, Some(tx)).await
        });
        Self {
            events,
            handle,
            cancel,
        }
    }

    /// The run's cancellation signal.
    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Cancel the underlying run. The current tool dispatch completes; the
    /// next model call is skipped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Receive the next event, or `None` once the run finished and the
    /// channel drained.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// The full event stream. Lazy and non-restartable; ends after
    /// [`RunEvent::RunCompleted`].
    pub fn events(&mut self) -> impl Stream<Item = RunEvent> + '_ {
        async_stream::stream! {
            while let Some(event) = self.events.recv().await {
                yield event;
            }
        }
    }

    /// The text-delta-only stream. Lazy and non-restartable; ends when the
    /// run reaches a terminal state.
    pub fn text_deltas(&mut self) -> impl Stream<Item = String> + '_ {
        async_stream::stream! {
            while let Some(event) = self.events.recv().await {
                match event {
                    RunEvent::TextDelta { delta } => yield delta,
                    RunEvent::RunCompleted { .. } => break,
                    _ => {}
                }
            }
        }
    }

    /// Await the final result, discarding any unread events.
    ///
    /// # Errors
    ///
    /// Propagates the run's setup error, or [`Error::Internal`] when the
    /// driver task panicked.
    pub async fn finish(mut self) -> Result<RunResult> {
        // Closing the receiver lets the driver finish unobserved.
        self.events.close();
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::internal(format!("run task failed: {e}"))),
        }
    }
}
