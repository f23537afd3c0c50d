//! The execution loop.
//!
//! [`Runner`] drives a registered agent turn by turn:
//!
//! 1. Check the cancellation signal and the per-agent / whole-run budgets
//! 2. Resolve instructions and build the tool set (transfer tools merged)
//! 3. Invoke the model
//! 4. Dispatch any requested tool calls in parallel
//! 5. Record the step, apply at most one transfer, loop
//!
//! Input guardrails run once before the first model call; output guardrails
//! run once on the final assistant text. A tool call that needs an
//! unrecorded approval pauses the run with a serializable
//! [`RunSnapshot`]; [`Runner::resume`] continues at the point before the
//! suspended dispatch.
//!
//! Fatal errors do not escape as `Err`: the runner returns a
//! [`RunResult`] carrying the partial transcript and a [`RunError`], and
//! persists already-produced messages to the session first (input
//! guardrail rejections excepted — nothing new exists to store). `Err` is
//! reserved for setup problems such as unregistered agents or session
//! reads failing before the loop starts.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt as _;
use futures::future::join_all;
use serde_json::Value;
use tracing::{Instrument as _, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::dispatch::{DispatchVerdict, ToolOutcome, dispatch};
use super::events::{EventSink, RunEvent};
use super::hook::HookPair;
use super::result::{
    AgentMetrics, RunError, RunErrorKind, RunMetadata, RunResult, RunStatus, StepResult,
    ToolCallRecord,
};
use super::state::{PendingApproval, PendingStep, RunSnapshot};
use super::streaming::StreamedRun;
use super::{Agent, AgentId, AgentRegistry};
use crate::callback::{CancelSignal, NoopRunHooks, RunContext, RunHooks, SharedRunHooks};
use crate::error::{Error, Result};
use crate::guardrail::GuardrailStage;
use crate::message::{Message, ToolCall};
use crate::model::{FinishReason, Model, ModelDelta, ModelRequest, ModelResponse, default_model};
use crate::session::Session;
use crate::tool::{DynTool, SharedTool, ToolSet};
use crate::transfer::{TransferTool, handoff_messages, originating_query};
use crate::usage::{Usage, UsageTracker};

/// Run-level configuration: session, hooks, user context, cancellation.
#[derive(Default, Clone)]
pub struct RunConfig {
    /// Session to read history from before the loop and write the
    /// transcript to afterwards.
    pub session: Option<Arc<dyn Session>>,
    /// Run-level lifecycle hooks.
    pub hooks: Option<SharedRunHooks>,
    /// Opaque user context, passed through to tools and instructions.
    pub context: Value,
    /// Cancellation signal. A fresh one is created when absent.
    pub cancel: Option<CancelSignal>,
}

impl RunConfig {
    /// Create an empty run configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session.
    #[must_use]
    pub fn session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Attach run-level hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: impl RunHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Set the user context value.
    #[must_use]
    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Attach a cancellation signal.
    #[must_use]
    pub fn cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("has_session", &self.session.is_some())
            .field("has_hooks", &self.hooks.is_some())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Stateless execution engine.
///
/// `Runner` owns no state; everything per-run lives in an internal record,
/// so runs for different agents (or the same agent) may execute
/// concurrently in one process.
#[derive(Debug, Clone, Copy)]
pub struct Runner;

impl Runner {
    /// Execute a run to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for setup problems: an unregistered agent id, a
    /// missing model with no process default, or a session read failing
    /// before the loop starts. Fatal *run* errors come back inside the
    /// [`RunResult`].
    pub async fn run(
        registry: &AgentRegistry,
        root: AgentId,
        input: impl Into<String>,
        config: RunConfig,
    ) -> Result<RunResult> {
        Self::run_with_sink(registry, root, input.into(), config, None).await
    }

    /// Resume a paused run from its snapshot.
    ///
    /// The caller is responsible for marking pending approvals granted or
    /// denied first; calls still undecided pause the run again.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the snapshot's agents are not present in the
    /// registry.
    pub async fn resume(
        registry: &AgentRegistry,
        snapshot: RunSnapshot,
        config: RunConfig,
    ) -> Result<RunResult> {
        Self::resume_with_sink(registry, snapshot, config, None).await
    }

    /// Execute a run with streaming output.
    ///
    /// The run is spawned onto the runtime; the returned [`StreamedRun`]
    /// exposes the full event stream, a text-delta-only stream, and the
    /// completion future.
    #[must_use]
    pub fn run_streamed(
        registry: Arc<AgentRegistry>,
        root: AgentId,
        input: impl Into<String>,
        config: RunConfig,
    ) -> StreamedRun {
        StreamedRun::spawn(registry, root, input.into(), config)
    }

    /// Resume a paused run with streaming output.
    #[must_use]
    pub fn resume_streamed(
        registry: Arc<AgentRegistry>,
        snapshot: RunSnapshot,
        config: RunConfig,
    ) -> StreamedRun {
        StreamedRun::spawn_resume(registry, snapshot, config)
    }

    pub(super) async fn run_with_sink(
        registry: &AgentRegistry,
        root: AgentId,
        input: String,
        config: RunConfig,
        tx: Option<tokio::sync::mpsc::UnboundedSender<RunEvent>>,
    ) -> Result<RunResult> {
        let root_agent = registry
            .get(root)
            .ok_or_else(|| Error::configuration("agent id is not registered in this registry"))?;
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "run",
            run.id = %run_id,
            agent.name = %root_agent.name(),
            agent.max_steps = root_agent.max_steps(),
        );
        Self::run_inner(registry, root, root_agent, run_id, input, config, tx)
            .instrument(span)
            .await
    }

    #[allow(clippy::too_many_lines)]
    async fn run_inner(
        registry: &AgentRegistry,
        root: AgentId,
        root_agent: &Agent,
        run_id: Uuid,
        input: String,
        config: RunConfig,
        tx: Option<tokio::sync::mpsc::UnboundedSender<RunEvent>>,
    ) -> Result<RunResult> {
        let cancel = config.cancel.clone().unwrap_or_default();

        // Session reads happen before the loop starts.
        let history = match &config.session {
            Some(session) => session.get_history().await?,
            None => Vec::new(),
        };
        let user_message = Message::user(input);
        let mut window = history;
        window.push(user_message.clone());

        let mut state = RunState {
            run_id,
            root_name: root_agent.name().to_owned(),
            current: root,
            model_fallback: default_model(),
            context: RunContext::new(config.context.clone()).with_cancel(cancel.clone()),
            window,
            transcript: vec![user_message.clone()],
            steps: Vec::new(),
            tracker: UsageTracker::new(),
            guardrail_usage: Usage::zero(),
            step: 0,
            steps_under_agent: 0,
            handoff_chain: vec![root_agent.name().to_owned()],
            metrics: vec![AgentMetrics::new(root_agent.name())],
            agent_clock: Instant::now(),
            pending_approvals: Vec::new(),
            pending_agent_start: false,
            cancel,
            sink: EventSink::new(tx),
        };
        state.sink.emit(RunEvent::RunStarted {
            run_id,
            agent: root_agent.name().to_owned(),
        });
        info!(agent = %root_agent.name(), "Agent run started");

        let noop = NoopRunHooks;
        let run_hooks: &dyn RunHooks = config.hooks.as_deref().unwrap_or(&noop);
        let hooks = HookPair::new(run_hooks, root_agent.hooks.as_deref(), root_agent.name());

        state.refresh_context(root_agent.name());
        hooks.agent_start(&state.context).await;

        // Input guardrails run once, before the first model call.
        let input_text = user_message.text();
        for guardrail in root_agent.input_guardrails() {
            let verdict = match guardrail
                .run(&state.context, root_agent.name(), &input_text)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    let err = Error::guardrail(
                        GuardrailStage::Input,
                        guardrail.name(),
                        format!("check failed: {e}"),
                    );
                    hooks.error(&state.context, &err).await;
                    return Ok(close_failed(
                        state,
                        root_agent.name(),
                        RunError::new(RunErrorKind::InputGuardrail, err.to_string()),
                    ));
                }
            };
            if let Some(usage) = verdict.usage {
                state.guardrail_usage += usage;
            }
            if !verdict.passed {
                let message = verdict
                    .message
                    .unwrap_or_else(|| "input rejected".to_owned());
                let err = Error::guardrail(GuardrailStage::Input, guardrail.name(), &message);
                warn!(guardrail = %guardrail.name(), %message, "Input guardrail rejected the run");
                hooks.error(&state.context, &err).await;
                // Nothing beyond the rejected input exists, so the session
                // is not written.
                return Ok(close_failed(
                    state,
                    root_agent.name(),
                    RunError::new(RunErrorKind::InputGuardrail, err.to_string()),
                ));
            }
        }

        drive(registry, state, run_hooks, &config, None).await
    }

    pub(super) async fn resume_with_sink(
        registry: &AgentRegistry,
        snapshot: RunSnapshot,
        config: RunConfig,
        tx: Option<tokio::sync::mpsc::UnboundedSender<RunEvent>>,
    ) -> Result<RunResult> {
        let current = registry
            .by_name(&snapshot.current_agent)
            .ok_or_else(|| Error::UnknownAgent(snapshot.current_agent.clone()))?;
        let cancel = config.cancel.clone().unwrap_or_default();

        let state = RunState {
            run_id: snapshot.run_id,
            root_name: snapshot.root_agent,
            current,
            model_fallback: default_model(),
            context: RunContext::new(snapshot.context).with_cancel(cancel.clone()),
            window: snapshot.messages,
            transcript: snapshot.transcript,
            steps: snapshot.steps_taken,
            tracker: snapshot.usage,
            guardrail_usage: snapshot.guardrail_usage,
            step: snapshot.step,
            steps_under_agent: snapshot.steps_under_agent,
            handoff_chain: snapshot.handoff_chain,
            metrics: snapshot.agent_metrics,
            agent_clock: Instant::now(),
            pending_approvals: snapshot.pending_approvals,
            pending_agent_start: false,
            cancel,
            sink: EventSink::new(tx),
        };
        state.sink.emit(RunEvent::RunStarted {
            run_id: state.run_id,
            agent: snapshot.current_agent.clone(),
        });
        info!(agent = %snapshot.current_agent, run.id = %state.run_id, "Resuming paused run");

        let noop = NoopRunHooks;
        let run_hooks: &dyn RunHooks = config.hooks.as_deref().unwrap_or(&noop);
        let resume = Some((snapshot.pending_calls, snapshot.pending_step));
        drive(registry, state, run_hooks, &config, resume).await
    }
}

/// Everything mutable that accumulates during one run.
struct RunState {
    run_id: Uuid,
    root_name: String,
    current: AgentId,
    model_fallback: Option<Arc<dyn Model>>,
    context: RunContext,
    /// The working message list presented to the current agent's model.
    window: Vec<Message>,
    /// Every message produced during this run (session history excluded).
    transcript: Vec<Message>,
    steps: Vec<StepResult>,
    tracker: UsageTracker,
    guardrail_usage: Usage,
    step: u64,
    steps_under_agent: u64,
    handoff_chain: Vec<String>,
    metrics: Vec<AgentMetrics>,
    agent_clock: Instant,
    pending_approvals: Vec<PendingApproval>,
    pending_agent_start: bool,
    cancel: CancelSignal,
    sink: EventSink,
}

impl RunState {
    fn refresh_context(&mut self, agent_name: &str) {
        self.context.set_agent_name(agent_name);
        self.context.set_step(self.step + 1);
        self.context.set_messages(self.window.clone());
        self.context.set_usage(self.tracker);
    }

    fn metrics_for(&mut self, agent_name: &str) -> &mut AgentMetrics {
        if let Some(pos) = self
            .metrics
            .iter()
            .position(|m| m.agent_name == agent_name)
        {
            &mut self.metrics[pos]
        } else {
            self.metrics.push(AgentMetrics::new(agent_name));
            self.metrics.last_mut().expect("just pushed")
        }
    }

    fn flush_agent_clock(&mut self, agent_name: &str) {
        let elapsed = u64::try_from(self.agent_clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.metrics_for(agent_name).duration_ms += elapsed;
        self.agent_clock = Instant::now();
    }

    async fn write_session(&self, config: &RunConfig) {
        if let Some(session) = &config.session
            && let Err(e) = session.add_messages(&self.transcript).await
        {
            // Session write failure never overrides the run outcome.
            warn!(error = %e, "Failed to persist run transcript to session");
        }
    }

    fn into_result(
        self,
        status: RunStatus,
        final_output: Option<Value>,
        snapshot: Option<RunSnapshot>,
        error: Option<RunError>,
        pending_approvals: Vec<PendingApproval>,
        output_parse_error: Option<String>,
    ) -> RunResult {
        let finish_reason = self
            .steps
            .last()
            .map_or(FinishReason::Stop, |s| s.finish_reason);
        let metadata = RunMetadata {
            run_id: self.run_id,
            prompt_tokens: self.tracker.input_tokens(),
            completion_tokens: self.tracker.output_tokens(),
            total_tokens: self.tracker.total_tokens(),
            finish_reason,
            total_tool_calls: self.tracker.tool_calls(),
            handoff_chain: self.handoff_chain,
            agent_metrics: self.metrics,
            guardrail_usage: self.guardrail_usage,
            output_parse_error,
            pending_approvals,
        };
        RunResult {
            status,
            final_output,
            messages: self.transcript,
            steps: self.steps,
            state: snapshot,
            metadata,
            error,
        }
    }
}

/// Close a run as failed without a session write.
fn close_failed(mut state: RunState, agent_name: &str, error: RunError) -> RunResult {
    state.flush_agent_clock(agent_name);
    let sink = state.sink.clone();
    let result = state.into_result(RunStatus::Failed, None, None, Some(error), Vec::new(), None);
    sink.emit(RunEvent::RunCompleted {
        result: Box::new(result.clone()),
    });
    result
}

/// Fail the run, firing error hooks and (optionally) persisting the
/// partial transcript first.
async fn fail(
    state: RunState,
    agent_name: &str,
    hooks: &HookPair<'_>,
    err: Error,
    kind: RunErrorKind,
    write_session: bool,
    config: &RunConfig,
) -> RunResult {
    error!(error = %err, agent = %agent_name, "Run failed");
    hooks.error(&state.context, &err).await;
    if write_session {
        state.write_session(config).await;
    }
    close_failed(state, agent_name, RunError::new(kind, err.to_string()))
}

/// Pause the run, serializing everything needed to resume before the
/// suspended dispatch.
fn pause(
    mut state: RunState,
    agent_name: &str,
    calls: Vec<ToolCall>,
    pending_step: PendingStep,
    pending: Vec<PendingApproval>,
) -> RunResult {
    info!(agent = %agent_name, pending = pending.len(), "Run paused for tool approval");
    state.flush_agent_clock(agent_name);
    let snapshot = RunSnapshot {
        run_id: state.run_id,
        root_agent: state.root_name.clone(),
        current_agent: agent_name.to_owned(),
        context: state.context.context().clone(),
        messages: state.window.clone(),
        transcript: state.transcript.clone(),
        step: state.step,
        steps_under_agent: state.steps_under_agent,
        handoff_chain: state.handoff_chain.clone(),
        usage: state.tracker,
        guardrail_usage: state.guardrail_usage,
        agent_metrics: state.metrics.clone(),
        steps_taken: state.steps.clone(),
        pending_calls: calls,
        pending_step,
        pending_approvals: pending.clone(),
    };
    state.sink.emit(RunEvent::RunPaused {
        approvals: pending.clone(),
    });
    let sink = state.sink.clone();
    let result = state.into_result(
        RunStatus::Paused,
        None,
        Some(snapshot),
        None,
        pending,
        None,
    );
    sink.emit(RunEvent::RunCompleted {
        result: Box::new(result.clone()),
    });
    result
}

#[allow(clippy::too_many_lines)]
async fn drive(
    registry: &AgentRegistry,
    mut state: RunState,
    run_hooks: &dyn RunHooks,
    config: &RunConfig,
    mut resume_dispatch: Option<(Vec<ToolCall>, PendingStep)>,
) -> Result<RunResult> {
    loop {
        let Some(agent) = registry.get(state.current) else {
            return Err(Error::configuration("current agent is not registered"));
        };
        let hooks = HookPair::new(run_hooks, agent.hooks.as_deref(), agent.name());
        state.refresh_context(agent.name());

        if state.pending_agent_start {
            state.pending_agent_start = false;
            hooks.agent_start(&state.context).await;
        }

        // A resumed run re-dispatches the suspended step's calls before
        // any new model call; its model call was already counted.
        if let Some((calls, pending_step)) = resume_dispatch.take() {
            let tool_set = build_tool_set(agent, registry, &state, &hooks).await;
            match dispatch(
                &calls,
                &tool_set,
                &state.context,
                &hooks,
                &state.sink,
                &state.pending_approvals,
            )
            .await
            {
                DispatchVerdict::NeedsApproval(pending) => {
                    return Ok(pause(state, agent.name(), calls, pending_step, pending));
                }
                DispatchVerdict::Completed(outcomes) => {
                    state.pending_approvals.clear();
                    apply_outcomes(registry, &mut state, agent, &hooks, outcomes, pending_step)
                        .await;
                    continue;
                }
            }
        }

        // Cancellation completes the current dispatch but skips the next
        // model call.
        if state.cancel.is_cancelled() {
            return Ok(fail(
                state,
                agent.name(),
                &hooks,
                Error::Cancelled,
                RunErrorKind::Cancelled,
                true,
                config,
            )
            .await);
        }

        // Per-agent step budget (reset on transfer).
        if state.steps_under_agent >= agent.max_steps() {
            let err = Error::MaxStepsExceeded {
                agent: agent.name().to_owned(),
                max_steps: agent.max_steps(),
            };
            return Ok(fail(
                state,
                agent.name(),
                &hooks,
                err,
                RunErrorKind::MaxSteps,
                true,
                config,
            )
            .await);
        }

        // Whole-run token budget, checked before each model call.
        if let Some(limit) = agent.settings().max_tokens
            && state.tracker.total_tokens() >= limit
        {
            let err = Error::TokenBudgetExhausted {
                used: state.tracker.total_tokens(),
                limit,
            };
            return Ok(fail(
                state,
                agent.name(),
                &hooks,
                err,
                RunErrorKind::TokenBudget,
                true,
                config,
            )
            .await);
        }

        let Some(model) = agent
            .model()
            .cloned()
            .or_else(|| state.model_fallback.clone())
        else {
            return Err(Error::configuration(format!(
                "agent '{}' has no model and no default model is set",
                agent.name()
            )));
        };

        let system = agent.resolve_instructions(&state.context);
        let system = (!system.is_empty()).then_some(system);
        let tool_set = build_tool_set(agent, registry, &state, &hooks).await;

        debug!(agent = %agent.name(), step = state.step + 1, "Starting step");
        state.sink.emit(RunEvent::StepStarted {
            step: state.step + 1,
            agent: agent.name().to_owned(),
        });
        hooks
            .model_start(&state.context, system.as_deref(), &state.window)
            .await;

        let request = ModelRequest {
            system,
            messages: state.window.clone(),
            tools: tool_set.definitions(),
            settings: *agent.settings(),
            cancel: Some(state.cancel.clone()),
        };
        let response = if state.sink.is_active() {
            stream_generate(model.as_ref(), request, &state.sink).await
        } else {
            model.generate(request).await
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return Ok(fail(
                    state,
                    agent.name(),
                    &hooks,
                    e,
                    RunErrorKind::Model,
                    true,
                    config,
                )
                .await);
            }
        };
        hooks.model_end(&state.context, &response).await;

        state.step += 1;
        state.tracker.add_usage(response.usage);
        {
            let metrics = state.metrics_for(agent.name());
            metrics.turns += 1;
            metrics.usage += response.usage;
        }
        state.window.push(response.message.clone());
        state.transcript.push(response.message.clone());

        let calls: Vec<ToolCall> = response
            .message
            .tool_calls()
            .into_iter()
            .cloned()
            .collect();

        if calls.is_empty() {
            let step_result = StepResult {
                step: state.step,
                agent: agent.name().to_owned(),
                text: response.text(),
                finish_reason: response.finish_reason,
                tool_calls: Vec::new(),
                usage: response.usage,
            };
            state.sink.emit(RunEvent::StepCompleted {
                step: Box::new(step_result.clone()),
            });
            state.steps.push(step_result);

            if response.finish_reason.is_complete() {
                let raw_text = response.text().unwrap_or_default();
                return Ok(finalize(state, agent, &hooks, raw_text, config).await);
            }
            // Truncated or filtered with nothing to dispatch: keep
            // looping, bounded by the step budget.
            debug!(finish = %response.finish_reason, "No tool calls and no completion; continuing");
            state.steps_under_agent += 1;
            continue;
        }

        let pending_step = PendingStep {
            text: response.text(),
            finish_reason: response.finish_reason,
            usage: response.usage,
        };
        match dispatch(
            &calls,
            &tool_set,
            &state.context,
            &hooks,
            &state.sink,
            &state.pending_approvals,
        )
        .await
        {
            DispatchVerdict::NeedsApproval(pending) => {
                return Ok(pause(state, agent.name(), calls, pending_step, pending));
            }
            DispatchVerdict::Completed(outcomes) => {
                state.pending_approvals.clear();
                apply_outcomes(registry, &mut state, agent, &hooks, outcomes, pending_step).await;
            }
        }
    }
}

/// Consume the model's streaming response, forwarding text deltas.
async fn stream_generate(
    model: &dyn Model,
    request: ModelRequest,
    sink: &EventSink,
) -> Result<ModelResponse> {
    let mut stream = model.generate_stream(request).await?;
    let mut response = None;
    while let Some(item) = stream.next().await {
        match item? {
            ModelDelta::Text(delta) => sink.emit(RunEvent::TextDelta { delta }),
            ModelDelta::Done(done) => response = Some(*done),
        }
    }
    response.ok_or_else(|| Error::model("model stream ended without a final response"))
}

/// Build the tool set for the current step: enabled agent tools first,
/// then synthesized transfer tools. On a name collision the agent-defined
/// tool wins and a warning is surfaced.
async fn build_tool_set(
    agent: &Agent,
    registry: &AgentRegistry,
    state: &RunState,
    hooks: &HookPair<'_>,
) -> ToolSet {
    let mut set = ToolSet::new();
    for tool in agent.tools() {
        if tool.is_enabled(&state.context).await {
            set.insert(SharedTool::clone(tool));
        }
    }
    for target_id in agent.handoffs() {
        let Some(target) = registry.get(*target_id) else {
            warn!(agent = %agent.name(), "Handoff target id is not registered; skipping");
            continue;
        };
        let transfer = TransferTool::new(target.name(), target.transfer_description());
        let tool_name = DynTool::name(&transfer).to_owned();
        if set.contains(&tool_name) {
            let message = format!(
                "agent tool '{tool_name}' shadows the transfer tool for agent '{}'",
                target.name()
            );
            warn!(agent = %agent.name(), %message, "Tool name collision");
            hooks.warning(&state.context, &message).await;
            state.sink.emit(RunEvent::Warning { message });
            continue;
        }
        set.insert(Arc::new(transfer));
    }
    set
}

/// Record the step, append tool-result messages, and apply the first
/// transfer signal (if any).
async fn apply_outcomes(
    registry: &AgentRegistry,
    state: &mut RunState,
    agent: &Agent,
    hooks: &HookPair<'_>,
    outcomes: Vec<ToolOutcome>,
    meta: PendingStep,
) {
    let dispatched = outcomes.len() as u64;
    state.tracker.increment_tool_calls(dispatched);
    state.metrics_for(agent.name()).tool_calls += dispatched;

    for outcome in &outcomes {
        let payload = outcome.payload();
        let message = if outcome.error().is_some() {
            Message::tool_error(&outcome.call.id, payload)
        } else {
            Message::tool_result(&outcome.call.id, payload)
        };
        state.window.push(message.clone());
        state.transcript.push(message);
    }

    let records: Vec<ToolCallRecord> = outcomes.iter().map(ToolOutcome::record).collect();
    let step_result = StepResult {
        step: state.step,
        agent: agent.name().to_owned(),
        text: meta.text,
        finish_reason: meta.finish_reason,
        tool_calls: records,
        usage: meta.usage,
    };
    state.sink.emit(RunEvent::StepCompleted {
        step: Box::new(step_result.clone()),
    });
    state.steps.push(step_result);

    // The first transfer signal in request order wins; any later ones were
    // recorded in the step result but are ignored.
    let Some(signal) = outcomes.iter().find_map(|o| o.transfer()) else {
        state.steps_under_agent += 1;
        return;
    };
    let target = agent
        .handoffs()
        .iter()
        .copied()
        .find(|id| registry.get(*id).is_some_and(|a| a.name() == signal.agent_name));
    let Some(target_id) = target else {
        let message = format!(
            "transfer signal targets unknown agent '{}'; continuing without transfer",
            signal.agent_name
        );
        warn!(agent = %agent.name(), target = %signal.agent_name, "Dropping transfer to unknown agent");
        hooks.warning(&state.context, &message).await;
        state.sink.emit(RunEvent::Warning { message });
        state.steps_under_agent += 1;
        return;
    };

    info!(from = %agent.name(), to = %signal.agent_name, "Transferring conversation");
    hooks
        .transfer(&state.context, &signal.agent_name, signal.reason.as_deref())
        .await;
    state.sink.emit(RunEvent::Transfer {
        from: agent.name().to_owned(),
        to: signal.agent_name.clone(),
        reason: signal.reason.clone(),
    });

    state.flush_agent_clock(agent.name());
    state.handoff_chain.push(signal.agent_name.clone());
    let _ = state.metrics_for(&signal.agent_name);
    state.current = target_id;
    state.steps_under_agent = 0;
    state.pending_agent_start = true;

    // The callee sees only the originating user query plus a synthetic
    // transfer note.
    let query = originating_query(&state.transcript);
    let reset = handoff_messages(signal, agent.name(), &query);
    if let Some(note) = reset.first() {
        state.transcript.push(note.clone());
    }
    state.window = reset;
}

/// Finalize a completed run: output schema, output guardrails, session
/// write, metadata.
async fn finalize(
    mut state: RunState,
    agent: &Agent,
    hooks: &HookPair<'_>,
    raw_text: String,
    config: &RunConfig,
) -> RunResult {
    // Output schema: the parse failure is surfaced, never retried or
    // silently coerced.
    let final_output = if let Some(schema) = agent.output_schema() {
        match schema.parse(&raw_text) {
            Ok(value) => value,
            Err(parse_error) => {
                let err = Error::OutputParse {
                    message: parse_error.clone(),
                };
                warn!(agent = %agent.name(), error = %parse_error, "Final output failed schema parse");
                hooks.error(&state.context, &err).await;
                state.write_session(config).await;
                state.flush_agent_clock(agent.name());
                let sink = state.sink.clone();
                let result = state.into_result(
                    RunStatus::Failed,
                    Some(Value::String(raw_text)),
                    None,
                    Some(RunError::new(RunErrorKind::OutputParse, err.to_string())),
                    Vec::new(),
                    Some(parse_error),
                );
                sink.emit(RunEvent::RunCompleted {
                    result: Box::new(result.clone()),
                });
                return result;
            }
        }
    } else {
        Value::String(raw_text.clone())
    };

    // Output guardrails run once, concurrently, on the final assistant
    // text.
    let guardrails = agent.output_guardrails();
    if !guardrails.is_empty() {
        let futures: Vec<_> = guardrails
            .iter()
            .map(|g| g.run(&state.context, agent.name(), &raw_text))
            .collect();
        let verdicts = join_all(futures).await;
        for (guardrail, verdict) in guardrails.iter().zip(verdicts) {
            let verdict = match verdict {
                Ok(verdict) => verdict,
                Err(e) => {
                    let err = Error::guardrail(
                        GuardrailStage::Output,
                        guardrail.name(),
                        format!("check failed: {e}"),
                    );
                    return fail(
                        state,
                        agent.name(),
                        hooks,
                        err,
                        RunErrorKind::OutputGuardrail,
                        true,
                        config,
                    )
                    .await;
                }
            };
            if let Some(usage) = verdict.usage {
                state.guardrail_usage += usage;
            }
            if !verdict.passed {
                let message = verdict
                    .message
                    .unwrap_or_else(|| "output rejected".to_owned());
                let err = Error::guardrail(GuardrailStage::Output, guardrail.name(), &message);
                return fail(
                    state,
                    agent.name(),
                    hooks,
                    err,
                    RunErrorKind::OutputGuardrail,
                    true,
                    config,
                )
                .await;
            }
        }
    }

    hooks.agent_end(&state.context, &final_output).await;

    // Session writes happen after the run completes.
    state.write_session(config).await;
    state.flush_agent_clock(agent.name());
    info!(
        agent = %agent.name(),
        steps = state.step,
        input_tokens = state.tracker.input_tokens(),
        output_tokens = state.tracker.output_tokens(),
        "Run completed",
    );

    let sink = state.sink.clone();
    let result = state.into_result(
        RunStatus::Complete,
        Some(final_output),
        None,
        None,
        Vec::new(),
        None,
    );
    sink.emit(RunEvent::RunCompleted {
        result: Box::new(result.clone()),
    });
    result
}
