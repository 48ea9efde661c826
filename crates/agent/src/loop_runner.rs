//! The agent iteration loop.
//!
//! One [`AgentCore`] drives one session. Each turn walks
//! Thinking → (Responding | Acting → [AwaitingApproval] → ExecutingTools →
//! Observing → Thinking …) until the backend answers without tool calls or
//! the iteration budget runs out. The session lock is held for the whole
//! turn, so two turns never interleave on the same history.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crucible_core::agent::{AgentPhase, ApprovalRequest};
use crucible_core::backend::{Backend, BackendEvent, BackendRequest, BackendResponse};
use crucible_core::error::{BackendError, Error};
use crucible_core::event::AgentEvent;
use crucible_core::message::{Conversation, ConversationId, Message, ToolCallRequest};
use crucible_core::session::SessionDocument;
use crucible_core::tool::{ToolOutput, ToolRegistry};
use crucible_core::usage::UsageInfo;
use futures::future::join_all;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use crate::approval::{ApprovalState, Approver, denial};
use crate::cost::CostTracker;
use crate::doom_loop::DoomLoopTracker;
use crate::result_store::{self, PEEK_TOOL_NAME, ResultStore, StoredResult};
use crate::settings::AgentSettings;

/// Agent event channel capacity for streaming turns.
const EVENT_BUFFER: usize = 128;

/// Everything a session owns between turns.
struct SessionState {
    conversation: Conversation,
    results: ResultStore,
    doom: DoomLoopTracker,
    approvals: ApprovalState,
    cost: CostTracker,
}

impl SessionState {
    fn new(settings: &AgentSettings) -> Self {
        Self {
            conversation: Conversation::new(),
            results: ResultStore::new(settings.max_stored_results),
            doom: DoomLoopTracker::new(settings.doom_loop_threshold),
            approvals: ApprovalState::default(),
            cost: CostTracker::new(settings.pricing.clone()),
        }
    }

    fn clear(&mut self) {
        self.conversation.clear();
        self.results.clear();
        self.doom.clear();
        self.approvals.clear();
        self.cost.reset();
    }
}

/// How a turn ended, when it ended normally.
struct TurnOutcome {
    text: String,
    iterations: u32,
    usage: UsageInfo,
    turn_cost: f64,
    session_cost: f64,
}

impl TurnOutcome {
    fn new(text: String, iterations: u32, cost: &CostTracker) -> Self {
        Self {
            text,
            iterations,
            usage: cost.turn_usage(),
            turn_cost: cost.turn_cost(),
            session_cost: cost.session_cost(),
        }
    }
}

enum TurnError {
    Backend(BackendError),
    /// The stream consumer went away
    Cancelled,
}

impl From<BackendError> for TurnError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

/// Where a turn's events go. Blocking turns have no sink.
struct Events<'a> {
    tx: Option<&'a mpsc::Sender<AgentEvent>>,
}

impl<'a> Events<'a> {
    fn none() -> Self {
        Self { tx: None }
    }

    fn to(tx: &'a mpsc::Sender<AgentEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    fn is_streaming(&self) -> bool {
        self.tx.is_some()
    }

    async fn emit(&self, event: AgentEvent) -> Result<(), TurnError> {
        match self.tx {
            Some(tx) => tx.send(event).await.map_err(|_| TurnError::Cancelled),
            None => Ok(()),
        }
    }

    /// Await `fut`, giving up early if the consumer goes away.
    async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, TurnError> {
        match self.tx {
            Some(tx) => tokio::select! {
                out = fut => Ok(out),
                _ = tx.closed() => Err(TurnError::Cancelled),
            },
            None => Ok(fut.await),
        }
    }
}

/// The agent core: one per session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct AgentCore {
    backend: Arc<dyn Backend>,
    tools: Arc<ToolRegistry>,
    approver: Arc<dyn Approver>,
    settings: Arc<AgentSettings>,
    state: Arc<Mutex<SessionState>>,
    phase: Arc<watch::Sender<AgentPhase>>,
}

impl AgentCore {
    pub fn new(
        backend: Arc<dyn Backend>,
        tools: Arc<ToolRegistry>,
        approver: Arc<dyn Approver>,
        settings: AgentSettings,
    ) -> Self {
        let state = SessionState::new(&settings);
        let (phase, _) = watch::channel(AgentPhase::Idle);
        Self {
            backend,
            tools,
            approver,
            settings: Arc::new(settings),
            state: Arc::new(Mutex::new(state)),
            phase: Arc::new(phase),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Current loop phase.
    pub fn phase(&self) -> AgentPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    pub fn watch_phase(&self) -> watch::Receiver<AgentPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: AgentPhase) {
        self.phase.send_replace(phase);
    }

    /// Run one turn to completion and return the final text.
    ///
    /// Only backend errors that survived retries are returned as `Err`.
    /// Running out of iterations is a normal outcome with a fixed message.
    pub async fn process(&self, goal: impl Into<String>) -> Result<String, Error> {
        match self.run_turn(goal.into(), Events::none()).await {
            Ok(outcome) => Ok(outcome.text),
            Err(TurnError::Backend(e)) => Err(Error::Backend(e)),
            Err(TurnError::Cancelled) => Err(Error::Internal("turn cancelled".into())),
        }
    }

    /// Run one turn in a background task, streaming its events.
    ///
    /// The last event is `TurnComplete` or `Error`. Dropping the receiver
    /// abandons the turn at its next suspension point.
    pub fn process_stream(&self, goal: impl Into<String>) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let core = self.clone();
        let goal = goal.into();

        tokio::spawn(async move {
            let terminal = match core.run_turn(goal, Events::to(&tx)).await {
                Ok(outcome) => AgentEvent::TurnComplete {
                    text: outcome.text,
                    usage: outcome.usage,
                    turn_cost: outcome.turn_cost,
                    session_cost: outcome.session_cost,
                    iterations: outcome.iterations,
                },
                Err(TurnError::Backend(e)) => {
                    warn!(error = %e, "Turn aborted by backend failure");
                    AgentEvent::Error {
                        message: e.to_string(),
                    }
                }
                Err(TurnError::Cancelled) => {
                    debug!("Stream consumer dropped, turn abandoned");
                    return;
                }
            };
            let _ = tx.send(terminal).await;
        });

        rx
    }

    async fn run_turn(&self, goal: String, events: Events<'_>) -> Result<TurnOutcome, TurnError> {
        let mut state = self.state.lock().await;
        let result = self.drive(&mut state, goal, &events).await;
        self.set_phase(AgentPhase::Idle);
        result
    }

    async fn drive(
        &self,
        state: &mut SessionState,
        goal: String,
        events: &Events<'_>,
    ) -> Result<TurnOutcome, TurnError> {
        let max_iterations = self.settings.max_iterations;
        state.cost.begin_turn();
        state.conversation.push(Message::user(goal));

        info!(
            session_id = %state.conversation.id,
            messages = state.conversation.len(),
            streaming = events.is_streaming(),
            "Processing turn"
        );

        for iteration in 1..=max_iterations {
            self.set_phase(AgentPhase::Thinking);
            debug!(session_id = %state.conversation.id, iteration, "Agent loop iteration");

            let request = self.build_request(state);
            let response = if events.is_streaming() {
                self.stream_response(request, events).await?
            } else {
                self.backend.complete(request).await?
            };

            if let Some(usage) = &response.usage {
                state.cost.record(usage);
            }

            if response.tool_calls.is_empty() {
                self.set_phase(AgentPhase::Responding);
                let text = response.text.unwrap_or_default();
                state.conversation.push(Message::assistant(text.clone()));
                return Ok(TurnOutcome::new(text, iteration, &state.cost));
            }

            self.set_phase(AgentPhase::Acting);
            debug!(tool_count = response.tool_calls.len(), "Executing tool calls");
            self.act(state, response, events).await?;
        }

        warn!(
            session_id = %state.conversation.id,
            max_iterations,
            "Max iterations reached without a final response"
        );
        let text = format!("Reached max iterations ({max_iterations}) without a final response.");
        events
            .emit(AgentEvent::TextDelta { text: text.clone() })
            .await?;
        Ok(TurnOutcome::new(text, max_iterations, &state.cost))
    }

    fn build_request(&self, state: &SessionState) -> BackendRequest {
        let mut tools = self.tools.schemas();
        if !state.results.is_empty() {
            tools.push(result_store::peek_schema(self.settings.threshold_chars));
        }
        BackendRequest {
            history: state.conversation.messages.clone(),
            tools,
            system_prompt: self.settings.system_prompt.clone(),
        }
    }

    /// Consume a backend stream, forwarding deltas and tool call starts,
    /// and fold it back into one response.
    async fn stream_response(
        &self,
        request: BackendRequest,
        events: &Events<'_>,
    ) -> Result<BackendResponse, TurnError> {
        let mut stream = events.guard(self.backend.complete_stream(request)).await??;
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        while let Some(item) = events.guard(stream.recv()).await? {
            match item? {
                BackendEvent::TextDelta { text: delta } => {
                    text.push_str(&delta);
                    events.emit(AgentEvent::TextDelta { text: delta }).await?;
                }
                BackendEvent::ToolCallStart { call } => {
                    events
                        .emit(AgentEvent::ToolCallStart {
                            call_id: call.call_id.clone(),
                            tool_name: call.tool_name.clone(),
                            arguments: call.arguments.clone(),
                        })
                        .await?;
                    tool_calls.push(call);
                }
                BackendEvent::TurnComplete { usage } => {
                    return Ok(BackendResponse {
                        text: (!text.is_empty()).then_some(text),
                        tool_calls,
                        usage,
                    });
                }
            }
        }

        Err(BackendError::StreamInterrupted("stream ended before the turn completed".into()).into())
    }

    /// Gate, execute and observe one batch of tool calls.
    async fn act(
        &self,
        state: &mut SessionState,
        response: BackendResponse,
        events: &Events<'_>,
    ) -> Result<(), TurnError> {
        let calls = response.tool_calls;
        let mut outputs: Vec<Option<(ToolOutput, u64)>> = vec![None; calls.len()];
        let mut runnable = Vec::with_capacity(calls.len());

        // Approvals are asked in request order.
        for (i, call) in calls.iter().enumerate() {
            if call.tool_name == PEEK_TOOL_NAME {
                let output = result_store::run_peek(
                    &state.results,
                    &call.arguments,
                    self.settings.default_peek_limit,
                    self.settings.threshold_chars,
                );
                outputs[i] = Some((output, 0));
            } else if self.approve(state, call, events).await? {
                runnable.push(i);
            } else {
                outputs[i] = Some((denial(&call.tool_name), 0));
            }
        }

        self.set_phase(AgentPhase::ExecutingTools);
        let executed = if self.settings.parallel_tool_calls {
            join_all(runnable.iter().map(|&i| timed_execute(&self.tools, &calls[i]))).await
        } else {
            let mut done = Vec::with_capacity(runnable.len());
            for &i in &runnable {
                done.push(timed_execute(&self.tools, &calls[i]).await);
            }
            done
        };
        for (i, outcome) in runnable.into_iter().zip(executed) {
            outputs[i] = Some(outcome);
        }

        self.set_phase(AgentPhase::Observing);
        let mut results = Vec::with_capacity(calls.len());
        let mut corrections = Vec::new();
        for (call, outcome) in calls.iter().zip(outputs) {
            let (output, elapsed_ms) =
                outcome.unwrap_or_else(|| (ToolOutput::error("Tool call was not executed"), 0));
            let is_error = output.is_error();
            let value = self.bound_result(state, call, output.into_value());
            if let Some(message) = state.doom.record(&call.tool_name, &call.arguments, is_error) {
                corrections.push(message);
            }
            results.push((value, is_error, elapsed_ms));
        }

        // The whole batch lands in history before anything is emitted.
        state
            .conversation
            .push(Message::tool_calls(response.text, calls.clone()));
        for (call, (value, _, _)) in calls.iter().zip(&results) {
            state.conversation.push(Message::tool_result(
                call.call_id.clone(),
                call.tool_name.clone(),
                value.clone(),
            ));
        }
        for message in corrections {
            state.conversation.push(Message::system(message));
        }

        for (call, (result, is_error, elapsed_ms)) in calls.into_iter().zip(results) {
            events
                .emit(AgentEvent::ToolCallResult {
                    call_id: call.call_id,
                    tool_name: call.tool_name,
                    result,
                    is_error,
                    elapsed_ms,
                })
                .await?;
        }

        Ok(())
    }

    /// Ask for consent if the call needs it. Returns whether it may run.
    async fn approve(
        &self,
        state: &mut SessionState,
        call: &ToolCallRequest,
        events: &Events<'_>,
    ) -> Result<bool, TurnError> {
        let requires = self.tools.requires_approval(&call.tool_name);
        if !state
            .approvals
            .needs_consent(&call.tool_name, requires, self.settings.auto_approve)
        {
            return Ok(true);
        }

        self.set_phase(AgentPhase::AwaitingApproval);
        events
            .emit(AgentEvent::ApprovalRequested {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            })
            .await?;

        let request = ApprovalRequest {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        };
        let decision = events.guard(self.approver.decide(&request)).await?;
        info!(tool = %call.tool_name, call_id = %call.call_id, ?decision, "Approval decided");

        state.approvals.record(&call.tool_name, decision);
        self.set_phase(AgentPhase::Acting);
        Ok(decision.is_allowed())
    }

    /// Replace an oversized result with a placeholder, keeping the payload
    /// in the result store.
    fn bound_result(
        &self,
        state: &mut SessionState,
        call: &ToolCallRequest,
        value: serde_json::Value,
    ) -> serde_json::Value {
        if call.tool_name == PEEK_TOOL_NAME {
            return value;
        }

        let payload = result_store::serialize_payload(&value);
        let size = payload.chars().count();
        if size <= self.settings.threshold_chars {
            return value;
        }

        let stored = StoredResult {
            call_id: call.call_id.clone(),
            size,
        };
        let placeholder = result_store::placeholder(
            &stored,
            &payload,
            self.settings.preview_chars,
            self.settings.threshold_chars,
        );
        state.results.store(&call.call_id, payload);
        info!(
            tool = %call.tool_name,
            call_id = %call.call_id,
            size,
            "Oversized result moved to the result store"
        );
        placeholder
    }

    /// Clear history, stored results, failure counters, approvals and cost.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.clear();
        info!(session_id = %state.conversation.id, "Session reset");
    }

    /// The session as a persistable document. Stored-result payloads are
    /// not part of it; history only holds their placeholders.
    pub async fn snapshot(&self) -> SessionDocument {
        let state = self.state.lock().await;
        let mut document = SessionDocument::new(state.conversation.id.to_string());
        document.history = state.conversation.messages.clone();
        document.data.insert(
            "session_cost".into(),
            serde_json::json!(state.cost.session_cost()),
        );
        if let Ok(usage) = serde_json::to_value(state.cost.session_usage()) {
            document.data.insert("usage".into(), usage);
        }
        document
    }

    /// Replace the session with a persisted one. The result store starts
    /// empty; placeholders in the restored history can no longer be paged.
    pub async fn restore(&self, document: SessionDocument) {
        let mut state = self.state.lock().await;
        state.clear();

        let mut conversation = Conversation::with_id(ConversationId(document.id));
        conversation.messages = document.history;
        state.conversation = conversation;

        let usage = document
            .data
            .get("usage")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let cost = document
            .data
            .get("session_cost")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        state.cost.resume(usage, cost);

        info!(
            session_id = %state.conversation.id,
            messages = state.conversation.len(),
            "Session restored"
        );
    }

    pub async fn session_id(&self) -> ConversationId {
        self.state.lock().await.conversation.id.clone()
    }

    pub async fn history(&self) -> Vec<Message> {
        self.state.lock().await.conversation.messages.clone()
    }

    pub async fn session_cost(&self) -> f64 {
        self.state.lock().await.cost.session_cost()
    }

    pub async fn session_usage(&self) -> UsageInfo {
        self.state.lock().await.cost.session_usage()
    }

    pub async fn always_allowed(&self) -> Vec<String> {
        self.state.lock().await.approvals.always_allowed()
    }

    /// Number of payloads currently held in the result store.
    pub async fn stored_results(&self) -> usize {
        self.state.lock().await.results.len()
    }
}

async fn timed_execute(tools: &ToolRegistry, call: &ToolCallRequest) -> (ToolOutput, u64) {
    let started = Instant::now();
    let output = tools.execute(call).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    debug!(tool = %call.tool_name, elapsed_ms, error = output.is_error(), "Tool finished");
    (output, elapsed_ms)
}
