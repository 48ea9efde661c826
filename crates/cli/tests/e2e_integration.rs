//! End-to-end tests for the Crucible engine.
//!
//! These drive the agent core and the protocol translator together, the
//! way a host does: goal in, envelopes out, session persisted between runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crucible_agent::{AgentCore, AgentSettings, AutoApprove, ChannelApprover};
use crucible_backends::{RetryPolicy, RetryingBackend};
use crucible_core::agent::ApprovalDecision;
use crucible_core::backend::{Backend, BackendEvent, BackendRequest, BackendResponse, BackendStream};
use crucible_core::error::{BackendError, ToolError};
use crucible_core::event::AgentEvent;
use crucible_core::message::{Message, ToolCallRequest};
use crucible_core::session::SessionStore;
use crucible_core::tool::{Tool, ToolRegistry};
use crucible_core::usage::{ModelPricing, UsageInfo};
use crucible_protocol::{CardKind, PromptKind, ProtocolEvent, Translator};
use crucible_sessions::FileSessionStore;
use serde_json::json;

// ── Scripted backend ─────────────────────────────────────────────────────

/// Replays scripted results. Streams text in small chunks so tags and
/// words arrive split across deltas, as they do from real providers.
struct ScriptedBackend {
    script: Mutex<VecDeque<Result<BackendResponse, BackendError>>>,
    requests: Mutex<Vec<BackendRequest>>,
    chunk_chars: usize,
}

impl ScriptedBackend {
    fn new(script: Vec<Result<BackendResponse, BackendError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            chunk_chars: 4,
        }
    }

    fn responses(responses: Vec<BackendResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn tool_names_seen(&self, call: usize) -> Vec<String> {
        self.requests.lock().unwrap()[call]
            .tools
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    fn next(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedBackend exhausted after {} calls", self.calls()))
    }
}

#[async_trait::async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    fn model(&self) -> &str {
        "e2e-model"
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        self.next(request)
    }

    async fn complete_stream(&self, request: BackendRequest) -> Result<BackendStream, BackendError> {
        let response = self.next(request)?;
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let chunk_chars = self.chunk_chars;
        tokio::spawn(async move {
            if let Some(text) = response.text {
                let chars: Vec<char> = text.chars().collect();
                for chunk in chars.chunks(chunk_chars) {
                    let text: String = chunk.iter().collect();
                    if tx.send(Ok(BackendEvent::TextDelta { text })).await.is_err() {
                        return;
                    }
                }
            }
            for call in response.tool_calls {
                if tx.send(Ok(BackendEvent::ToolCallStart { call })).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(Ok(BackendEvent::TurnComplete { usage: response.usage }))
                .await;
        });
        Ok(rx)
    }
}

fn text_response(text: &str) -> BackendResponse {
    BackendResponse::text(text).with_usage(UsageInfo::new(1_000, 200))
}

fn tool_response(calls: Vec<ToolCallRequest>) -> BackendResponse {
    BackendResponse::tool_calls(calls).with_usage(UsageInfo::new(1_000, 50))
}

fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, args.as_object().cloned().unwrap_or_default())
}

// ── Tools ────────────────────────────────────────────────────────────────

struct AddTool;

#[async_trait::async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }
    fn description(&self) -> &str {
        "Add two numbers"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}})
    }
    async fn execute(
        &self,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let a = args.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let b = args.get("b").and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok(json!({ "result": a + b }))
    }
}

/// Returns a fixed-size search result list, large enough to be stored.
struct BulkSearchTool {
    size: usize,
}

impl BulkSearchTool {
    fn payload(&self) -> String {
        (0..self.size)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }
}

#[async_trait::async_trait]
impl Tool for BulkSearchTool {
    fn name(&self) -> &str {
        "search_materials"
    }
    fn description(&self) -> &str {
        "Search the materials database"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }
    async fn execute(
        &self,
        _args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        Ok(json!(self.payload()))
    }
}

struct BrokenLookupTool;

#[async_trait::async_trait]
impl Tool for BrokenLookupTool {
    fn name(&self) -> &str {
        "lookup"
    }
    fn description(&self) -> &str {
        "Look something up"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn execute(
        &self,
        _args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "lookup".into(),
            reason: "upstream timeout".into(),
        })
    }
}

struct PlotTool;

#[async_trait::async_trait]
impl Tool for PlotTool {
    fn name(&self) -> &str {
        "plot_structure"
    }
    fn description(&self) -> &str {
        "Render a crystal structure to a file"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {"id": {"type": "string"}}})
    }
    fn requires_approval(&self) -> bool {
        true
    }
    async fn execute(
        &self,
        _args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        Ok(json!({"filename": "structure.png"}))
    }
}

fn registry() -> Arc<ToolRegistry> {
    Arc::new(
        ToolRegistry::new()
            .with(Arc::new(AddTool))
            .with(Arc::new(BulkSearchTool { size: 50_000 }))
            .with(Arc::new(BrokenLookupTool))
            .with(Arc::new(PlotTool)),
    )
}

fn agent(backend: Arc<dyn Backend>, settings: AgentSettings) -> AgentCore {
    AgentCore::new(backend, registry(), Arc::new(AutoApprove), settings)
}

/// Drain a streamed turn through a translator.
async fn envelopes(agent: &AgentCore, translator: &mut Translator, goal: &str) -> Vec<ProtocolEvent> {
    let mut rx = agent.process_stream(goal);
    let mut out = Vec::new();
    while let Some(event) = rx.recv().await {
        out.extend(translator.translate(&event));
    }
    out
}

fn methods(events: &[ProtocolEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.method()).collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_sum_with_tool_call() {
    let backend = Arc::new(ScriptedBackend::responses(vec![
        tool_response(vec![call("c1", "add", json!({"a": 2, "b": 3}))]),
        text_response("The sum is 5."),
    ]));
    let agent = agent(backend.clone(), AgentSettings::default());

    let answer = agent.process("What is 2+3?").await.unwrap();
    assert_eq!(answer, "The sum is 5.");
    assert_eq!(backend.calls(), 2);

    let history = agent.history().await;
    assert_eq!(history.len(), 4);
    assert_eq!(history[0], Message::user("What is 2+3?"));
    assert!(matches!(&history[1], Message::ToolCalls { calls, .. } if calls.len() == 1));
    assert_eq!(
        history[2],
        Message::tool_result("c1", "add", json!({"result": 5.0}))
    );
    assert_eq!(history[3], Message::assistant("The sum is 5."));
}

#[tokio::test]
async fn e2e_streamed_turn_becomes_envelopes() {
    let backend = Arc::new(ScriptedBackend::responses(vec![
        tool_response(vec![call("c1", "add", json!({"a": 2, "b": 3}))]),
        text_response("The sum is 5."),
    ]));
    let agent = agent(backend, AgentSettings::default());
    let mut translator = Translator::new();

    let out = envelopes(&agent, &mut translator, "What is 2+3?").await;
    assert_eq!(
        methods(&out),
        vec!["tool.start", "card", "text.delta", "cost", "turn.complete"]
    );
    assert_eq!(
        out[0],
        ProtocolEvent::ToolStart {
            tool_name: "add".into(),
            call_id: "c1".into(),
            verb: "Computing".into(),
        }
    );
    assert!(matches!(&out[1], ProtocolEvent::Card { card_type: CardKind::Generic, tool_name: Some(t), .. } if t == "add"));
    // Chunked deltas are buffered into a single envelope.
    assert_eq!(out[2], ProtocolEvent::text("The sum is 5."));
    assert!(matches!(out[4], ProtocolEvent::TurnComplete { message_count: 1 }));
}

#[tokio::test]
async fn e2e_oversized_result_is_stored_and_paged_back() {
    let tool = BulkSearchTool { size: 50_000 };
    let backend = Arc::new(ScriptedBackend::responses(vec![
        tool_response(vec![call("s1", "search_materials", json!({"query": "perovskite"}))]),
        tool_response(vec![call("p1", "peek_result", json!({"resultId": "s1", "offset": 0, "limit": 5000}))]),
        tool_response(vec![call("p2", "peek_result", json!({"resultId": "s1", "offset": 45000, "limit": 20000}))]),
        tool_response(vec![call("p3", "peek_result", json!({"resultId": "s1", "offset": 5000, "limit": 20000}))]),
        tool_response(vec![call("p4", "peek_result", json!({"resultId": "s1", "offset": 25000, "limit": 20000}))]),
        text_response("Found plenty."),
    ]));
    let agent = agent(backend.clone(), AgentSettings::default());
    let mut translator = Translator::new();

    let out = envelopes(&agent, &mut translator, "Find perovskites").await;

    // The first card summarizes the stored placeholder, not the payload.
    let first_card = out.iter().find(|e| e.method() == "card").unwrap();
    match first_card {
        ProtocolEvent::Card { content, data, .. } => {
            assert_eq!(content, "Large result stored (50000 characters)");
            assert_eq!(data["stored"], true);
        }
        other => panic!("unexpected: {other:?}"),
    }

    // peek_result is offered only once something is stored.
    assert!(!backend.tool_names_seen(0).contains(&"peek_result".to_string()));
    assert!(backend.tool_names_seen(1).contains(&"peek_result".to_string()));

    let history = agent.history().await;
    let results: Vec<&serde_json::Value> = history
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult { result, .. } => Some(result),
            _ => None,
        })
        .collect();

    let payload = tool.payload();
    assert_eq!(results[0]["stored"], true);
    assert_eq!(results[0]["totalSize"], 50_000);
    assert!(!results[0].to_string().contains(&payload));

    assert_eq!(results[1]["chunk"].as_str().unwrap(), &payload[..5000]);
    assert_eq!(results[1]["hasMore"], true);
    assert_eq!(results[2]["chunk"].as_str().unwrap(), &payload[45000..]);
    assert_eq!(results[2]["hasMore"], false);

    // Reads at increasing offsets reconstruct the payload exactly.
    let rebuilt: String = [1, 3, 4, 2]
        .iter()
        .map(|&i| results[i]["chunk"].as_str().unwrap())
        .collect();
    assert_eq!(rebuilt, payload);
}

#[tokio::test]
async fn e2e_repeated_failures_inject_one_correction() {
    let backend = Arc::new(ScriptedBackend::responses(vec![
        tool_response(vec![call("l1", "lookup", json!({"id": "mp-1"}))]),
        tool_response(vec![call("l2", "lookup", json!({"id": "mp-1"}))]),
        tool_response(vec![call("l3", "lookup", json!({"id": "mp-1"}))]),
        text_response("The lookup service is down."),
    ]));
    let agent = agent(backend, AgentSettings::default());
    let mut translator = Translator::new();

    let out = envelopes(&agent, &mut translator, "Look up mp-1").await;
    let error_cards = out
        .iter()
        .filter(|e| matches!(e, ProtocolEvent::Card { card_type: CardKind::Error, .. }))
        .count();
    assert_eq!(error_cards, 3);

    let history = agent.history().await;
    let corrections = history
        .iter()
        .filter(|m| matches!(m, Message::System { .. }))
        .count();
    assert_eq!(corrections, 1);
    assert!(matches!(history.last(), Some(Message::Assistant { .. })));
}

#[tokio::test]
async fn e2e_plan_then_approved_plot() {
    let backend = Arc::new(ScriptedBackend::responses(vec![
        text_response("Here is what I will do. <plan>\n1. Fetch the structure\n2. Plot it\n</plan> Shall I go ahead?"),
        tool_response(vec![call("g1", "plot_structure", json!({"id": "mp-149"}))]),
        text_response("Plotted."),
    ]));
    let (approver, decisions) = ChannelApprover::new();
    let agent = AgentCore::new(backend, registry(), Arc::new(approver), AgentSettings::default());
    let mut translator = Translator::new();

    let first = envelopes(&agent, &mut translator, "Plot silicon").await;
    assert_eq!(
        methods(&first),
        vec!["text.delta", "card", "prompt", "text.delta", "cost", "turn.complete"]
    );
    assert_eq!(first[0], ProtocolEvent::text("Here is what I will do. "));
    assert!(matches!(&first[1], ProtocolEvent::Card { card_type: CardKind::Plan, content, .. } if content == "1. Fetch the structure\n2. Plot it"));
    assert!(matches!(&first[2], ProtocolEvent::Prompt { kind: PromptKind::Confirm, .. }));
    assert_eq!(first[3], ProtocolEvent::text(" Shall I go ahead?"));

    // The host answers the approval prompt while the turn is suspended.
    let mut rx = agent.process_stream("yes");
    let mut second = Vec::new();
    while let Some(event) = rx.recv().await {
        if matches!(event, AgentEvent::ApprovalRequested { .. }) {
            decisions.send(ApprovalDecision::Always).await.unwrap();
        }
        second.extend(translator.translate(&event));
    }
    assert_eq!(
        methods(&second),
        vec!["tool.start", "prompt", "card", "text.delta", "cost", "turn.complete"]
    );
    assert!(matches!(&second[0], ProtocolEvent::ToolStart { verb, .. } if verb == "Plotting"));
    assert!(matches!(&second[2], ProtocolEvent::Card { card_type: CardKind::Image, content, .. } if content == "structure.png"));
    assert!(matches!(second[5], ProtocolEvent::TurnComplete { message_count: 2 }));
    assert_eq!(agent.always_allowed().await, vec!["plot_structure"]);
}

#[tokio::test]
async fn e2e_max_iterations_is_a_normal_ending() {
    let backend = Arc::new(ScriptedBackend::responses(vec![
        tool_response(vec![call("a1", "add", json!({"a": 1, "b": 1}))]),
        tool_response(vec![call("a2", "add", json!({"a": 2, "b": 2}))]),
        tool_response(vec![call("a3", "add", json!({"a": 3, "b": 3}))]),
    ]));
    let agent = agent(backend.clone(), AgentSettings::default().with_max_iterations(3));
    let mut translator = Translator::new();

    let out = envelopes(&agent, &mut translator, "Keep adding").await;
    assert_eq!(backend.calls(), 3);
    assert!(!out.iter().any(|e| matches!(e, ProtocolEvent::Card { card_type: CardKind::Error, .. })));
    let text = out.iter().find_map(|e| match e {
        ProtocolEvent::TextDelta { text } => Some(text.clone()),
        _ => None,
    });
    assert!(text.unwrap().contains("max iterations"));
    assert_eq!(out.last().unwrap().method(), "turn.complete");
}

#[tokio::test]
async fn e2e_cost_accumulates_across_turns() {
    let backend = Arc::new(ScriptedBackend::responses(vec![
        text_response("first"),
        tool_response(vec![call("c1", "add", json!({"a": 1, "b": 2}))]),
        text_response("second"),
    ]));
    let pricing = ModelPricing::new(3.0, 15.0);
    let agent = agent(backend, AgentSettings::default().with_pricing(pricing.clone()));
    let mut translator = Translator::new();

    let mut turn_costs = Vec::new();
    for goal in ["one", "two"] {
        for envelope in envelopes(&agent, &mut translator, goal).await {
            if let ProtocolEvent::Cost { turn_cost, session_cost, .. } = envelope {
                turn_costs.push((turn_cost, session_cost));
            }
        }
    }

    let first = pricing.cost(&UsageInfo::new(1_000, 200));
    let second = pricing.cost(&UsageInfo::new(1_000, 50)) + pricing.cost(&UsageInfo::new(1_000, 200));
    assert!((turn_costs[0].0 - first).abs() < 1e-12);
    assert!((turn_costs[1].0 - second).abs() < 1e-12);
    assert!((turn_costs[1].1 - (first + second)).abs() < 1e-12);
    assert!((agent.session_cost().await - (first + second)).abs() < 1e-12);
}

#[tokio::test(start_paused = true)]
async fn e2e_transient_failures_are_retried() {
    let overloaded = || BackendError::Api {
        status_code: 429,
        message: "rate limited".into(),
        retry_after: Some(Duration::from_secs(10)),
    };
    let inner = Arc::new(ScriptedBackend::new(vec![
        Err(overloaded()),
        Err(overloaded()),
        Ok(text_response("Recovered.")),
    ]));
    let backend = Arc::new(RetryingBackend::new(inner.clone()).with_policy(RetryPolicy::default()));
    let agent = agent(backend, AgentSettings::default());

    let started = tokio::time::Instant::now();
    let answer = agent.process("hello").await.unwrap();

    assert_eq!(answer, "Recovered.");
    assert_eq!(inner.calls(), 3);
    assert!(started.elapsed() >= Duration::from_secs(20));
}

#[tokio::test]
async fn e2e_exhausted_retries_end_the_stream_with_an_error_card() {
    let inner = Arc::new(ScriptedBackend::new(vec![
        Err(BackendError::status(401, "bad key")),
    ]));
    let backend = Arc::new(RetryingBackend::new(inner.clone()));
    let agent = agent(backend, AgentSettings::default());
    let mut translator = Translator::new();

    let out = envelopes(&agent, &mut translator, "hello").await;
    assert_eq!(inner.calls(), 1);
    assert_eq!(out.len(), 1);
    match &out[0] {
        ProtocolEvent::Card { card_type, content, .. } => {
            assert_eq!(*card_type, CardKind::Error);
            assert!(content.contains("bad key"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn e2e_session_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path());

    let backend = Arc::new(ScriptedBackend::responses(vec![
        tool_response(vec![call("s1", "search_materials", json!({}))]),
        text_response("Stored it."),
    ]));
    let first = agent(backend, AgentSettings::default());
    first.process("search").await.unwrap();
    let document = first.snapshot().await;
    store.save(&document).await.unwrap();

    let raw = std::fs::read_to_string(dir.path().join(format!("{}.json", document.id))).unwrap();
    assert!(raw.len() < 20_000, "stored payload leaked into the session file");

    let backend = Arc::new(ScriptedBackend::responses(vec![text_response("Welcome back.")]));
    let second = agent(backend, AgentSettings::default());
    second.restore(store.load(&document.id).await.unwrap().unwrap()).await;

    assert_eq!(second.history().await, first.history().await);
    assert_eq!(second.stored_results().await, 0);
    assert!((second.session_cost().await - first.session_cost().await).abs() < 1e-12);

    second.process("continue").await.unwrap();
    assert_eq!(second.history().await.len(), 6);
}
