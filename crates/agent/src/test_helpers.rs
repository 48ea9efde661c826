//! Shared test helpers: a scripted backend, a scripted approver and a few
//! in-process tools.

use async_trait::async_trait;
use crucible_core::agent::{ApprovalDecision, ApprovalRequest};
use crucible_core::backend::{Backend, BackendEvent, BackendRequest, BackendResponse, BackendStream};
use crucible_core::error::{BackendError, ToolError};
use crucible_core::message::ToolCallRequest;
use crucible_core::tool::Tool;
use crucible_core::usage::UsageInfo;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::approval::Approver;

/// One scripted backend step.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(BackendResponse),
    Fail(BackendError),
    /// Stream the text, then close without a turn-complete event
    Truncate(String),
}

/// A backend that replays a script, one step per call.
///
/// Panics if more calls are made than steps provided. With `chunk_size`
/// set, streaming splits text into deltas of that many characters.
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<BackendRequest>>,
    chunk_size: Option<usize>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            chunk_size: None,
        }
    }

    pub fn responses(responses: Vec<BackendResponse>) -> Self {
        Self::new(responses.into_iter().map(Step::Respond).collect())
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: BackendRequest) -> Step {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        let call = requests.len();
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedBackend: no more steps (call #{call})"))
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        match self.next(request) {
            Step::Respond(response) => Ok(response),
            Step::Fail(error) => Err(error),
            Step::Truncate(_) => Err(BackendError::StreamInterrupted("scripted truncation".into())),
        }
    }

    async fn complete_stream(&self, request: BackendRequest) -> Result<BackendStream, BackendError> {
        let events = match self.next(request) {
            Step::Fail(error) => return Err(error),
            Step::Truncate(text) => vec![BackendEvent::TextDelta { text }],
            Step::Respond(response) => {
                let mut events = Vec::new();
                if let Some(text) = response.text.filter(|t| !t.is_empty()) {
                    events.extend(chunks(&text, self.chunk_size).into_iter().map(|text| BackendEvent::TextDelta { text }));
                }
                events.extend(response.tool_calls.into_iter().map(|call| BackendEvent::ToolCallStart { call }));
                events.push(BackendEvent::TurnComplete {
                    usage: response.usage,
                });
                events
            }
        };

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

fn chunks(text: &str, size: Option<usize>) -> Vec<String> {
    let Some(size) = size else {
        return vec![text.to_string()];
    };
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// An approver that replays scripted decisions and counts questions.
pub struct ScriptedApprover {
    decisions: Mutex<VecDeque<ApprovalDecision>>,
    asked: AtomicUsize,
}

impl ScriptedApprover {
    pub fn new(decisions: Vec<ApprovalDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Approver for ScriptedApprover {
    async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ApprovalDecision::Deny)
    }
}

/// Create a text response (no tool calls).
pub fn text_response(text: &str) -> BackendResponse {
    BackendResponse::text(text).with_usage(UsageInfo::new(10, 5))
}

/// Create a response requesting the given tool calls.
pub fn tool_response(calls: Vec<ToolCallRequest>) -> BackendResponse {
    BackendResponse::tool_calls(calls).with_usage(UsageInfo::new(10, 5))
}

/// Helper to create a tool call.
pub fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, args.as_object().cloned().unwrap_or_default())
}

/// `add(a, b)` returning `{"result": a + b}`.
pub struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "a": { "type": "number" }, "b": { "type": "number" } },
            "required": ["a", "b"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let operand = |key: &str| {
            arguments
                .get(key)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| ToolError::InvalidArguments(format!("missing number '{key}'")))
        };
        let sum = operand("a")? + operand("b")?;
        Ok(serde_json::json!({ "result": sum }))
    }
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "lookup"
    }

    fn description(&self) -> &str {
        "Look something up (always fails)"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "lookup".into(),
            reason: "no match".into(),
        })
    }
}

/// Returns a string payload of `size` characters cycling through digits.
pub struct BigPayloadTool {
    pub size: usize,
}

impl BigPayloadTool {
    pub fn payload(&self) -> String {
        (0..self.size).map(|i| char::from(b'0' + (i % 10) as u8)).collect()
    }
}

#[async_trait]
impl Tool for BigPayloadTool {
    fn name(&self) -> &str {
        "dump"
    }

    fn description(&self) -> &str {
        "Dump a large dataset"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::Value::String(self.payload()))
    }
}

/// Requires approval; counts executions.
#[derive(Default)]
pub struct GuardedTool {
    pub runs: AtomicUsize,
}

impl GuardedTool {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for GuardedTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": { "path": { "type": "string" } } })
    }

    fn requires_approval(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        _arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "written": true }))
    }
}

/// Sleeps `ms` milliseconds, then echoes it.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Sleep for a while"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": { "ms": { "type": "integer" } } })
    }

    async fn execute(
        &self,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let ms = arguments.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(serde_json::json!({ "slept": ms }))
    }
}
