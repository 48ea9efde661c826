//! Backend trait: the abstraction over LLM capability providers.
//!
//! A Backend takes a neutral conversation history plus the tool schemas the
//! model may call, and returns either a complete response or an ordered
//! stream of low-level events.
//!
//! Implementations: Anthropic (native streaming), OpenAI-compatible
//! endpoints (single-shot), and the retrying wrapper around either.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::BackendError;
use crate::message::{Message, ToolCallRequest};
use crate::usage::UsageInfo;

/// Receiving half of a backend event stream.
pub type BackendStream = mpsc::Receiver<Result<BackendEvent, BackendError>>;

/// One backend call: what the model sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Neutral conversation history, oldest first
    pub history: Vec<Message>,

    /// Tools the model may call on this round
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    /// System prompt, sent separately from the history
    #[serde(default)]
    pub system_prompt: String,
}

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,
}

/// A complete (non-streaming) response from a backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendResponse {
    /// Free text, if the model produced any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Tool calls the model requested, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Token usage for this call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}

impl BackendResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: UsageInfo) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A single event in a streamed backend response.
///
/// Ordering contract: any number of `TextDelta`s and `ToolCallStart`s, then
/// exactly one `TurnComplete`. A `ToolCallStart` carries the complete
/// arguments of its call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    TextDelta { text: String },
    ToolCallStart { call: ToolCallRequest },
    TurnComplete { usage: Option<UsageInfo> },
}

/// The core Backend trait.
///
/// The agent loop calls `complete()` or `complete_stream()` without knowing
/// which provider is behind it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend (e.g. "anthropic").
    fn name(&self) -> &str;

    /// The model this backend targets, used for pricing lookups.
    fn model(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError>;

    /// Send a request and get an ordered stream of events.
    ///
    /// Default implementation calls `complete()` once and re-emits the
    /// result as a single-shot stream with the same ordering contract.
    async fn complete_stream(&self, request: BackendRequest) -> Result<BackendStream, BackendError> {
        let response = self.complete(request).await?;
        Ok(single_shot(response))
    }
}

/// Re-emit a complete response as a stream of events.
pub fn single_shot(response: BackendResponse) -> BackendStream {
    let events = response_events(response);
    let (tx, rx) = mpsc::channel(events.len().max(1));
    for event in events {
        // Capacity covers every event, so this never blocks or fails.
        let _ = tx.try_send(Ok(event));
    }
    rx
}

fn response_events(response: BackendResponse) -> Vec<BackendEvent> {
    let mut events = Vec::with_capacity(response.tool_calls.len() + 2);
    if let Some(text) = response.text.filter(|t| !t.is_empty()) {
        events.push(BackendEvent::TextDelta { text });
    }
    events.extend(
        response
            .tool_calls
            .into_iter()
            .map(|call| BackendEvent::ToolCallStart { call }),
    );
    events.push(BackendEvent::TurnComplete {
        usage: response.usage,
    });
    events
}

/// Parse provider-supplied tool arguments.
///
/// Malformed JSON, or JSON that is not an object, is recovered as an empty
/// argument map rather than propagated.
pub fn parse_arguments(raw: &str) -> serde_json::Map<String, serde_json::Value> {
    if raw.trim().is_empty() {
        return serde_json::Map::new();
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(other) => {
            warn!(kind = %json_kind(&other), "Tool arguments were not an object, using empty arguments");
            serde_json::Map::new()
        }
        Err(e) => {
            warn!(error = %e, "Malformed tool arguments, using empty arguments");
            serde_json::Map::new()
        }
    }
}

/// Same recovery rule for arguments that arrive already decoded.
pub fn arguments_from_value(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        serde_json::Value::String(raw) => parse_arguments(&raw),
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            warn!(kind = %json_kind(&other), "Tool arguments were not an object, using empty arguments");
            serde_json::Map::new()
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
