//! Anthropic native backend.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE; each tool call is emitted once its input is complete
//! - Prompt-cache token counts mapped into `UsageInfo`

use async_trait::async_trait;
use futures::StreamExt;
use crucible_core::backend::{
    Backend, BackendEvent, BackendRequest, BackendResponse, BackendStream, ToolSchema,
    parse_arguments,
};
use crucible_core::error::BackendError;
use crucible_core::message::{Message, ToolCallRequest};
use crucible_core::usage::UsageInfo;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::http::status_error;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API backend.
pub struct AnthropicBackend {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicBackend {
    /// Create a new Anthropic backend for `model`.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.7,
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Anthropic takes the system prompt as a top-level field.
    fn system_text(request: &BackendRequest) -> Option<String> {
        (!request.system_prompt.is_empty()).then(|| request.system_prompt.clone())
    }

    /// Convert neutral history to Anthropic content-block messages.
    ///
    /// Consecutive user-side blocks (tool results) are merged into one
    /// message so every `tool_use` is answered in the following turn.
    /// System entries in history (corrective instructions) stay where they
    /// occurred, as user-side text blocks.
    fn to_api_messages(history: &[Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in history {
            match msg {
                Message::User { content } => result.push(AnthropicMessage {
                    role: "user".into(),
                    content: AnthropicContent::Text(content.clone()),
                }),
                Message::Assistant { content } => result.push(AnthropicMessage {
                    role: "assistant".into(),
                    content: AnthropicContent::Text(content.clone()),
                }),
                Message::ToolCalls { text, calls } => {
                    let mut blocks: Vec<ContentBlock> = Vec::new();
                    if let Some(text) = text {
                        blocks.push(ContentBlock::Text { text: text.clone() });
                    }
                    for call in calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: call.call_id.clone(),
                            name: call.tool_name.clone(),
                            input: serde_json::Value::Object(call.arguments.clone()),
                        });
                    }
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                Message::ToolResult { call_id, result: value, .. } => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: call_id.clone(),
                        content: render_result(value),
                        is_error: value.get("error").is_some_and(|e| !e.is_null()),
                    };
                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if role == "user" => blocks.push(block),
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
                Message::System { content } => {
                    let block = ContentBlock::Text { text: content.clone() };
                    match result.last_mut() {
                        Some(AnthropicMessage { role, content: existing }) if role == "user" => {
                            match existing {
                                AnthropicContent::Blocks(blocks) => blocks.push(block),
                                AnthropicContent::Text(text) => {
                                    let first = ContentBlock::Text { text: std::mem::take(text) };
                                    *existing = AnthropicContent::Blocks(vec![first, block]);
                                }
                            }
                        }
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
            }
        }

        result
    }

    /// Convert tool schemas to Anthropic format.
    fn to_api_tools(tools: &[ToolSchema]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    fn request_body(&self, request: &BackendRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&request.history),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        if let Some(system) = Self::system_text(request) {
            body["system"] = serde_json::json!(system);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    async fn send(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response, BackendError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error("anthropic", response).await);
        }
        Ok(response)
    }

    /// Convert an Anthropic API response to a neutral response.
    fn to_backend_response(resp: AnthropicResponse) -> BackendResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text: t } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&t);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCallRequest::new(
                        id,
                        name,
                        crucible_core::backend::arguments_from_value(input),
                    ));
                }
                ResponseContentBlock::Other => {}
            }
        }

        BackendResponse {
            text: if text.is_empty() { None } else { Some(text) },
            tool_calls,
            usage: Some(resp.usage.into()),
        }
    }
}

/// Tool results go to Anthropic as text: strings raw, anything else as JSON.
fn render_result(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let body = self.request_body(&request, false);
        debug!(backend = "anthropic", model = %self.model, "Sending completion request");

        let response = self.send(&body, false).await?;
        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse Anthropic response: {e}")))?;

        Ok(Self::to_backend_response(api_resp))
    }

    async fn complete_stream(&self, request: BackendRequest) -> Result<BackendStream, BackendError> {
        let body = self.request_body(&request, true);
        debug!(backend = "anthropic", model = %self.model, "Sending streaming request");

        let response = self.send(&body, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut state = StreamState::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(BackendError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);

                while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim_end_matches(['\n', '\r']);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    let outcome = state.on_event(&event);
                    for item in outcome {
                        if tx.send(item).await.is_err() {
                            return;
                        }
                    }
                    if state.is_done() {
                        return;
                    }
                }
            }

            if let Some(err) = state.interrupted() {
                warn!(error = %err, "Anthropic stream closed before message_stop");
                let _ = tx.send(Err(err)).await;
            }
        });

        Ok(rx)
    }
}

/// Accumulates Anthropic SSE events into neutral backend events.
#[derive(Default)]
struct StreamState {
    tool: Option<PendingToolUse>,
    usage: Option<UsageInfo>,
    done: bool,
}

#[derive(Default)]
struct PendingToolUse {
    id: String,
    name: String,
    json: String,
}

impl StreamState {
    fn is_done(&self) -> bool {
        self.done
    }

    fn on_event(&mut self, event: &serde_json::Value) -> Vec<Result<BackendEvent, BackendError>> {
        let mut out = Vec::new();
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(usage) = event["message"].get("usage") {
                    self.merge_usage(usage);
                }
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    if let Some(call) = self.take_tool() {
                        out.push(Ok(call));
                    }
                    self.tool = Some(PendingToolUse {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        json: String::new(),
                    });
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta["text"].as_str().filter(|t| !t.is_empty()) {
                            out.push(Ok(BackendEvent::TextDelta {
                                text: text.to_string(),
                            }));
                        }
                    }
                    "input_json_delta" => {
                        if let (Some(tool), Some(partial)) =
                            (self.tool.as_mut(), delta["partial_json"].as_str())
                        {
                            tool.json.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let Some(call) = self.take_tool() {
                    out.push(Ok(call));
                }
            }
            "message_delta" => {
                if let Some(usage) = event.get("usage") {
                    self.merge_usage(usage);
                }
            }
            "message_stop" => {
                out.extend(self.finish().into_iter().map(Ok));
            }
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                let status = match event["error"]["type"].as_str() {
                    Some("overloaded_error") => 503,
                    Some("rate_limit_error") => 429,
                    _ => 500,
                };
                out.push(Err(BackendError::status(status, message)));
                self.done = true;
            }
            _ => {}
        }
        out
    }

    /// Flush any pending tool call and close with `TurnComplete`.
    fn finish(&mut self) -> Vec<BackendEvent> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        if let Some(call) = self.take_tool() {
            out.push(call);
        }
        out.push(BackendEvent::TurnComplete {
            usage: self.usage.take(),
        });
        self.done = true;
        out
    }

    /// The byte stream ended. Without `message_stop` the response is
    /// incomplete, and a half-received tool call must not run.
    fn interrupted(&mut self) -> Option<BackendError> {
        if self.done {
            return None;
        }
        self.done = true;
        let reason = match self.tool.take() {
            Some(tool) => format!("connection closed inside tool call '{}' ({})", tool.name, tool.id),
            None => "connection closed before message_stop".to_string(),
        };
        Some(BackendError::StreamInterrupted(reason))
    }

    fn take_tool(&mut self) -> Option<BackendEvent> {
        let tool = self.tool.take()?;
        Some(BackendEvent::ToolCallStart {
            call: ToolCallRequest::new(tool.id, tool.name, parse_arguments(&tool.json)),
        })
    }

    /// `message_start` carries input and cache counts; `message_delta`
    /// carries the running output count. Later values replace earlier ones.
    fn merge_usage(&mut self, usage: &serde_json::Value) {
        let current = self.usage.get_or_insert_with(UsageInfo::default);
        if let Some(v) = usage["input_tokens"].as_u64() {
            current.input_tokens = v;
        }
        if let Some(v) = usage["output_tokens"].as_u64() {
            current.output_tokens = v;
        }
        if let Some(v) = usage["cache_read_input_tokens"].as_u64() {
            current.cache_read_tokens = v;
        }
        if let Some(v) = usage["cache_creation_input_tokens"].as_u64() {
            current.cache_creation_tokens = v;
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

impl From<AnthropicUsage> for UsageInfo {
    fn from(u: AnthropicUsage) -> Self {
        Self {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.cache_read_input_tokens.unwrap_or(0),
            cache_creation_tokens: u.cache_creation_input_tokens.unwrap_or(0),
        }
    }
}
