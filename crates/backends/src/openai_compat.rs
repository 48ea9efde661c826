//! OpenAI-compatible backend.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/chat/completions` with function calling.
//!
//! This adapter has no native streaming; `complete_stream` falls back to
//! the single-shot default of the `Backend` trait.

use async_trait::async_trait;
use crucible_core::backend::{Backend, BackendRequest, BackendResponse, ToolSchema, parse_arguments};
use crucible_core::error::BackendError;
use crucible_core::message::{Message, ToolCallRequest};
use crucible_core::usage::UsageInfo;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::status_error;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// An OpenAI-compatible LLM backend.
pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Create a new OpenAI-compatible backend.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: None,
            temperature: 0.7,
            client,
        }
    }

    /// Create an OpenAI backend (convenience constructor).
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openai", OPENAI_BASE_URL, api_key, model)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Convert neutral history to OpenAI chat messages, system prompt first.
    fn to_api_messages(system_prompt: &str, history: &[Message]) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(ApiMessage::text("system", system_prompt));
        }

        for msg in history {
            let api = match msg {
                Message::User { content } => ApiMessage::text("user", content),
                Message::Assistant { content } => ApiMessage::text("assistant", content),
                Message::System { content } => ApiMessage::text("system", content),
                Message::ToolCalls { text, calls } => ApiMessage {
                    role: "assistant".into(),
                    content: text.clone(),
                    tool_calls: Some(
                        calls
                            .iter()
                            .map(|c| ApiToolCall {
                                id: c.call_id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: c.tool_name.clone(),
                                    arguments: serde_json::Value::Object(c.arguments.clone()).to_string(),
                                },
                            })
                            .collect(),
                    ),
                    tool_call_id: None,
                },
                Message::ToolResult { call_id, result, .. } => ApiMessage {
                    role: "tool".into(),
                    content: Some(match result {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }),
                    tool_calls: None,
                    tool_call_id: Some(call_id.clone()),
                },
            };
            messages.push(api);
        }

        messages
    }

    /// Convert tool schemas to OpenAI function definitions.
    fn to_api_tools(tools: &[ToolSchema]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    }

    fn to_backend_response(api_response: ApiResponse) -> Result<BackendResponse, BackendError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidResponse("No choices in response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest::new(tc.id, tc.function.name, parse_arguments(&tc.function.arguments)))
            .collect();

        Ok(BackendResponse {
            text: choice.message.content.filter(|t| !t.is_empty()),
            tool_calls,
            usage: api_response
                .usage
                .map(|u| UsageInfo::new(u.prompt_tokens, u.completion_tokens)),
        })
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&request.system_prompt, &request.history),
            "temperature": self.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(backend = %self.name, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error(&self.name, response).await);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        Self::to_backend_response(api_response)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
