//! Scripted backend and tools for the host tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use crucible_core::backend::{Backend, BackendRequest, BackendResponse};
use crucible_core::error::{BackendError, ToolError};
use crucible_core::message::ToolCallRequest;
use crucible_core::tool::Tool;
use crucible_core::usage::UsageInfo;

/// Returns queued responses in order; panics when the script runs out.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<BackendResponse>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<BackendResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
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

    async fn complete(&self, _request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.expect("ScriptedBackend ran out of responses"))
    }
}

pub fn text_response(text: &str) -> BackendResponse {
    BackendResponse::text(text).with_usage(UsageInfo::new(10, 5))
}

pub fn tool_response(calls: Vec<ToolCallRequest>) -> BackendResponse {
    BackendResponse::tool_calls(calls).with_usage(UsageInfo::new(10, 5))
}

pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments.as_object().cloned().unwrap_or_default())
}

/// A tool that needs consent before it runs.
pub struct GuardedTool;

#[async_trait]
impl Tool for GuardedTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}})
    }

    fn requires_approval(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        _arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::json!({"written": true}))
    }
}
