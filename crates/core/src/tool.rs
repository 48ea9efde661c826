//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are the side-effecting plugins the model can call: database
//! searches, property predictors, plotters, file I/O. The engine only knows
//! their boundary: name, description, input schema, approval flag, execute.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::warn;

use crate::backend::ToolSchema;
use crate::error::ToolError;
use crate::message::ToolCallRequest;

/// The outcome of one tool execution.
///
/// Failures are values, not faults: they are shown to the model as
/// `{"error": message}` so it can recover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Error { error: String },
    Success(serde_json::Value),
}

impl ToolOutput {
    pub fn success(value: serde_json::Value) -> Self {
        Self::Success(value)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// True for explicit errors and for payload objects carrying an
    /// `error` key.
    pub fn is_error(&self) -> bool {
        match self {
            Self::Error { .. } => true,
            Self::Success(value) => value.get("error").is_some_and(|e| !e.is_null()),
        }
    }

    /// The JSON value placed into history.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Error { error } => serde_json::json!({ "error": error }),
            Self::Success(value) => value.clone(),
        }
    }

    pub fn into_value(self) -> serde_json::Value {
        match self {
            Self::Error { error } => serde_json::json!({ "error": error }),
            Self::Success(value) => value,
        }
    }

    /// Error message, if this is a failure.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Error { error } => Some(error.clone()),
            Self::Success(value) => value.get("error").and_then(|e| match e {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }),
        }
    }
}

/// The core Tool trait.
///
/// Each capability implements this trait and is registered in the
/// [`ToolRegistry`] before the agent starts.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search_materials").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Whether a human must consent before each execution.
    fn requires_approval(&self) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError>;

    /// Convert this tool into a schema for sending to the LLM.
    fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of available tools, fixed once the agent is running.
///
/// The agent loop uses this to:
/// 1. Get tool schemas to send to the LLM
/// 2. Look up and execute tools when the LLM requests them
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Whether the named tool asks for consent. Unknown tools never do.
    pub fn requires_approval(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.requires_approval())
    }

    /// All tool schemas, sorted by name so requests are stable.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.to_schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute a tool call. Never fails the caller.
    ///
    /// Unknown tools, returned errors and panics inside the tool all become
    /// [`ToolOutput::Error`].
    pub async fn execute(&self, call: &ToolCallRequest) -> ToolOutput {
        let Some(tool) = self.tools.get(&call.tool_name) else {
            return ToolOutput::error(ToolError::NotFound(call.tool_name.clone()).to_string());
        };

        let outcome = AssertUnwindSafe(tool.execute(call.arguments.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => ToolOutput::success(value),
            Ok(Err(e)) => {
                warn!(tool = %call.tool_name, error = %e, "Tool returned an error");
                ToolOutput::error(e.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(tool = %call.tool_name, reason = %reason, "Tool panicked");
                ToolOutput::error(
                    ToolError::Panicked {
                        tool_name: call.tool_name.clone(),
                        reason,
                    }
                    .to_string(),
                )
            }
        }
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
