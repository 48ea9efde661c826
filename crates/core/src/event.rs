//! Agent-level streaming events.
//!
//! `AgentEvent` is what the agent core yields while a turn runs. The
//! protocol translator turns these into front-end envelopes; hosts may also
//! consume them directly.

use serde::{Deserialize, Serialize};

use crate::usage::UsageInfo;

/// Events emitted by the agent during a streamed turn.
///
/// - `text_delta`: partial text from the model
/// - `tool_call_start`: the model asked for a tool
/// - `approval_requested`: the loop is suspended until a host decides
/// - `tool_call_result`: a tool finished (or was denied)
/// - `turn_complete`: the turn ended; carries cost accounting
/// - `error`: the turn was aborted by a backend failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TextDelta {
        text: String,
    },

    ToolCallStart {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Map<String, serde_json::Value>,
    },

    ApprovalRequested {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Map<String, serde_json::Value>,
    },

    ToolCallResult {
        call_id: String,
        tool_name: String,
        /// The value placed into history (a placeholder when stored)
        result: serde_json::Value,
        is_error: bool,
        elapsed_ms: u64,
    },

    TurnComplete {
        /// Final text, or the max-iterations message
        text: String,
        usage: UsageInfo,
        turn_cost: f64,
        session_cost: f64,
        iterations: u32,
    },

    Error {
        message: String,
    },
}

impl AgentEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::ToolCallResult { .. } => "tool_call_result",
            Self::TurnComplete { .. } => "turn_complete",
            Self::Error { .. } => "error",
        }
    }

    /// Whether the stream ends after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnComplete { .. } | Self::Error { .. })
    }
}
