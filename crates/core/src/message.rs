//! Message and Conversation domain types.
//!
//! These are the neutral value objects that flow through the engine:
//! the agent core appends them, backends translate them into provider
//! formats, and session stores persist them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A structured request from the backend to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, echoed back in the matching result.
    pub call_id: String,

    /// Name of the tool to invoke
    pub tool_name: String,

    /// Arguments as a JSON object
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolCallRequest {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// A single entry in the conversation history.
///
/// Tagged on `role`, so the serialized form is the neutral message schema
/// `{role: user|assistant|tool_calls|tool_result|system, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// The end user
    User { content: String },

    /// A final (tool-call-free) model response
    Assistant { content: String },

    /// The model asked for one or more tool invocations
    ToolCalls {
        /// Text the model produced alongside the calls, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },

    /// The (possibly placeholder) result of one tool call
    ToolResult {
        call_id: String,
        tool_name: String,
        result: serde_json::Value,
    },

    /// System instructions, including injected corrective messages
    System { content: String },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn tool_calls(text: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self::ToolCalls {
            text: text.filter(|t| !t.is_empty()),
            calls,
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            result,
        }
    }

    /// The role tag as it appears on the wire.
    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolCalls { .. } => "tool_calls",
            Self::ToolResult { .. } => "tool_result",
            Self::System { .. } => "system",
        }
    }

    /// Approximate character length, used for token estimates.
    pub fn char_len(&self) -> usize {
        match self {
            Self::User { content } | Self::Assistant { content } | Self::System { content } => {
                content.chars().count()
            }
            Self::ToolCalls { text, calls } => {
                text.as_deref().map_or(0, |t| t.chars().count())
                    + calls
                        .iter()
                        .map(|c| c.tool_name.len() + serde_json::Value::Object(c.arguments.clone()).to_string().len())
                        .sum::<usize>()
            }
            Self::ToolResult { result, .. } => result.to_string().chars().count(),
        }
    }
}

/// A conversation is an append-only ordered sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::with_id(ConversationId::new())
    }

    /// Create an empty conversation with a known id.
    pub fn with_id(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every message. Only an explicit session reset calls this.
    pub fn clear(&mut self) {
        self.updated_at = Utc::now();
        self.messages.clear();
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.char_len() / 4).sum()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role(), "user");
        assert_eq!(msg, Message::User { content: "Hello, agent!".into() });
    }

    #[test]
    fn conversation_tracks_updates() {
        let mut conv = Conversation::new();
        let created = conv.created_at;

        conv.push(Message::user("First message"));
        assert_eq!(conv.len(), 1);
        assert!(conv.updated_at >= created);
    }

    #[test]
    fn tagged_wire_shape() {
        let msg = Message::tool_result("call_1", "add", serde_json::json!({"sum": 5}));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool_result");
        assert_eq!(json["call_id"], "call_1");
        assert_eq!(json["result"]["sum"], 5);

        let calls = Message::tool_calls(
            None,
            vec![ToolCallRequest::new("c1", "add", serde_json::Map::new())],
        );
        let json = serde_json::to_value(&calls).unwrap();
        assert_eq!(json["role"], "tool_calls");
        assert!(json.get("text").is_none());
        assert_eq!(json["calls"][0]["tool_name"], "add");
    }

    #[test]
    fn empty_preamble_text_is_dropped() {
        let msg = Message::tool_calls(Some(String::new()), vec![]);
        assert_eq!(msg, Message::ToolCalls { text: None, calls: vec![] });
    }

    #[test]
    fn deserializes_history_entry() {
        let json = r#"{"role":"system","content":"be careful"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg, Message::system("be careful"));
    }

    #[test]
    fn clear_empties_history() {
        let mut conv = Conversation::new();
        conv.push(Message::user("a"));
        conv.push(Message::assistant("b"));
        conv.clear();
        assert!(conv.is_empty());
    }

    #[test]
    fn conversation_token_estimate() {
        let mut conv = Conversation::new();
        // 20 chars ≈ 5 tokens
        conv.push(Message::user("12345678901234567890"));
        assert_eq!(conv.estimated_tokens(), 5);
    }
}
