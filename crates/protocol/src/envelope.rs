//! Protocol envelopes.
//!
//! Every event a front end receives is one JSON object on one line:
//!
//! - `text.delta`: a flushed run of assistant text
//! - `tool.start`: a tool call began
//! - `card`: a structured rendering unit (tool result, plan, error)
//! - `prompt`: the host must answer (approval or plan confirmation)
//! - `cost`: turn and cumulative session cost
//! - `turn.complete`: the turn is over

use serde::{Deserialize, Serialize};

use crate::cards::{CardKind, ERROR_PREVIEW_CHARS, truncate};

/// One outbound protocol event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all_fields = "camelCase")]
pub enum ProtocolEvent {
    #[serde(rename = "text.delta")]
    TextDelta { text: String },

    #[serde(rename = "tool.start")]
    ToolStart {
        tool_name: String,
        call_id: String,
        verb: String,
    },

    #[serde(rename = "card")]
    Card {
        card_type: CardKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
        content: String,
        #[serde(default)]
        data: serde_json::Value,
    },

    #[serde(rename = "prompt")]
    Prompt {
        #[serde(rename = "type")]
        kind: PromptKind,
        message: String,
        choices: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_args: Option<serde_json::Map<String, serde_json::Value>>,
    },

    #[serde(rename = "cost")]
    Cost {
        input_tokens: u64,
        output_tokens: u64,
        turn_cost: f64,
        session_cost: f64,
    },

    #[serde(rename = "turn.complete")]
    TurnComplete { message_count: u64 },
}

/// What a prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// allow / always / deny a tool call
    Approval,
    /// yes / no on a proposed plan
    Confirm,
}

impl ProtocolEvent {
    /// The method name on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text.delta",
            Self::ToolStart { .. } => "tool.start",
            Self::Card { .. } => "card",
            Self::Prompt { .. } => "prompt",
            Self::Cost { .. } => "cost",
            Self::TurnComplete { .. } => "turn.complete",
        }
    }

    /// Render as a single JSON line (no trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// An error card, content cut to [`ERROR_PREVIEW_CHARS`].
    pub fn error_card(message: &str) -> Self {
        Self::Card {
            card_type: CardKind::Error,
            tool_name: None,
            elapsed_ms: None,
            content: truncate(message, ERROR_PREVIEW_CHARS),
            data: serde_json::json!({ "error": message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_delta_envelope() {
        let line = ProtocolEvent::text("Hello").to_line().unwrap();
        assert_eq!(line, r#"{"method":"text.delta","params":{"text":"Hello"}}"#);
    }

    #[test]
    fn params_are_camel_case() {
        let event = ProtocolEvent::ToolStart {
            tool_name: "search".into(),
            call_id: "c1".into(),
            verb: "Searching".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_line().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"method": "tool.start", "params": {"toolName": "search", "callId": "c1", "verb": "Searching"}})
        );

        let cost = serde_json::to_value(ProtocolEvent::Cost {
            input_tokens: 10,
            output_tokens: 5,
            turn_cost: 0.5,
            session_cost: 1.5,
        })
        .unwrap();
        assert_eq!(cost["params"]["inputTokens"], 10);
        assert_eq!(cost["params"]["sessionCost"], 1.5);

        let done = serde_json::to_value(ProtocolEvent::TurnComplete { message_count: 3 }).unwrap();
        assert_eq!(done, json!({"method": "turn.complete", "params": {"messageCount": 3}}));
    }

    #[test]
    fn prompt_type_field() {
        let event = ProtocolEvent::Prompt {
            kind: PromptKind::Approval,
            message: "Allow?".into(),
            choices: vec!["allow".into(), "always".into(), "deny".into()],
            tool_name: Some("write_file".into()),
            tool_args: Some(serde_json::Map::new()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["params"]["type"], "approval");
        assert_eq!(value["params"]["toolName"], "write_file");
        assert_eq!(value["params"]["toolArgs"], json!({}));

        let back: ProtocolEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn card_skips_missing_tool_fields() {
        let event = ProtocolEvent::Card {
            card_type: CardKind::Plan,
            tool_name: None,
            elapsed_ms: None,
            content: "1. do it".into(),
            data: json!({}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["params"]["cardType"], "plan");
        assert!(value["params"].get("toolName").is_none());
        assert_eq!(event.method(), "card");
    }
}
