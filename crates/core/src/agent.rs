//! Agent loop phases and approval types.

use serde::{Deserialize, Serialize};

/// Where a session's loop currently is.
///
/// `Idle → Thinking → (Responding | Acting → [AwaitingApproval] →
/// ExecutingTools → Observing → Thinking)`, bounded by the iteration budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    #[default]
    Idle,
    /// A backend call is outstanding
    Thinking,
    /// The backend answered without tool calls; terminal for the turn
    Responding,
    /// At least one tool call is pending
    Acting,
    /// Waiting for a human decision on a pending call
    AwaitingApproval,
    ExecutingTools,
    /// Tool results are being appended to history
    Observing,
}

impl std::fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Responding => "responding",
            Self::Acting => "acting",
            Self::AwaitingApproval => "awaiting_approval",
            Self::ExecutingTools => "executing_tools",
            Self::Observing => "observing",
        };
        f.write_str(s)
    }
}

/// A human decision on a tool call that requires consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Run this call only
    AllowOnce,
    /// Run this call and every later call of the same tool in this session
    Always,
    /// Do not run; the model sees a synthetic denial result
    Deny,
}

impl ApprovalDecision {
    /// Parse a front-end answer. Accepts the prompt choices and a few
    /// common spellings.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "allow" | "allow once" | "allow_once" | "once" | "y" | "yes" => Some(Self::AllowOnce),
            "always" | "a" => Some(Self::Always),
            "deny" | "n" | "no" => Some(Self::Deny),
            _ => None,
        }
    }

    pub fn is_allowed(self) -> bool {
        !matches!(self, Self::Deny)
    }
}

/// What a host is asked to decide on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_defaults_to_idle() {
        assert_eq!(AgentPhase::default(), AgentPhase::Idle);
        assert_eq!(AgentPhase::AwaitingApproval.to_string(), "awaiting_approval");
    }

    #[test]
    fn parse_decisions() {
        assert_eq!(ApprovalDecision::parse("allow"), Some(ApprovalDecision::AllowOnce));
        assert_eq!(ApprovalDecision::parse(" Always "), Some(ApprovalDecision::Always));
        assert_eq!(ApprovalDecision::parse("deny"), Some(ApprovalDecision::Deny));
        assert_eq!(ApprovalDecision::parse("maybe"), None);
    }

    #[test]
    fn decision_serialization() {
        let json = serde_json::to_string(&ApprovalDecision::AllowOnce).unwrap();
        assert_eq!(json, r#""allow_once""#);
        assert!(!ApprovalDecision::Deny.is_allowed());
    }
}
