//! Approval gating.
//!
//! A tool call needs human consent when the tool asks for it, the session
//! is not auto-approving, and the tool has not been "always" allowed
//! earlier in the session. The [`Approver`] is where the loop suspends
//! until a host answers.

use async_trait::async_trait;
use crucible_core::agent::{ApprovalDecision, ApprovalRequest};
use crucible_core::tool::ToolOutput;
use std::collections::HashSet;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Decides on tool calls that require consent.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Allows every call once.
pub struct AutoApprove;

#[async_trait]
impl Approver for AutoApprove {
    async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::AllowOnce
    }
}

/// Denies every call.
pub struct DenyAll;

#[async_trait]
impl Approver for DenyAll {
    async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Deny
    }
}

/// Waits for decisions pushed by a host through a channel.
///
/// Decisions are consumed in order, one per pending request. If the host
/// drops its sender the call is denied.
pub struct ChannelApprover {
    decisions: Mutex<mpsc::Receiver<ApprovalDecision>>,
}

impl ChannelApprover {
    /// Create the approver and the sender the host answers on.
    pub fn new() -> (Self, mpsc::Sender<ApprovalDecision>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Self {
                decisions: Mutex::new(rx),
            },
            tx,
        )
    }
}

#[async_trait]
impl Approver for ChannelApprover {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        debug!(tool = %request.tool_name, call_id = %request.call_id, "Waiting for approval");
        match self.decisions.lock().await.recv().await {
            Some(decision) => decision,
            None => {
                warn!(tool = %request.tool_name, "Approval channel closed, denying");
                ApprovalDecision::Deny
            }
        }
    }
}

/// Per-session approval memory.
#[derive(Debug, Default)]
pub struct ApprovalState {
    always_allowed: HashSet<String>,
}

impl ApprovalState {
    /// Whether a call to `tool_name` must be put to the approver.
    pub fn needs_consent(&self, tool_name: &str, requires_approval: bool, auto_approve: bool) -> bool {
        requires_approval && !auto_approve && !self.always_allowed.contains(tool_name)
    }

    /// Apply a decision's side effect on the session.
    pub fn record(&mut self, tool_name: &str, decision: ApprovalDecision) {
        if decision == ApprovalDecision::Always {
            self.always_allowed.insert(tool_name.to_string());
        }
    }

    /// Always-allowed tool names, sorted.
    pub fn always_allowed(&self) -> Vec<String> {
        let mut names: Vec<String> = self.always_allowed.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&mut self) {
        self.always_allowed.clear();
    }
}

/// The synthetic result a denied call produces.
pub fn denial(tool_name: &str) -> ToolOutput {
    ToolOutput::error(format!("User denied execution of {tool_name}"))
}
