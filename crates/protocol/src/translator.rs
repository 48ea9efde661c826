//! Agent events to protocol envelopes.
//!
//! One [`Translator`] per session. Text is buffered and flushed only at
//! boundaries (tool start, approval prompt, plan start and close, error,
//! turn end). The translator keeps its own cumulative session cost and
//! message counter.

use crucible_core::event::AgentEvent;
use tracing::debug;

use crate::cards::{CardKind, ResultShape, verb_for};
use crate::envelope::{PromptKind, ProtocolEvent};
use crate::plan::{PlanDetector, PlanSegment};

pub const APPROVAL_CHOICES: [&str; 3] = ["allow", "always", "deny"];
pub const CONFIRM_CHOICES: [&str; 2] = ["yes", "no"];

#[derive(Debug, Default)]
pub struct Translator {
    plan: PlanDetector,
    text: String,
    session_cost: f64,
    message_count: u64,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue counting from a restored session.
    pub fn with_totals(mut self, session_cost: f64, message_count: u64) -> Self {
        self.session_cost = session_cost;
        self.message_count = message_count;
        self
    }

    pub fn session_cost(&self) -> f64 {
        self.session_cost
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Forget buffered text and zero the counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Translate one agent event.
    pub fn translate(&mut self, event: &AgentEvent) -> Vec<ProtocolEvent> {
        let mut out = Vec::new();

        match event {
            AgentEvent::TextDelta { text } => {
                for segment in self.plan.push(text) {
                    match segment {
                        PlanSegment::Text(t) => self.text.push_str(&t),
                        PlanSegment::PlanStarted => self.flush_text(&mut out),
                        PlanSegment::Plan(body) => {
                            debug!(chars = body.len(), "Plan block closed");
                            out.push(plan_card(body));
                            out.push(ProtocolEvent::Prompt {
                                kind: PromptKind::Confirm,
                                message: "Proceed with this plan?".into(),
                                choices: CONFIRM_CHOICES.iter().map(|c| c.to_string()).collect(),
                                tool_name: None,
                                tool_args: None,
                            });
                        }
                    }
                }
            }

            AgentEvent::ToolCallStart {
                call_id, tool_name, ..
            } => {
                self.flush_boundary(&mut out);
                out.push(ProtocolEvent::ToolStart {
                    tool_name: tool_name.clone(),
                    call_id: call_id.clone(),
                    verb: verb_for(tool_name).to_string(),
                });
            }

            AgentEvent::ApprovalRequested {
                tool_name, arguments, ..
            } => {
                self.flush_boundary(&mut out);
                out.push(ProtocolEvent::Prompt {
                    kind: PromptKind::Approval,
                    message: format!("Allow {tool_name} to run?"),
                    choices: APPROVAL_CHOICES.iter().map(|c| c.to_string()).collect(),
                    tool_name: Some(tool_name.clone()),
                    tool_args: Some(arguments.clone()),
                });
            }

            AgentEvent::ToolCallResult {
                tool_name,
                result,
                elapsed_ms,
                ..
            } => {
                let shape = ResultShape::of(result);
                out.push(ProtocolEvent::Card {
                    card_type: shape.kind(),
                    tool_name: Some(tool_name.clone()),
                    elapsed_ms: Some(*elapsed_ms),
                    content: shape.summary(),
                    data: result.clone(),
                });
            }

            AgentEvent::TurnComplete { usage, turn_cost, .. } => {
                self.finish_text(&mut out);
                self.session_cost += turn_cost;
                self.message_count += 1;
                out.push(ProtocolEvent::Cost {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    turn_cost: *turn_cost,
                    session_cost: self.session_cost,
                });
                out.push(ProtocolEvent::TurnComplete {
                    message_count: self.message_count,
                });
            }

            AgentEvent::Error { message } => {
                self.finish_text(&mut out);
                out.push(ProtocolEvent::error_card(message));
            }
        }

        out
    }

    fn flush_text(&mut self, out: &mut Vec<ProtocolEvent>) {
        if !self.text.is_empty() {
            out.push(ProtocolEvent::text(std::mem::take(&mut self.text)));
        }
    }

    /// Flush before a tool start or prompt, including held tag candidates.
    fn flush_boundary(&mut self, out: &mut Vec<ProtocolEvent>) {
        if let Some(held) = self.plan.release_held() {
            self.text.push_str(&held);
        }
        self.flush_text(out);
    }

    /// Flush at end of turn, including anything the plan detector holds.
    fn finish_text(&mut self, out: &mut Vec<ProtocolEvent>) {
        if let Some(rest) = self.plan.finish() {
            self.text.push_str(&rest);
        }
        self.flush_text(out);
    }
}

fn plan_card(body: String) -> ProtocolEvent {
    let steps: Vec<String> = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    ProtocolEvent::Card {
        card_type: CardKind::Plan,
        tool_name: None,
        elapsed_ms: None,
        data: serde_json::json!({ "steps": steps }),
        content: body,
    }
}
