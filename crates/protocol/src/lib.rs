//! # Crucible Protocol
//!
//! Turns the agent's event stream into line-oriented envelopes any front
//! end can render: `{"method": "...", "params": {...}}`.
//!
//! - [`envelope`]: the envelope types
//! - [`translator`]: per-session [`Translator`] from agent events to envelopes
//! - [`plan`]: detection of `<plan>…</plan>` blocks in streamed text
//! - [`cards`]: deterministic display categories for tool results

pub mod cards;
pub mod envelope;
pub mod plan;
pub mod translator;

pub use cards::{CardKind, ResultShape, classify, verb_for};
pub use envelope::{PromptKind, ProtocolEvent};
pub use plan::{PlanDetector, PlanSegment, PlanState};
pub use translator::Translator;
