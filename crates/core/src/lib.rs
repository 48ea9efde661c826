//! # Crucible Core
//!
//! Domain types, traits, and error definitions for the Crucible agent
//! execution engine. This crate has **no framework dependencies**: it defines
//! the neutral model that the backends, the agent core, the protocol
//! translator and the session stores implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator at the edge of the engine is a trait here:
//! - [`Backend`]: an LLM capability provider
//! - [`Tool`]: a side-effecting plugin the model may call
//! - [`SessionStore`]: durable storage for session documents
//!
//! Implementations live in their respective crates, so the loop can be
//! tested against scripted backends and in-process tools.

pub mod agent;
pub mod backend;
pub mod error;
pub mod event;
pub mod message;
pub mod session;
pub mod tool;
pub mod usage;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentPhase, ApprovalDecision, ApprovalRequest};
pub use backend::{Backend, BackendEvent, BackendRequest, BackendResponse, ToolSchema};
pub use error::{BackendError, Error, Result, SessionError, ToolError};
pub use event::AgentEvent;
pub use message::{Conversation, ConversationId, Message, ToolCallRequest};
pub use session::{SessionDocument, SessionStore};
pub use tool::{Tool, ToolOutput, ToolRegistry};
pub use usage::{ModelPricing, UsageInfo};
