//! The agent core: the Think → Act → Observe → Repeat loop of Crucible.
//!
//! For each user goal the [`AgentCore`]:
//!
//! 1. **Appends** the goal to the session history
//! 2. **Calls the backend** with the history and the tool schemas
//! 3. **If tool calls**: gates them on approval, executes them, moves
//!    oversized results to the [`ResultStore`], appends the results and
//!    loops back to step 2
//! 4. **If text only**: appends the answer and ends the turn
//!
//! The loop also ends when the iteration budget runs out. Along the way it
//! watches for repeated identical failures ([`DoomLoopTracker`]) and prices
//! every backend call ([`CostTracker`]).

pub mod approval;
pub mod cost;
pub mod doom_loop;
pub mod loop_runner;
pub mod result_store;
pub mod settings;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use approval::{ApprovalState, Approver, AutoApprove, ChannelApprover, DenyAll};
pub use cost::CostTracker;
pub use doom_loop::DoomLoopTracker;
pub use loop_runner::AgentCore;
pub use result_store::{PEEK_TOOL_NAME, Peek, PeekError, ResultStore, StoredResult};
pub use settings::AgentSettings;
