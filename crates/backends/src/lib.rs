//! LLM backend implementations for Crucible.
//!
//! All backends implement the `crucible_core::Backend` trait.
//! `build_from_config` selects the adapter and wraps it with retry.

pub mod anthropic;
pub mod factory;
mod http;
pub mod openai_compat;
pub mod retry;

pub use anthropic::AnthropicBackend;
pub use http::parse_retry_after;
pub use openai_compat::OpenAiCompatBackend;
pub use retry::{RetryPolicy, RetryingBackend};
pub use factory::build_from_config;
