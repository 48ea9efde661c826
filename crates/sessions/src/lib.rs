//! Session stores for Crucible.
//!
//! A session document holds host data and the conversation history. Only
//! the bounded placeholders of oversized tool results are ever persisted;
//! their full payloads live in the agent's result store and die with it.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileSessionStore;
pub use in_memory::InMemorySessionStore;

use crucible_core::error::SessionError;

/// Reject ids that could escape a store's namespace.
pub(crate) fn validate_id(id: &str) -> Result<(), SessionError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionError::Storage(format!("Invalid session id '{id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids() {
        assert!(validate_id("3f2c9a1e-0b7d-4c1e-9a55-2f0d8e6b7c11").is_ok());
        assert!(validate_id("my_session").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc/passwd").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id(&"x".repeat(200)).is_err());
    }
}
