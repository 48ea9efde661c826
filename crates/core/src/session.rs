//! Session persistence boundary.
//!
//! A session document is `{data, history}`. Only what the agent core put
//! into history is persisted; oversized tool outputs live in the result
//! store and are represented here by their bounded placeholders.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::message::Message;

/// A persisted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    /// Session id (the conversation id)
    pub id: String,

    /// Host-owned key-value data (titles, UI state, running totals)
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,

    /// Conversation history
    #[serde(default)]
    pub history: Vec<Message>,

    /// When this document was last written
    pub updated_at: DateTime<Utc>,
}

impl SessionDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: serde_json::Map::new(),
            history: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// The storage trait all session backends implement.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Backend name (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    /// Load a session by id.
    async fn load(&self, id: &str) -> Result<Option<SessionDocument>, SessionError>;

    /// Insert or replace a session.
    async fn save(&self, document: &SessionDocument) -> Result<(), SessionError>;

    /// Delete a session. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, SessionError>;

    /// List stored session ids, sorted.
    async fn list(&self) -> Result<Vec<String>, SessionError>;
}
