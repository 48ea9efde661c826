//! Out-of-history storage for oversized tool outputs.
//!
//! When a tool result's serialized form is longer than the configured
//! threshold, the full payload lands here keyed by call id and the history
//! receives a bounded placeholder. The model reads the payload back through
//! the `peek_result` pseudo-tool, one character window at a time.
//!
//! Sizes and offsets count characters, not bytes, so windows never split a
//! code point and concatenating successive peeks reproduces the payload.

use crucible_core::backend::ToolSchema;
use crucible_core::tool::ToolOutput;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Name of the pagination pseudo-tool.
pub const PEEK_TOOL_NAME: &str = "peek_result";

/// Metadata about a stored payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResult {
    pub call_id: String,
    /// Length in characters
    pub size: usize,
}

/// One window read from a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Peek {
    pub chunk: String,
    pub offset: usize,
    pub has_more: bool,
    pub total_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeekError {
    #[error("No stored result with id '{0}'")]
    UnknownId(String),
}

struct Entry {
    payload: String,
    size: usize,
}

/// Per-session store of oversized payloads, with FIFO eviction.
#[derive(Default)]
pub struct ResultStore {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
    /// 0 means unbounded
    max_entries: usize,
}

impl ResultStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    /// Store a payload under `call_id`, replacing any previous one.
    pub fn store(&mut self, call_id: &str, payload: String) -> StoredResult {
        let size = payload.chars().count();

        if self.entries.insert(call_id.to_string(), Entry { payload, size }).is_some() {
            self.order.retain(|id| id != call_id);
        }
        self.order.push_back(call_id.to_string());

        if self.max_entries > 0 {
            while self.order.len() > self.max_entries {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                    debug!(result_id = %oldest, "Evicted oldest stored result");
                }
            }
        }

        StoredResult {
            call_id: call_id.to_string(),
            size,
        }
    }

    /// Read `limit` characters starting at character `offset`.
    ///
    /// An offset at or past the end yields an empty chunk with
    /// `has_more = false`.
    pub fn peek(&self, id: &str, offset: usize, limit: usize) -> Result<Peek, PeekError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| PeekError::UnknownId(id.to_string()))?;

        let chunk: String = entry.payload.chars().skip(offset).take(limit).collect();
        let end = offset.saturating_add(limit);

        Ok(Peek {
            chunk,
            offset,
            has_more: end < entry.size,
            total_size: entry.size,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// The text form a result is measured and stored in: strings raw, any
/// other value as compact JSON.
pub fn serialize_payload(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The bounded stand-in placed into history for a stored payload.
pub fn placeholder(
    stored: &StoredResult,
    payload: &str,
    preview_chars: usize,
    peek_limit: usize,
) -> serde_json::Value {
    let preview: String = payload.chars().take(preview_chars).collect();
    serde_json::json!({
        "stored": true,
        "resultId": stored.call_id,
        "totalSize": stored.size,
        "preview": preview,
        "instructions": format!(
            "This result is {} characters long and was stored instead of being shown in full. \
             Call {PEEK_TOOL_NAME} with resultId \"{}\", an offset and a limit (at most {peek_limit}) \
             to read it in pieces.",
            stored.size, stored.call_id
        ),
    })
}

/// Schema for the pagination pseudo-tool.
pub fn peek_schema(max_limit: usize) -> ToolSchema {
    ToolSchema {
        name: PEEK_TOOL_NAME.to_string(),
        description: format!(
            "Read part of a stored tool result that was too large to show in full. \
             Returns up to `limit` characters (max {max_limit}) starting at `offset`."
        ),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "resultId": { "type": "string", "description": "The resultId from the stored placeholder" },
                "offset": { "type": "integer", "minimum": 0, "description": "Character offset to start reading at" },
                "limit": { "type": "integer", "minimum": 1, "maximum": max_limit, "description": "Number of characters to read" }
            },
            "required": ["resultId"]
        }),
    }
}

/// Execute a `peek_result` call against the store.
///
/// Bad arguments and unknown ids are error values, never faults. `limit`
/// defaults to `default_limit` and is clamped to `1..=max_limit`.
pub fn run_peek(
    store: &ResultStore,
    arguments: &serde_json::Map<String, serde_json::Value>,
    default_limit: usize,
    max_limit: usize,
) -> ToolOutput {
    let Some(result_id) = arguments.get("resultId").and_then(|v| v.as_str()) else {
        return ToolOutput::error("peek_result requires a string 'resultId'");
    };

    let offset = match arguments.get("offset") {
        None | Some(serde_json::Value::Null) => 0,
        Some(v) => match v.as_u64() {
            Some(n) => n as usize,
            None => return ToolOutput::error("'offset' must be a non-negative integer"),
        },
    };

    let limit = match arguments.get("limit") {
        None | Some(serde_json::Value::Null) => default_limit,
        Some(v) => match v.as_u64() {
            Some(n) => n as usize,
            None => return ToolOutput::error("'limit' must be a positive integer"),
        },
    };
    let limit = limit.clamp(1, max_limit.max(1));

    match store.peek(result_id, offset, limit) {
        Ok(peek) => match serde_json::to_value(peek) {
            Ok(value) => ToolOutput::success(value),
            Err(e) => ToolOutput::error(e.to_string()),
        },
        Err(e) => ToolOutput::error(e.to_string()),
    }
}
