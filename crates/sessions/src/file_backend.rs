//! File-based session store: one pretty-printed JSON document per session.
//!
//! Storage location: `~/.crucible/sessions/<id>.json` by default. The
//! directory is created on the first write. Documents are written to a
//! temporary file and renamed into place, so a crash never leaves a
//! half-written session behind.

use async_trait::async_trait;
use crucible_core::error::SessionError;
use crucible_core::session::{SessionDocument, SessionStore};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::validate_id;

const EXTENSION: &str = "json";

pub struct FileSessionStore {
    directory: PathBuf,
}

impl FileSessionStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, SessionError> {
        validate_id(id)?;
        Ok(self.directory.join(format!("{id}.{EXTENSION}")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, id: &str) -> Result<Option<SessionDocument>, SessionError> {
        let path = self.path_for(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SessionError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let document = serde_json::from_str(&content).map_err(|e| {
            SessionError::Serialization(format!("Corrupted session file {}: {e}", path.display()))
        })?;
        debug!(session_id = %id, "Session loaded");
        Ok(Some(document))
    }

    async fn save(&self, document: &SessionDocument) -> Result<(), SessionError> {
        let path = self.path_for(&document.id)?;

        tokio::fs::create_dir_all(&self.directory).await.map_err(|e| {
            SessionError::Storage(format!("Failed to create session directory: {e}"))
        })?;

        let content = serde_json::to_string_pretty(document)
            .map_err(|e| SessionError::Serialization(format!("Failed to serialize session: {e}")))?;

        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to write session file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to move session file into place: {e}")))?;

        debug!(session_id = %document.id, messages = document.history.len(), "Session saved");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SessionError::Storage(format!("Failed to delete session: {e}"))),
        }
    }

    async fn list(&self) -> Result<Vec<String>, SessionError> {
        let mut dir = match tokio::fs::read_dir(&self.directory).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::Storage(format!("Failed to list sessions: {e}"))),
        };

        let mut ids = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable session directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && validate_id(stem).is_ok()
            {
                ids.push(stem.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }
}
