//! In-memory session store, useful for testing and ephemeral hosts.

use async_trait::async_trait;
use crucible_core::error::SessionError;
use crucible_core::session::{SessionDocument, SessionStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::validate_id;

#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    documents: Arc<RwLock<HashMap<String, SessionDocument>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self, id: &str) -> Result<Option<SessionDocument>, SessionError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn save(&self, document: &SessionDocument) -> Result<(), SessionError> {
        validate_id(&document.id)?;
        self.documents
            .write()
            .await
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.documents.write().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>, SessionError> {
        let mut ids: Vec<String> = self.documents.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::message::Message;

    #[tokio::test]
    async fn save_load_delete() {
        let store = InMemorySessionStore::new();
        let mut doc = SessionDocument::new("s1");
        doc.history.push(Message::user("hello"));
        doc.data.insert("title".into(), serde_json::json!("Greeting"));

        store.save(&doc).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.history, doc.history);
        assert_eq!(loaded.data["title"], "Greeting");

        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
        assert!(store.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let store = InMemorySessionStore::new();
        for id in ["b", "c", "a"] {
            store.save(&SessionDocument::new(id)).await.unwrap();
        }
        assert_eq!(store.list().await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn rejects_bad_ids() {
        let store = InMemorySessionStore::new();
        assert!(store.save(&SessionDocument::new("../x")).await.is_err());
    }
}
