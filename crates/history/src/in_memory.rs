//! In-memory store — useful for testing and ephemeral sessions.
//!
//! Round-trips through the same JSON encoding as the durable backends so
//! sanitization and defensive decoding behave identically.

use crate::codec::{decode_history, encode_history};
use async_trait::async_trait;
use chatbridge_core::error::HistoryError;
use chatbridge_core::history::HistoryStore;
use chatbridge_core::message::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An in-memory history store backed by a HashMap.
pub struct InMemoryStore {
    rows: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Plant a raw stored value for a user (test helper for malformed-row
    /// scenarios).
    pub async fn insert_raw(&self, user_id: &str, raw: impl Into<String>) {
        self.rows.write().await.insert(user_id.into(), raw.into());
    }

    /// Number of stored users.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, user_id: &str) -> Result<Vec<Message>, HistoryError> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(user_id)
            .map(|raw| decode_history(user_id, raw))
            .unwrap_or_default())
    }

    async fn save(&self, user_id: &str, history: &[Message]) -> Result<(), HistoryError> {
        let encoded = encode_history(history)
            .map_err(|e| HistoryError::Storage(format!("History serialization: {e}")))?;
        self.rows.write().await.insert(user_id.to_string(), encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_preserves_order() {
        let store = InMemoryStore::new();
        let history = vec![
            Message::user("first"),
            Message::assistant("second"),
            Message::user("third"),
        ];
        store.save("U1", &history).await.unwrap();

        let loaded = store.load("U1").await.unwrap();
        assert_eq!(loaded, history);
    }

    #[tokio::test]
    async fn unknown_user_loads_empty() {
        let store = InMemoryStore::new();
        assert!(store.load("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_is_upsert() {
        let store = InMemoryStore::new();
        store.save("U1", &[Message::user("old")]).await.unwrap();
        store.save("U1", &[Message::user("new")]).await.unwrap();

        let loaded = store.load("U1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content.as_text(), Some("new"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn malformed_row_recovers_to_empty() {
        let store = InMemoryStore::new();
        store.insert_raw("U1", "{{{garbage").await;
        assert!(store.load("U1").await.unwrap().is_empty());

        // Next save heals the row
        store.save("U1", &[Message::user("fresh")]).await.unwrap();
        assert_eq!(store.load("U1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn nul_characters_never_persisted() {
        let store = InMemoryStore::new();
        store.save("U1", &[Message::user("a\0b")]).await.unwrap();

        let loaded = store.load("U1").await.unwrap();
        assert_eq!(loaded[0].content.as_text(), Some("ab"));

        // Round-tripping again yields the same cleaned result
        store.save("U1", &loaded).await.unwrap();
        assert_eq!(store.load("U1").await.unwrap(), loaded);
    }
}
