//! SQLite history store.
//!
//! One row per user in a `conversations` table; the history column holds
//! the JSON-array blob. The schema is created automatically at startup.

use crate::codec::{decode_history, encode_history};
use async_trait::async_trait;
use chatbridge_core::error::HistoryError;
use chatbridge_core::history::HistoryStore;
use chatbridge_core::message::Message;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed history store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a path or `sqlite://` URL.
    ///
    /// The database file and schema are created automatically. Pass
    /// `":memory:"` for an in-process ephemeral database (useful for
    /// tests).
    pub async fn new(path: &str) -> Result<Self, HistoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| HistoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database exists per connection; a pool of them
        // would each see a different (empty) database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite history store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                user_id     TEXT PRIMARY KEY,
                history     TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HistoryError::MigrationFailed(format!("conversations table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, user_id: &str) -> Result<Vec<Message>, HistoryError> {
        let row = sqlx::query("SELECT history FROM conversations WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| HistoryError::Storage(format!("SELECT failed: {e}")))?;

        let Some(row) = row else {
            return Ok(Vec::new());
        };

        let raw: String = row
            .try_get("history")
            .map_err(|e| HistoryError::Storage(format!("history column: {e}")))?;

        Ok(decode_history(user_id, &raw))
    }

    async fn save(&self, user_id: &str, history: &[Message]) -> Result<(), HistoryError> {
        let encoded = encode_history(history)
            .map_err(|e| HistoryError::Storage(format!("History serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO conversations (user_id, history, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                history = excluded.history,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&encoded)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| HistoryError::Storage(format!("UPSERT failed: {e}")))?;

        debug!(user_id, messages = history.len(), "History saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn save_and_load_preserves_order() {
        let store = memory_store().await;
        let history = vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
            Message::assistant("four"),
        ];
        store.save("U1", &history).await.unwrap();
        assert_eq!(store.load("U1").await.unwrap(), history);
    }

    #[tokio::test]
    async fn unknown_user_loads_empty() {
        let store = memory_store().await;
        assert!(store.load("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_overwrites_existing_row() {
        let store = memory_store().await;
        store.save("U1", &[Message::user("old")]).await.unwrap();
        store
            .save("U1", &[Message::user("new"), Message::assistant("reply")])
            .await
            .unwrap();

        let loaded = store.load("U1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content.as_text(), Some("new"));
    }

    #[tokio::test]
    async fn malformed_row_recovers_to_empty() {
        let store = memory_store().await;
        sqlx::query(
            "INSERT INTO conversations (user_id, history, updated_at) VALUES ('U1', 'oops', '')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        assert!(store.load("U1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = memory_store().await;
        store.save("U1", &[Message::user("alpha")]).await.unwrap();
        store.save("U2", &[Message::user("beta")]).await.unwrap();

        assert_eq!(
            store.load("U1").await.unwrap()[0].content.as_text(),
            Some("alpha")
        );
        assert_eq!(
            store.load("U2").await.unwrap()[0].content.as_text(),
            Some("beta")
        );
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let url = format!("sqlite://{}", path.display());

        {
            let store = SqliteStore::new(&url).await.unwrap();
            store.save("U1", &[Message::user("durable")]).await.unwrap();
        }

        let store = SqliteStore::new(&url).await.unwrap();
        let loaded = store.load("U1").await.unwrap();
        assert_eq!(loaded[0].content.as_text(), Some("durable"));
    }
}
