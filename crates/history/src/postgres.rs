//! PostgreSQL history store.
//!
//! Same contract as the SQLite store, for deployments with a hosted
//! database. The history column is TEXT; NUL characters are stripped
//! before writing because PostgreSQL rejects them in text values.
//!
//! # Feature gate
//!
//! This module is behind the `postgres` feature flag:
//!
//! ```toml
//! chatbridge-history = { workspace = true, features = ["postgres"] }
//! ```

use crate::codec::{decode_history, encode_history};
use async_trait::async_trait;
use chatbridge_core::error::HistoryError;
use chatbridge_core::history::HistoryStore;
use chatbridge_core::message::Message;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// PostgreSQL history store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection string.
    pub async fn connect(database_url: &str) -> Result<Self, HistoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| HistoryError::Storage(format!("PostgreSQL connection failed: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Connected to PostgreSQL history store");
        Ok(store)
    }

    /// Create from an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_migrations(&self) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                user_id     TEXT PRIMARY KEY,
                history     TEXT NOT NULL,
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HistoryError::MigrationFailed(format!("conversations table: {e}")))?;

        debug!("PostgreSQL migrations complete");
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn load(&self, user_id: &str) -> Result<Vec<Message>, HistoryError> {
        let row = sqlx::query("SELECT history FROM conversations WHERE user_id = $1")
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
            VALUES ($1, $2, now())
            ON CONFLICT (user_id) DO UPDATE SET
                history = EXCLUDED.history,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&encoded)
        .execute(&self.pool)
        .await
        .map_err(|e| HistoryError::Storage(format!("UPSERT failed: {e}")))?;

        debug!(user_id, messages = history.len(), "History saved");
        Ok(())
    }
}
