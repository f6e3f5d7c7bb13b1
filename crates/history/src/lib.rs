//! Conversation history store implementations for Chatbridge.
//!
//! Each backend persists one record per user identity holding the JSON
//! array of stored messages, with upsert (full overwrite) semantics.

pub mod codec;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use chatbridge_core::error::HistoryError;
use chatbridge_core::history::HistoryStore;
use std::sync::Arc;

/// Build a history store from configuration.
pub async fn build_from_config(
    backend: &str,
    url: &str,
) -> Result<Arc<dyn HistoryStore>, HistoryError> {
    match backend {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Arc::new(SqliteStore::new(url).await?)),
        #[cfg(feature = "postgres")]
        "postgres" => Ok(Arc::new(PostgresStore::connect(url).await?)),
        other => Err(HistoryError::Storage(format!(
            "history backend '{other}' is not available in this build"
        ))),
    }
}
