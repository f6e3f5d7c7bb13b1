//! HistoryStore trait — durable per-user conversation memory.
//!
//! The store owns the durable representation: one record per user identity
//! holding an ordered JSON array of messages. The turn controller owns the
//! in-memory working copy for the duration of one turn and is the only
//! writer back to the store.

use crate::error::HistoryError;
use crate::message::{Content, ContentPart, Message};
use async_trait::async_trait;

/// Default number of retained user/assistant exchanges. The stored history
/// holds at most `2 * max_turns` messages.
pub const DEFAULT_MAX_TURNS: usize = 5;

/// The core HistoryStore trait.
///
/// Implementations: SQLite (default), PostgreSQL, in-memory (tests and
/// ephemeral runs). `save` is an upsert keyed by user id — full overwrite,
/// last writer wins.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "postgres", "memory").
    fn name(&self) -> &str;

    /// Load the stored history for a user. An absent row is an empty
    /// history; a malformed stored value is decoded defensively to an
    /// empty history (self-healing on the next save), never an error.
    async fn load(&self, user_id: &str) -> std::result::Result<Vec<Message>, HistoryError>;

    /// Replace the stored history for a user (insert-or-update).
    /// Content is sanitized before persisting.
    async fn save(
        &self,
        user_id: &str,
        history: &[Message],
    ) -> std::result::Result<(), HistoryError>;
}

/// Truncate a history from the oldest end so at most `2 * max_turns`
/// messages remain. Order of the retained suffix is preserved.
pub fn clamp_history(history: &mut Vec<Message>, max_turns: usize) {
    let cap = max_turns * 2;
    if history.len() > cap {
        history.drain(..history.len() - cap);
    }
}

/// Strip embedded NUL characters from every string field of a history.
///
/// PostgreSQL rejects NUL bytes in text values, and model output has been
/// observed to contain them; a single stray NUL would otherwise turn the
/// save into a silent write failure.
pub fn sanitize_history(history: &mut [Message]) {
    for msg in history.iter_mut() {
        match &mut msg.content {
            Content::Text(t) => strip_nul(t),
            Content::Parts(parts) => {
                for part in parts.iter_mut() {
                    match part {
                        ContentPart::Text { text } => strip_nul(text),
                        ContentPart::Image { url } => strip_nul(url),
                    }
                }
            }
        }
        for tc in msg.tool_calls.iter_mut() {
            strip_nul(&mut tc.name);
            strip_nul(&mut tc.arguments);
        }
        if let Some(id) = msg.tool_call_id.as_mut() {
            strip_nul(id);
        }
    }
}

fn strip_nul(s: &mut String) {
    if s.contains('\0') {
        s.retain(|c| c != '\0');
    }
}
