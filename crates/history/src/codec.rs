//! Shared encode/decode logic for stored history blobs.
//!
//! Every backend stores the same representation — a JSON array of
//! `{role, content}` messages — and decodes it defensively: a malformed
//! row yields an empty history (self-healing on the next save) rather
//! than aborting the turn.

use chatbridge_core::history::sanitize_history;
use chatbridge_core::message::Message;
use tracing::warn;

/// Decode a stored history value.
///
/// Accepts either the native JSON array or a double-encoded variant
/// (a JSON string whose contents are the array) — older rows written
/// through a stringifying driver decode transparently. Anything else is
/// logged and treated as empty.
pub fn decode_history(user_id: &str, raw: &str) -> Vec<Message> {
    let mut value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(user_id, error = %e, "Stored history is not valid JSON, starting fresh");
            return Vec::new();
        }
    };

    if let serde_json::Value::String(inner) = value {
        value = match serde_json::from_str(&inner) {
            Ok(v) => v,
            Err(e) => {
                warn!(user_id, error = %e, "Double-encoded history did not parse, starting fresh");
                return Vec::new();
            }
        };
    }

    if !value.is_array() {
        warn!(user_id, "Stored history is not an array, starting fresh");
        return Vec::new();
    }

    match serde_json::from_value(value) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(user_id, error = %e, "Stored history entries malformed, starting fresh");
            Vec::new()
        }
    }
}

/// Encode a history for persistence, sanitizing content first.
pub fn encode_history(history: &[Message]) -> Result<String, serde_json::Error> {
    let mut cleaned = history.to_vec();
    sanitize_history(&mut cleaned);
    serde_json::to_string(&cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let encoded = encode_history(&history).unwrap();
        let decoded = decode_history("u1", &encoded);
        assert_eq!(decoded, history);
    }

    #[test]
    fn double_encoded_value_accepted() {
        let history = vec![Message::user("hi")];
        let inner = encode_history(&history).unwrap();
        let outer = serde_json::to_string(&inner).unwrap();
        let decoded = decode_history("u1", &outer);
        assert_eq!(decoded, history);
    }

    #[test]
    fn garbage_decodes_to_empty() {
        assert!(decode_history("u1", "not json at all").is_empty());
        assert!(decode_history("u1", "42").is_empty());
        assert!(decode_history("u1", r#"{"role":"user"}"#).is_empty());
        assert!(decode_history("u1", r#""still not an array""#).is_empty());
    }

    #[test]
    fn malformed_entries_decode_to_empty() {
        let decoded = decode_history("u1", r#"[{"role":"martian","content":"hi"}]"#);
        assert!(decoded.is_empty());
    }

    #[test]
    fn encode_strips_nul_characters() {
        let history = vec![Message::user("a\0b")];
        let encoded = encode_history(&history).unwrap();
        assert!(!encoded.contains('\u{0}'));
        let decoded = decode_history("u1", &encoded);
        assert_eq!(decoded[0].content.as_text(), Some("ab"));
    }

    #[test]
    fn encode_is_stable_across_round_trips() {
        let history = vec![Message::user("he\0llo"), Message::assistant("wor\0ld")];
        let once = encode_history(&history).unwrap();
        let decoded = decode_history("u1", &once);
        let twice = encode_history(&decoded).unwrap();
        assert_eq!(once, twice);
    }
}
