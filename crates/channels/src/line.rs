//! LINE Messaging API channel adapter.
//!
//! Handles the full platform surface this service touches:
//! - Webhook signature validation (base64 HMAC-SHA256 of the raw body)
//! - Parsing message events out of the webhook payload
//! - Reply (single-use token) and push delivery
//! - Downloading inbound image content

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chatbridge_core::channel::{Channel, ImageData, InboundContent, InboundEvent, OutboundMessage};
use chatbridge_core::error::ChannelError;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// LINE channel configuration.
#[derive(Debug, Clone)]
pub struct LineConfig {
    /// Channel secret for signature validation. None = no validation
    /// (development only).
    pub channel_secret: Option<String>,
    /// Bearer token for the reply/push/content APIs.
    pub access_token: Option<String>,
    /// Messaging endpoint base.
    pub api_base: String,
    /// Media content endpoint base.
    pub content_base: String,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_secret: None,
            access_token: None,
            api_base: "https://api.line.me/v2/bot".into(),
            content_base: "https://api-data.line.me/v2/bot".into(),
        }
    }
}

impl From<&chatbridge_config::MessagingConfig> for LineConfig {
    fn from(cfg: &chatbridge_config::MessagingConfig) -> Self {
        Self {
            channel_secret: cfg.channel_secret.clone(),
            access_token: cfg.access_token.clone(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            content_base: cfg.content_base.trim_end_matches('/').to_string(),
        }
    }
}

/// LINE channel adapter.
pub struct LineChannel {
    config: LineConfig,
    client: reqwest::Client,
}

impl LineChannel {
    pub fn new(config: LineConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    /// Validate the `X-Line-Signature` header against the raw body.
    ///
    /// The signature is the base64-encoded HMAC-SHA256 digest of the body
    /// keyed with the channel secret. Comparison is constant-time.
    pub fn validate_signature(&self, payload: &[u8], signature: &str) -> bool {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        match &self.config.channel_secret {
            None => true, // No secret configured = no validation
            Some(secret) if secret.is_empty() => true,
            Some(secret) => {
                let provided = match BASE64.decode(signature.trim()) {
                    Ok(bytes) => bytes,
                    Err(_) => return false, // Invalid base64 = reject
                };

                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .expect("HMAC accepts any key length");
                mac.update(payload);
                mac.verify_slice(&provided).is_ok()
            }
        }
    }

    /// Extract message events from a validated webhook payload.
    ///
    /// Non-message events (follows, joins, unsends) are ignored; message
    /// types other than text and image are ignored too.
    pub fn parse_events(&self, payload: &[u8]) -> Result<Vec<InboundEvent>, ChannelError> {
        let parsed: WebhookPayload = serde_json::from_slice(payload)
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

        let events = parsed
            .events
            .into_iter()
            .filter(|e| e.kind == "message")
            .filter_map(|e| {
                let user_id = e.source.and_then(|s| s.user_id)?;
                let message = e.message?;
                let content = match message.kind.as_str() {
                    "text" => InboundContent::Text {
                        text: message.text.unwrap_or_default(),
                    },
                    "image" => InboundContent::Image {
                        message_id: message.id,
                    },
                    other => {
                        debug!(kind = other, "Ignoring unsupported message type");
                        return None;
                    }
                };
                Some(InboundEvent {
                    user_id,
                    reply_token: e.reply_token,
                    content,
                })
            })
            .collect();

        Ok(events)
    }

    fn bearer(&self) -> Result<String, ChannelError> {
        self.config
            .access_token
            .as_deref()
            .map(|t| format!("Bearer {t}"))
            .ok_or_else(|| ChannelError::NotConfigured("No messaging access token set".into()))
    }

    fn to_api_message(message: &OutboundMessage) -> serde_json::Value {
        match message {
            OutboundMessage::Text { text } => {
                serde_json::json!({ "type": "text", "text": text })
            }
            OutboundMessage::Image { original, preview } => serde_json::json!({
                "type": "image",
                "originalContentUrl": original,
                "previewImageUrl": preview,
            }),
        }
    }

    async fn post_messages(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<(), ChannelError> {
        let url = format!("{}/{endpoint}", self.config.api_base);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer()?)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::DeliveryFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ChannelError::DeliveryFailed(format!(
                "{endpoint} returned {status}: {error_body}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for LineChannel {
    fn name(&self) -> &str {
        "line"
    }

    async fn send(
        &self,
        user_id: &str,
        reply_token: Option<&str>,
        message: &OutboundMessage,
    ) -> Result<(), ChannelError> {
        let api_message = Self::to_api_message(message);

        // Reply tokens are single-use and expire quickly; fall back to
        // push delivery when the reply attempt is rejected.
        if let Some(token) = reply_token {
            let body = serde_json::json!({ "replyToken": token, "messages": [api_message] });
            match self.post_messages("message/reply", body).await {
                Ok(()) => {
                    debug!(user_id, "Reply delivered");
                    return Ok(());
                }
                Err(e) => {
                    warn!(user_id, error = %e, "Reply failed, falling back to push");
                }
            }
        }

        let body = serde_json::json!({ "to": user_id, "messages": [api_message] });
        self.post_messages("message/push", body).await?;
        debug!(user_id, "Push delivered");
        Ok(())
    }

    async fn fetch_image(&self, message_id: &str) -> Result<ImageData, ChannelError> {
        let url = format!("{}/message/{message_id}/content", self.config.content_base);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer()?)
            .send()
            .await
            .map_err(|e| ChannelError::ContentFetchFailed {
                message_id: message_id.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ChannelError::ContentFetchFailed {
                message_id: message_id.to_string(),
                reason: format!("content endpoint returned {}", response.status()),
            });
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChannelError::ContentFetchFailed {
                message_id: message_id.to_string(),
                reason: e.to_string(),
            })?;

        info!(message_id, bytes = bytes.len(), "Image content fetched");
        Ok(ImageData {
            media_type,
            base64: BASE64.encode(&bytes),
        })
    }
}

// --- Webhook payload types (internal) ---

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    reply_token: Option<String>,
    #[serde(default)]
    source: Option<EventSource>,
    #[serde(default)]
    message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventSource {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    fn channel_with_secret(secret: &str) -> LineChannel {
        LineChannel::new(LineConfig {
            channel_secret: Some(secret.into()),
            ..LineConfig::default()
        })
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        BASE64.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_accepted() {
        let ch = channel_with_secret("topsecret");
        let body = br#"{"events":[]}"#;
        assert!(ch.validate_signature(body, &sign("topsecret", body)));
    }

    #[test]
    fn wrong_secret_rejected() {
        let ch = channel_with_secret("topsecret");
        let body = br#"{"events":[]}"#;
        assert!(!ch.validate_signature(body, &sign("other", body)));
    }

    #[test]
    fn tampered_body_rejected() {
        let ch = channel_with_secret("topsecret");
        let signature = sign("topsecret", b"original");
        assert!(!ch.validate_signature(b"tampered", &signature));
    }

    #[test]
    fn garbage_signature_rejected() {
        let ch = channel_with_secret("topsecret");
        assert!(!ch.validate_signature(b"body", "not base64 !!!"));
    }

    #[test]
    fn no_secret_skips_validation() {
        let ch = LineChannel::new(LineConfig::default());
        assert!(ch.validate_signature(b"anything", "any"));
    }

    #[test]
    fn parse_text_event() {
        let ch = LineChannel::new(LineConfig::default());
        let payload = br#"{
            "destination": "xyz",
            "events": [{
                "type": "message",
                "replyToken": "rt-1",
                "source": { "type": "user", "userId": "U123" },
                "message": { "id": "m1", "type": "text", "text": "hello" }
            }]
        }"#;
        let events = ch.parse_events(payload).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "U123");
        assert_eq!(events[0].reply_token.as_deref(), Some("rt-1"));
        assert_eq!(
            events[0].content,
            InboundContent::Text {
                text: "hello".into()
            }
        );
    }

    #[test]
    fn parse_image_event() {
        let ch = LineChannel::new(LineConfig::default());
        let payload = br#"{
            "events": [{
                "type": "message",
                "replyToken": "rt-2",
                "source": { "userId": "U9" },
                "message": { "id": "m77", "type": "image" }
            }]
        }"#;
        let events = ch.parse_events(payload).unwrap();
        assert_eq!(
            events[0].content,
            InboundContent::Image {
                message_id: "m77".into()
            }
        );
    }

    #[test]
    fn non_message_events_ignored() {
        let ch = LineChannel::new(LineConfig::default());
        let payload = br#"{
            "events": [
                { "type": "follow", "source": { "userId": "U1" } },
                { "type": "message", "source": { "userId": "U2" },
                  "message": { "id": "m1", "type": "sticker" } }
            ]
        }"#;
        let events = ch.parse_events(payload).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let ch = LineChannel::new(LineConfig::default());
        let err = ch.parse_events(b"{{nope").unwrap_err();
        assert!(matches!(err, ChannelError::InvalidPayload(_)));
    }

    #[test]
    fn empty_payload_yields_no_events() {
        let ch = LineChannel::new(LineConfig::default());
        assert!(ch.parse_events(b"{}").unwrap().is_empty());
    }

    #[test]
    fn text_message_wire_format() {
        let json = LineChannel::to_api_message(&OutboundMessage::text("hi"));
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hi");
    }

    #[test]
    fn image_message_wire_format() {
        let json =
            LineChannel::to_api_message(&OutboundMessage::image("https://img.example/cat.png"));
        assert_eq!(json["type"], "image");
        assert_eq!(json["originalContentUrl"], "https://img.example/cat.png");
        assert_eq!(json["previewImageUrl"], "https://img.example/cat.png");
    }

    #[tokio::test]
    async fn send_without_token_is_not_configured() {
        let ch = LineChannel::new(LineConfig::default());
        let err = ch
            .send("U1", None, &OutboundMessage::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
    }
}
