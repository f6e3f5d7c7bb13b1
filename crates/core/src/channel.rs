//! Channel trait — the abstraction over the messaging platform.
//!
//! A Channel delivers replies to users and fetches inbound media content.
//! Webhook parsing and signature validation are implementation concerns of
//! the concrete channel; only delivery and content fetch cross this seam.

use crate::error::ChannelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One inbound message event, already validated and parsed by the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Stable platform user identity
    pub user_id: String,

    /// Single-use reply token, when the platform issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_token: Option<String>,

    /// What the user sent
    pub content: InboundContent,
}

/// What arrived in an inbound message event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundContent {
    Text { text: String },
    /// Image content is fetched lazily by id — the webhook event only
    /// carries a reference, not the bytes.
    Image { message_id: String },
}

/// Downloaded inbound image content.
#[derive(Debug, Clone)]
pub struct ImageData {
    /// MIME type as reported by the platform (e.g. "image/jpeg")
    pub media_type: String,

    /// Base64-encoded image bytes
    pub base64: String,
}

impl ImageData {
    /// Render as a `data:` URI suitable for a vision content part.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64)
    }
}

/// A reply going back out to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text { text: String },
    Image { original: String, preview: String },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        OutboundMessage::Text { text: text.into() }
    }

    /// An image reply where one URL serves as both full-size and preview.
    pub fn image(url: impl Into<String>) -> Self {
        let url = url.into();
        OutboundMessage::Image {
            preview: url.clone(),
            original: url,
        }
    }
}

/// The core Channel trait.
///
/// Implementations handle platform-specific authentication, payload
/// formats, and endpoints.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "line").
    fn name(&self) -> &str;

    /// Deliver a message to a user. Uses the reply token when present and
    /// still valid, falling back to push delivery.
    async fn send(
        &self,
        user_id: &str,
        reply_token: Option<&str>,
        message: &OutboundMessage,
    ) -> std::result::Result<(), ChannelError>;

    /// Download inbound image content by message id.
    async fn fetch_image(
        &self,
        message_id: &str,
    ) -> std::result::Result<ImageData, ChannelError>;
}
