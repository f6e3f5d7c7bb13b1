//! Messaging platform adapters for Chatbridge.
//!
//! Each adapter validates inbound webhooks, parses message events, and
//! delivers replies through the platform's REST API. One adapter ships:
//!
//! - **Line** — LINE Messaging API (signed webhooks, reply/push delivery,
//!   media content downloads)

pub mod line;

pub use line::{LineChannel, LineConfig};
