//! # Chatbridge Core
//!
//! Domain types, traits, and error definitions for the Chatbridge webhook
//! relay. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (LLM provider, messaging channel, history
//! store, tool) is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod channel;
pub mod error;
pub mod history;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use channel::{Channel, ImageData, InboundContent, InboundEvent, OutboundMessage};
pub use error::{ChannelError, Error, HistoryError, ProviderError, Result, ToolError};
pub use history::{HistoryStore, clamp_history, sanitize_history, DEFAULT_MAX_TURNS};
pub use message::{Content, ContentPart, Message, MessageToolCall, Role};
pub use provider::{ChatRequest, ChatResponse, Provider, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
