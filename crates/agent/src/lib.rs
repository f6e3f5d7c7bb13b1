//! Turn orchestration for Chatbridge.
//!
//! One inbound message event flows through a fixed state machine:
//!
//! 1. **Classify** — a leading trigger phrase routes to image generation;
//!    everything else (text or a received image) converses
//! 2. **Converse** — load history, assemble the prompt, call the LLM
//!    (executing any requested tool calls), and remember the exchange
//! 3. **Respond** — deliver the reply through the channel
//!
//! Every external failure is mapped to a canned user-facing message; the
//! turn always ends with a delivery attempt.

pub mod dispatch;
pub mod prompt;
pub mod turn;

pub use dispatch::Dispatcher;
pub use prompt::{Augmentation, InboundPrompt, PromptAssembler, IMAGE_SIZE_CEILING};
pub use turn::{TurnConfig, TurnController};
