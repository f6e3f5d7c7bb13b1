//! Prompt assembly — turns stored history, the inbound turn, and any
//! out-of-band context into the ordered message list sent to the LLM.
//!
//! Ordering is invariant: the system anchor is always index 0, the inbound
//! turn is always last, and augmentations sit strictly between history and
//! the inbound turn. When the list must shrink, only the middle history
//! segment is trimmed (oldest first) — the anchor and the live turn are
//! always worth more than old history.

use chatbridge_core::channel::ImageData;
use chatbridge_core::message::Message;
use chrono::{DateTime, Utc};

/// Maximum accepted base64 image payload. Larger images are replaced by a
/// text placeholder and never reach the wire.
pub const IMAGE_SIZE_CEILING: usize = 1_500_000;

/// Placeholder turn substituted for an oversized image.
pub const OVERSIZED_IMAGE_PLACEHOLDER: &str =
    "(The user sent an image that was too large to process. \
     Apologize briefly and ask for a smaller image.)";

/// Out-of-band context injected into the prompt as system guidance —
/// visible to the model, never stored in the durable history.
#[derive(Debug, Clone, PartialEq)]
pub struct Augmentation {
    text: String,
}

impl Augmentation {
    pub fn note(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// The inbound turn, before content-shaping.
#[derive(Debug, Clone)]
pub struct InboundPrompt {
    /// The user's text, or the fixed internal prompt for image turns
    pub text: String,
    /// Attached image content, if any
    pub image: Option<ImageData>,
}

impl InboundPrompt {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(text: impl Into<String>, image: ImageData) -> Self {
        Self {
            text: text.into(),
            image: Some(image),
        }
    }
}

/// Assembles the ordered message list for one LLM call.
///
/// Stateless — create one and reuse it across turns.
pub struct PromptAssembler {
    persona: String,
    language: String,
    max_turns: usize,
}

impl PromptAssembler {
    pub fn new(persona: impl Into<String>, language: impl Into<String>, max_turns: usize) -> Self {
        Self {
            persona: persona.into(),
            language: language.into(),
            max_turns,
        }
    }

    /// Build the message list: anchor, history, augmentations, inbound.
    pub fn assemble(
        &self,
        history: &[Message],
        inbound: &InboundPrompt,
        augmentations: &[Augmentation],
        now: DateTime<Utc>,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + augmentations.len() + 2);

        messages.push(Message::system(self.anchor(now)));

        // History verbatim, middle-trimmed from the oldest end if over
        // the window. Stored histories are already clamped; this guards
        // against oversized rows written by older revisions.
        let cap = self.max_turns * 2;
        let start = history.len().saturating_sub(cap);
        messages.extend_from_slice(&history[start..]);

        for aug in augmentations {
            messages.push(Message::system(aug.as_str()));
        }

        messages.push(Self::inbound_message(inbound));
        messages
    }

    /// The system anchor: persona, reply language, and the current time.
    /// The model cannot be trusted to know either "now" or the desired
    /// output language from training data alone.
    fn anchor(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}\nAlways respond in {}.\nCurrent date and time: {}.",
            self.persona,
            self.language,
            now.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    fn inbound_message(inbound: &InboundPrompt) -> Message {
        match &inbound.image {
            None => Message::user(inbound.text.clone()),
            Some(image) if image.base64.len() > IMAGE_SIZE_CEILING => {
                Message::user(OVERSIZED_IMAGE_PLACEHOLDER)
            }
            Some(image) => Message::user_with_image(&inbound.text, image.to_data_uri()),
        }
    }
}
