//! The turn controller — orchestrates one inbound event end to end.
//!
//! `Classify → {ImageGenerate | Converse} → Respond`. Image generation is
//! a terminal short-circuit that never touches history; a converse turn
//! loads history, assembles the prompt, calls the LLM (running any
//! requested tool calls), appends the exchange, and persists.
//!
//! Failure policy: collaborator errors map to fixed apology strings per
//! error class, persistence failures are logged and the turn continues
//! without durable memory, and delivery failures are logged only.

use crate::prompt::{Augmentation, InboundPrompt, PromptAssembler};
use chatbridge_core::channel::{Channel, InboundContent, InboundEvent, OutboundMessage};
use chatbridge_core::error::ProviderError;
use chatbridge_core::history::{clamp_history, HistoryStore};
use chatbridge_core::message::Message;
use chatbridge_core::provider::{ChatRequest, Provider};
use chatbridge_core::tool::{ToolCall, ToolRegistry};
use chatbridge_tools::mathexpr;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// Fixed user-facing messages. One per provider failure class — the raw
// error text never reaches the end user.
pub const APOLOGY_BUSY: &str =
    "I'm handling a lot of messages right now — please try again in a moment.";
pub const APOLOGY_NOT_CONFIGURED: &str =
    "I'm not set up correctly at the moment. Please contact the administrator.";
pub const APOLOGY_TIMEOUT: &str = "That took too long to answer. Please try asking again.";
pub const APOLOGY_NETWORK: &str = "I couldn't reach my language service just now. Please try again shortly.";
pub const APOLOGY_API: &str = "Something went wrong while I was thinking. Please try again.";
pub const APOLOGY_GENERIC: &str = "Sorry, something unexpected went wrong. Please try again.";

/// Fixed internal prompt attached to inbound images.
pub const DESCRIBE_IMAGE_PROMPT: &str = "Describe this image.";

/// How an image turn is recorded in history — the payload itself is never
/// persisted.
pub const IMAGE_HISTORY_MARKER: &str = "[image]";

/// Augmentation note used when inbound image content cannot be fetched.
const IMAGE_UNAVAILABLE_NOTE: &str =
    "The user sent an image, but it could not be downloaded. \
     Apologize briefly and ask them to send it again.";

/// Map a provider failure to its user-facing apology.
pub fn apology_for(err: &ProviderError) -> &'static str {
    match err {
        ProviderError::RateLimited { .. } => APOLOGY_BUSY,
        ProviderError::AuthenticationFailed(_) | ProviderError::NotConfigured(_) => {
            APOLOGY_NOT_CONFIGURED
        }
        ProviderError::Timeout(_) => APOLOGY_TIMEOUT,
        ProviderError::Network(_) => APOLOGY_NETWORK,
        ProviderError::ApiError { .. } => APOLOGY_API,
    }
}

/// Turn behavior settings.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub text_model: String,
    pub vision_model: String,
    pub image_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_turns: usize,
    pub draw_triggers: Vec<String>,
    pub max_llm_calls: u32,
}

impl TurnConfig {
    pub fn from_app_config(config: &chatbridge_config::AppConfig) -> Self {
        Self {
            text_model: config.provider.text_model.clone(),
            vision_model: config.provider.vision_model.clone(),
            image_model: config.provider.image_model.clone(),
            temperature: config.provider.temperature,
            max_tokens: config.provider.max_tokens,
            max_turns: config.history.max_turns,
            draw_triggers: config.chat.draw_triggers.clone(),
            max_llm_calls: config.chat.max_llm_calls,
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self::from_app_config(&chatbridge_config::AppConfig::default())
    }
}

enum Intent {
    Draw(String),
    Converse,
}

/// Orchestrates one inbound event. All collaborators are injected, so
/// tests substitute fakes for every external system.
pub struct TurnController {
    provider: Arc<dyn Provider>,
    store: Arc<dyn HistoryStore>,
    channel: Arc<dyn Channel>,
    tools: Arc<ToolRegistry>,
    assembler: PromptAssembler,
    config: TurnConfig,
}

impl TurnController {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn HistoryStore>,
        channel: Arc<dyn Channel>,
        tools: Arc<ToolRegistry>,
        assembler: PromptAssembler,
        config: TurnConfig,
    ) -> Self {
        Self {
            provider,
            store,
            channel,
            tools,
            assembler,
            config,
        }
    }

    /// Process one inbound event to completion, ending with a delivery
    /// attempt. Never returns an error — every failure path maps to a
    /// user-facing message or a log line.
    pub async fn handle(&self, event: InboundEvent) {
        let reply = match self.classify(&event) {
            Intent::Draw(prompt) => self.image_generate(&prompt).await,
            Intent::Converse => self.converse(&event).await,
        };

        if let Err(e) = self
            .channel
            .send(&event.user_id, event.reply_token.as_deref(), &reply)
            .await
        {
            warn!(user_id = %event.user_id, error = %e, "Delivery failed");
        }
    }

    /// Prefix match against the configured trigger list. Both half- and
    /// full-width colon variants ship in the default configuration.
    fn classify(&self, event: &InboundEvent) -> Intent {
        if let InboundContent::Text { text } = &event.content {
            let trimmed = text.trim();
            for trigger in &self.config.draw_triggers {
                if let Some(rest) = trimmed.strip_prefix(trigger.as_str()) {
                    return Intent::Draw(rest.trim().to_string());
                }
            }
        }
        Intent::Converse
    }

    /// Terminal short-circuit: image requests are not part of the
    /// remembered dialogue.
    async fn image_generate(&self, prompt: &str) -> OutboundMessage {
        info!(prompt, "Generating image");
        match self
            .provider
            .generate_image(&self.config.image_model, prompt)
            .await
        {
            Ok(url) => OutboundMessage::image(url),
            Err(e) => {
                log_provider_error(&e, "Image generation failed");
                OutboundMessage::text(apology_for(&e))
            }
        }
    }

    async fn converse(&self, event: &InboundEvent) -> OutboundMessage {
        // Math shortcut: a message that is itself a pure arithmetic
        // expression is answered locally, without an LLM call.
        if let InboundContent::Text { text } = &event.content {
            if mathexpr::is_arithmetic(text) {
                if let Ok(value) = mathexpr::evaluate(text) {
                    let reply = mathexpr::format_result(value);
                    debug!(user_id = %event.user_id, "Math shortcut hit");
                    let history = self.load_soft(&event.user_id).await;
                    self.remember(&event.user_id, history, Message::user(text.trim()), &reply)
                        .await;
                    return OutboundMessage::text(reply);
                }
            }
        }

        let history = self.load_soft(&event.user_id).await;

        let mut augmentations: Vec<Augmentation> = Vec::new();
        let (prompt, model, original_turn) = match &event.content {
            InboundContent::Text { text } => (
                InboundPrompt::text_only(text.clone()),
                self.config.text_model.as_str(),
                Message::user(text.clone()),
            ),
            InboundContent::Image { message_id } => {
                match self.channel.fetch_image(message_id).await {
                    Ok(image) => (
                        InboundPrompt::with_image(DESCRIBE_IMAGE_PROMPT, image),
                        self.config.vision_model.as_str(),
                        Message::user(IMAGE_HISTORY_MARKER),
                    ),
                    Err(e) => {
                        // Degrade, don't abort: tell the model what
                        // happened and let it apologize in-language.
                        warn!(message_id = %message_id, error = %e, "Image content fetch failed");
                        augmentations.push(Augmentation::note(IMAGE_UNAVAILABLE_NOTE));
                        (
                            InboundPrompt::text_only(IMAGE_HISTORY_MARKER),
                            self.config.text_model.as_str(),
                            Message::user(IMAGE_HISTORY_MARKER),
                        )
                    }
                }
            }
        };

        let reply = self
            .complete_with_tools(&history, &prompt, &augmentations, model)
            .await;

        // The original user content is remembered — never the placeholder
        // or augmented variants.
        self.remember(&event.user_id, history, original_turn, &reply)
            .await;

        OutboundMessage::text(reply)
    }

    /// One or more completion calls, executing requested tool calls
    /// between rounds. The final allowed call offers no tools, forcing a
    /// text answer.
    async fn complete_with_tools(
        &self,
        history: &[Message],
        prompt: &InboundPrompt,
        augmentations: &[Augmentation],
        model: &str,
    ) -> String {
        let mut messages = self
            .assembler
            .assemble(history, prompt, augmentations, Utc::now());

        let tool_definitions = self.tools.definitions();
        let mut calls_remaining = self.config.max_llm_calls;

        loop {
            calls_remaining -= 1;
            let offer_tools = calls_remaining > 0 && !tool_definitions.is_empty();

            let request = ChatRequest {
                model: model.to_string(),
                messages: messages.clone(),
                temperature: self.config.temperature,
                max_tokens: Some(self.config.max_tokens),
                tools: if offer_tools {
                    tool_definitions.clone()
                } else {
                    Vec::new()
                },
            };

            let response = match self.provider.complete(request).await {
                Ok(r) => r,
                Err(e) => {
                    log_provider_error(&e, "Completion failed");
                    return apology_for(&e).to_string();
                }
            };

            if response.message.tool_calls.is_empty() || calls_remaining == 0 {
                let text = response
                    .message
                    .content
                    .as_text()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                return if text.is_empty() {
                    warn!("Model returned empty reply");
                    APOLOGY_API.to_string()
                } else {
                    text
                };
            }

            // Execute requested tools and feed the results back for the
            // next round. A failed tool degrades to an error string the
            // model can explain around.
            debug!(
                count = response.message.tool_calls.len(),
                "Executing tool calls"
            );
            let tool_calls = response.message.tool_calls.clone();
            messages.push(response.message);

            for tc in &tool_calls {
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments: serde_json::from_str(&tc.arguments).unwrap_or_default(),
                };
                let output = match self.tools.execute(&call).await {
                    Ok(result) => result.output,
                    Err(e) => {
                        warn!(tool = %tc.name, error = %e, "Tool execution failed");
                        format!("Error: {e}")
                    }
                };
                messages.push(Message::tool_result(&tc.id, output));
            }
        }
    }

    /// Load history, degrading to empty when the store is unreachable —
    /// the reply must still be attempted.
    async fn load_soft(&self, user_id: &str) -> Vec<Message> {
        match self.store.load(user_id).await {
            Ok(history) => history,
            Err(e) => {
                warn!(user_id, error = %e, "History load failed — proceeding without history");
                Vec::new()
            }
        }
    }

    /// Append the exchange, clamp to the retention window, persist.
    /// Persistence failures are logged; the turn continues.
    async fn remember(
        &self,
        user_id: &str,
        mut history: Vec<Message>,
        user_turn: Message,
        reply: &str,
    ) {
        history.push(user_turn);
        history.push(Message::assistant(reply));
        clamp_history(&mut history, self.config.max_turns);

        if let Err(e) = self.store.save(user_id, &history).await {
            warn!(user_id, error = %e, "History save failed — turn completes without durable memory");
        }
    }
}

fn log_provider_error(e: &ProviderError, context: &str) {
    match e {
        ProviderError::AuthenticationFailed(_) | ProviderError::NotConfigured(_) => {
            error!(error = %e, "{context}");
        }
        _ => warn!(error = %e, "{context}"),
    }
}
