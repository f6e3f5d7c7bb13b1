//! Configuration loading and validation for Chatbridge.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides. Validates all settings at startup. Secrets are redacted from
//! Debug output.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `chatbridge.toml`.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// LLM provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Messaging platform settings
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Conversation history settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Turn behavior settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("messaging", &self.messaging)
            .field("history", &self.history)
            .field("chat", &self.chat)
            .field("server", &self.server)
            .finish()
    }
}

/// LLM provider configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key. Usually supplied via `CHATBRIDGE_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model for plain text turns
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// Model for turns carrying an image
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Model for image generation
    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_text_model() -> String {
    "gpt-4o-mini".into()
}
fn default_vision_model() -> String {
    "gpt-4o".into()
}
fn default_image_model() -> String {
    "dall-e-3".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            text_model: default_text_model(),
            vision_model: default_vision_model(),
            image_model: default_image_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("text_model", &self.text_model)
            .field("vision_model", &self.vision_model)
            .field("image_model", &self.image_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Messaging platform configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Shared secret used to validate webhook signatures.
    /// Empty = validation disabled (development only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_secret: Option<String>,

    /// Bearer token for the platform's reply/push APIs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Base URL for messaging endpoints
    #[serde(default = "default_messaging_api")]
    pub api_base: String,

    /// Base URL for media content downloads
    #[serde(default = "default_content_api")]
    pub content_base: String,
}

fn default_messaging_api() -> String {
    "https://api.line.me/v2/bot".into()
}
fn default_content_api() -> String {
    "https://api-data.line.me/v2/bot".into()
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            channel_secret: None,
            access_token: None,
            api_base: default_messaging_api(),
            content_base: default_content_api(),
        }
    }
}

impl std::fmt::Debug for MessagingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingConfig")
            .field("channel_secret", &redact(&self.channel_secret))
            .field("access_token", &redact(&self.access_token))
            .field("api_base", &self.api_base)
            .field("content_base", &self.content_base)
            .finish()
    }
}

/// Conversation history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Backend: "sqlite", "postgres", or "memory"
    #[serde(default = "default_history_backend")]
    pub backend: String,

    /// SQLite path or PostgreSQL connection string
    #[serde(default = "default_history_url")]
    pub url: String,

    /// Retained user/assistant exchanges per user (stored messages = 2x)
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

fn default_history_backend() -> String {
    "sqlite".into()
}
fn default_history_url() -> String {
    "sqlite://chatbridge.db".into()
}
fn default_max_turns() -> usize {
    5
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_history_backend(),
            url: default_history_url(),
            max_turns: default_max_turns(),
        }
    }
}

/// Turn behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Behavioral instructions placed in the system anchor
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Language the assistant should reply in (anchored in the system
    /// message — the model's own default cannot be trusted)
    #[serde(default = "default_language")]
    pub language: String,

    /// Leading phrases that route a message to image generation.
    /// Both half- and full-width colon variants are recognized by default.
    #[serde(default = "default_draw_triggers")]
    pub draw_triggers: Vec<String>,

    /// Maximum LLM calls per turn (1 initial + tool-call follow-ups)
    #[serde(default = "default_max_llm_calls")]
    pub max_llm_calls: u32,
}

fn default_persona() -> String {
    "You are a concise, friendly assistant chatting with users on a messaging app.".into()
}
fn default_language() -> String {
    "English".into()
}
fn default_draw_triggers() -> Vec<String> {
    vec!["draw:".into(), "draw：".into()]
}
fn default_max_llm_calls() -> u32 {
    2
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            language: default_language(),
            draw_triggers: default_draw_triggers(),
            max_llm_calls: default_max_llm_calls(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrently processing turns
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_max_workers() -> usize {
    32
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_workers: default_max_workers(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a file path, then apply environment
    /// variable overrides (highest priority):
    ///
    /// - `CHATBRIDGE_API_KEY` / `OPENAI_API_KEY`
    /// - `CHATBRIDGE_CHANNEL_SECRET`
    /// - `CHATBRIDGE_ACCESS_TOKEN`
    /// - `CHATBRIDGE_DATABASE_URL`
    /// - `CHATBRIDGE_PORT`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("CHATBRIDGE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }
        if let Ok(secret) = std::env::var("CHATBRIDGE_CHANNEL_SECRET") {
            self.messaging.channel_secret = Some(secret);
        }
        if let Ok(token) = std::env::var("CHATBRIDGE_ACCESS_TOKEN") {
            self.messaging.access_token = Some(token);
        }
        if let Ok(url) = std::env::var("CHATBRIDGE_DATABASE_URL") {
            self.history.url = url;
        }
        if let Ok(port) = std::env::var("CHATBRIDGE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.history.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "history.max_turns must be at least 1".into(),
            ));
        }
        if self.chat.max_llm_calls == 0 {
            return Err(ConfigError::ValidationError(
                "chat.max_llm_calls must be at least 1".into(),
            ));
        }
        match self.history.backend.as_str() {
            "sqlite" | "postgres" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown history backend '{other}' (expected sqlite, postgres, or memory)"
                )));
            }
        }
        if self.server.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string (for `chatbridge init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.max_turns, 5);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.chat.draw_triggers, vec!["draw:", "draw："]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.text_model, config.provider.text_model);
        assert_eq!(parsed.history.backend, config.history.backend);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            provider: ProviderConfig {
                temperature: 5.0,
                ..ProviderConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_turns_rejected() {
        let config = AppConfig {
            history: HistoryConfig {
                max_turns: 0,
                ..HistoryConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        let config = AppConfig {
            history: HistoryConfig {
                backend: "redis".into(),
                ..HistoryConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/chatbridge.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().provider.text_model, "gpt-4o-mini");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[chat]\nlanguage = \"Traditional Chinese\"\n\n[server]\nport = 9000"
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.chat.language, "Traditional Chinese");
        assert_eq!(config.server.port, 9000);
        // Untouched sections keep defaults
        assert_eq!(config.history.backend, "sqlite");
        assert_eq!(config.provider.api_url, "https://api.openai.com/v1");
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = AppConfig {
            provider: ProviderConfig {
                api_key: Some("sk-very-secret".into()),
                ..ProviderConfig::default()
            },
            messaging: MessagingConfig {
                channel_secret: Some("shh".into()),
                access_token: Some("token".into()),
                ..MessagingConfig::default()
            },
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(!debug.contains("shh"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("max_turns"));
    }
}
