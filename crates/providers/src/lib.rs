//! LLM provider implementations for Chatbridge.
//!
//! All providers implement the `chatbridge_core::Provider` trait. A single
//! OpenAI-compatible implementation covers chat completions (text, vision
//! content parts, tool calling) and image generation.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use chatbridge_config::ProviderConfig;
use chatbridge_core::error::ProviderError;

/// Build the provider from configuration.
pub fn build_from_config(config: &ProviderConfig) -> Result<OpenAiCompatProvider, ProviderError> {
    let api_key = config.api_key.as_deref().ok_or_else(|| {
        ProviderError::NotConfigured("No API key set — supply CHATBRIDGE_API_KEY".into())
    })?;
    Ok(OpenAiCompatProvider::new("openai", &config.api_url, api_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_an_error() {
        let config = ProviderConfig::default();
        let err = build_from_config(&config).unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn configured_provider_builds() {
        let config = ProviderConfig {
            api_key: Some("sk-test".into()),
            ..ProviderConfig::default()
        };
        assert!(build_from_config(&config).is_ok());
    }
}
