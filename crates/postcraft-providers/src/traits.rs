//! LLM provider trait: the seam between the dispatcher and concrete backends.
//!
//! Every supported backend speaks the OpenAI chat-completions dialect, so
//! `HttpProvider` in `http_provider.rs` is the only production implementation.
//! Tests plug in scripted providers through the same trait.

use async_trait::async_trait;

use postcraft_core::config::ProviderConfig;

use crate::error::ProviderError;

/// Sampling parameters sent with each request.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate. `None` lets the provider decide.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            temperature: 0.7,
        }
    }
}

impl LlmRequestConfig {
    /// Sampling parameters a provider config asks for, defaults elsewhere.
    pub fn from_provider(config: &ProviderConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_tokens: config.max_tokens.or(defaults.max_tokens),
            temperature: config.temperature.unwrap_or(defaults.temperature),
        }
    }
}

/// Trait that all LLM providers must implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one system + user prompt and return the generated text.
    ///
    /// # Arguments
    /// * `system_prompt`: Instructions for the model.
    /// * `user_content` : The source text to work on.
    /// * `model`        : Model identifier from the chain entry.
    ///
    /// # Errors
    /// Returns a classified [`ProviderError`]; the caller decides whether to retry.
    async fn generate(
        &self,
        system_prompt: &str,
        user_content: &str,
        model: &str,
    ) -> Result<String, ProviderError>;

    /// Registry name (e.g. `"openrouter"`).
    fn name(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_config_from_provider() {
        let unset = LlmRequestConfig::from_provider(&ProviderConfig::default());
        assert_eq!(unset.max_tokens, None);
        assert_eq!(unset.temperature, 0.7);

        let tuned = LlmRequestConfig::from_provider(&ProviderConfig {
            max_tokens: Some(4096),
            temperature: Some(1.1),
            ..Default::default()
        });
        assert_eq!(tuned.max_tokens, Some(4096));
        assert_eq!(tuned.temperature, 1.1);
    }
}
