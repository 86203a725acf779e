//! LLM integration.
//!
//! Uses rig-core's OpenRouter provider for the auto-responder and for the
//! optional urgency fallback. Both sit behind traits so the engine runs (and
//! tests) without a provider.

pub mod classifier;
pub mod responder;

pub use classifier::{RigUrgencyModel, UrgencyModel};
pub use responder::{ChatTurn, ResponseGenerator, RigResponder};

use rig::providers::openrouter;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;

/// Default OpenRouter model.
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-chat:free";

/// Configuration for the LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    /// Output cap for generated replies.
    pub max_tokens: u64,
}

impl LlmConfig {
    /// `None` when no API key is configured; the engine then runs rules-only
    /// and answers auto-responses with the static apology.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())?;
        Some(Self {
            api_key: SecretString::from(api_key),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
        })
    }
}

/// Create an OpenRouter client from configuration.
pub fn create_client(config: &LlmConfig) -> Result<openrouter::Client, LlmError> {
    let client = openrouter::Client::new(config.api_key.expose_secret()).map_err(|e| {
        LlmError::RequestFailed {
            provider: "openrouter".to_string(),
            reason: format!("Failed to create OpenRouter client: {}", e),
        }
    })?;
    tracing::info!("Using OpenRouter (model: {})", config.model);
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_constructs_with_any_key() {
        // The provider only rejects a bad key when a request is made.
        let config = LlmConfig {
            api_key: SecretString::from("sk-or-test"),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 500,
        };
        assert!(create_client(&config).is_ok());
    }
}
