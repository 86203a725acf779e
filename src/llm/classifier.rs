//! Generative fallback for urgency classification.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openrouter;

use crate::conversations::model::ColorCode;
use crate::error::LlmError;
use crate::llm::{LlmConfig, create_client};

const CLASSIFIER_PREAMBLE: &str = "Eres el sistema de triaje de una clínica dental. \
Clasifica el mensaje del paciente respondiendo con UNA sola palabra: \
URGENT si describe dolor, sangrado, infección, hinchazón o un traumatismo; \
RESOLVED si el paciente agradece o da la conversación por cerrada; \
ATTENTION en cualquier otro caso.";

/// Classifies text the keyword rules did not recognise.
#[async_trait]
pub trait UrgencyModel: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ColorCode, LlmError>;
}

/// rig-backed urgency model.
pub struct RigUrgencyModel {
    client: openrouter::Client,
    model: String,
}

impl RigUrgencyModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: create_client(config)?,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl UrgencyModel for RigUrgencyModel {
    async fn classify(&self, text: &str) -> Result<ColorCode, LlmError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(CLASSIFIER_PREAMBLE)
            .max_tokens(8)
            .temperature(0.0)
            .build();

        let answer = agent
            .prompt(text)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: "openrouter".to_string(),
                reason: e.to_string(),
            })?;

        parse_label(&answer).ok_or_else(|| LlmError::InvalidResponse {
            provider: "openrouter".to_string(),
            reason: format!("unexpected label '{}'", answer.trim()),
        })
    }
}

/// Accept the first word of the answer, ignoring punctuation.
fn parse_label(answer: &str) -> Option<ColorCode> {
    answer
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .and_then(|w| w.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_labels() {
        assert_eq!(parse_label("URGENT"), Some(ColorCode::Urgent));
        assert_eq!(parse_label(" attention.\n"), Some(ColorCode::Attention));
        assert_eq!(parse_label("**RESOLVED** because"), Some(ColorCode::Resolved));
        assert_eq!(parse_label("No lo sé"), None);
        assert_eq!(parse_label(""), None);
    }
}
