//! Free-text reply generation for auto-responses.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Chat;
use rig::message::Message as RigMessage;
use rig::providers::openrouter;
use serde::Serialize;

use crate::conversations::model::Message;
use crate::error::LlmError;
use crate::llm::{LlmConfig, create_client};

/// Sent when generation fails or no provider is configured.
pub const APOLOGY: &str = "Lo siento, en este momento no puedo procesar tu consulta. \
                           Por favor, contacta directamente con la clínica.";

/// Number of prior turns given to the model.
pub const CONTEXT_TURNS: usize = 5;

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub from_me: bool,
    pub text: String,
}

impl ChatTurn {
    /// Build context turns from messages given newest first, skipping the
    /// message being answered. Returned oldest first.
    pub fn context(messages: &[Message], answering: &str) -> Vec<ChatTurn> {
        let mut turns: Vec<ChatTurn> = messages
            .iter()
            .filter(|m| m.id != answering)
            .filter_map(|m| {
                let text = m.transcription.as_deref().unwrap_or(&m.text).trim();
                (!text.is_empty()).then(|| ChatTurn {
                    from_me: m.from_me,
                    text: text.to_string(),
                })
            })
            .take(CONTEXT_TURNS)
            .collect();
        turns.reverse();
        turns
    }
}

/// Generates a reply to a patient message.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        preamble: &str,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<String, LlmError>;
}

/// Run `generator`, degrading to [`APOLOGY`] on any failure.
pub async fn reply_or_apology(
    generator: Option<&dyn ResponseGenerator>,
    preamble: &str,
    history: &[ChatTurn],
    message: &str,
) -> String {
    let Some(generator) = generator else {
        return APOLOGY.to_string();
    };
    match generator.generate(preamble, history, message).await {
        Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
        Ok(_) => {
            tracing::warn!("Response generator returned an empty reply");
            APOLOGY.to_string()
        }
        Err(e) => {
            tracing::error!("Response generation failed: {}", e);
            APOLOGY.to_string()
        }
    }
}

/// rig-backed generator using an OpenRouter chat agent.
pub struct RigResponder {
    client: openrouter::Client,
    model: String,
    max_tokens: u64,
}

impl RigResponder {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: create_client(config)?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ResponseGenerator for RigResponder {
    async fn generate(
        &self,
        preamble: &str,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<String, LlmError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(preamble)
            .max_tokens(self.max_tokens)
            .build();

        let history: Vec<RigMessage> = history
            .iter()
            .map(|t| {
                if t.from_me {
                    RigMessage::assistant(t.text.clone())
                } else {
                    RigMessage::user(t.text.clone())
                }
            })
            .collect();

        agent
            .chat(message, history)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: "openrouter".to_string(),
                reason: e.to_string(),
            })
    }
}
