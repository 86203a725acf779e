//! Inbound processor: records, transcribes, classifies and optionally answers
//! each webhook message.
//!
//! Flow:
//! 1. State tracker upsert (contact, conversation, message)
//! 2. Audio/voice → background transcription, then reclassification
//! 3. Conversation classification, unless disabled in the AI config
//! 4. Auto-response when `ai_active && auto_response`

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::channels::Transport;
use crate::config::AiConfigHandle;
use crate::conversations::classify::ConversationClassifier;
use crate::conversations::model::{ColorCode, Conversation};
use crate::conversations::tracker::ConversationTracker;
use crate::error::{DatabaseError, LlmError};
use crate::llm::responder::{CONTEXT_TURNS, ChatTurn, ResponseGenerator, reply_or_apology};
use crate::outcome::Outcome;
use crate::pipeline::transcribe::Transcriber;
use crate::pipeline::types::{InboundMessage, IncomingResult, WebhookPayload};

/// Handles gateway webhooks end to end.
#[derive(Clone)]
pub struct InboundProcessor {
    tracker: ConversationTracker,
    classifier: Arc<ConversationClassifier>,
    ai_config: AiConfigHandle,
    transport: Arc<dyn Transport>,
    responder: Option<Arc<dyn ResponseGenerator>>,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl InboundProcessor {
    pub fn new(
        tracker: ConversationTracker,
        classifier: Arc<ConversationClassifier>,
        ai_config: AiConfigHandle,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            tracker,
            classifier,
            ai_config,
            transport,
            responder: None,
            transcriber: None,
        }
    }

    pub fn with_responder(mut self, responder: Arc<dyn ResponseGenerator>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Process one webhook payload.
    pub async fn handle_incoming(
        &self,
        payload: &WebhookPayload,
    ) -> Result<Outcome<IncomingResult>, DatabaseError> {
        if payload.from.trim().is_empty() {
            return Ok(Outcome::failure("Missing sender"));
        }
        let inbound = InboundMessage::from_webhook(payload);
        info!(
            phone = %inbound.phone,
            message_type = inbound.message_type.as_str(),
            "Processing inbound message"
        );

        let record = self.tracker.record_inbound(&inbound).await?;
        let config = self.ai_config.snapshot().await;

        if inbound.message_type.is_audio() {
            match (&self.transcriber, &inbound.media_url) {
                (Some(_), Some(url)) => {
                    let this = self.clone();
                    let message_id = record.message.id.clone();
                    let conversation_id = record.conversation.id.clone();
                    let url = url.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this
                            .transcribe_message(&message_id, &conversation_id, &url)
                            .await
                        {
                            error!(message_id = %message_id, "Transcription failed: {}", e);
                        }
                    });
                }
                (None, _) => debug!("No transcriber configured, audio kept untranscribed"),
                (_, None) => warn!(message_id = %record.message.id, "Audio message without media URL"),
            }
        }

        let classification = if config.classification_active {
            self.classify(&record.conversation.id).await
        } else {
            None
        };

        let auto_response = if config.ai_active
            && config.auto_response
            && !inbound.text.trim().is_empty()
        {
            self.auto_respond(&record.conversation, &record.message.id, &inbound.text, &config.preamble())
                .await?
        } else {
            None
        };

        Ok(Outcome::ok(IncomingResult {
            contact_id: record.contact.id,
            conversation_id: record.conversation.id,
            message_id: record.message.id,
            classification,
            auto_response,
        }))
    }

    /// Transcribe an audio message, store the text and reclassify.
    pub async fn transcribe_message(
        &self,
        message_id: &str,
        conversation_id: &str,
        media_url: &str,
    ) -> Result<String, LlmError> {
        let Some(transcriber) = &self.transcriber else {
            return Err(LlmError::Transcription("no transcriber configured".into()));
        };
        let text = transcriber.transcribe(media_url).await?;
        let db = self.tracker.db();
        match db.set_transcription(message_id, &text, Utc::now()).await {
            Ok(true) => info!(message_id = %message_id, chars = text.len(), "Transcription stored"),
            Ok(false) => warn!(message_id = %message_id, "Transcribed message no longer exists"),
            Err(e) => {
                return Err(LlmError::Transcription(format!(
                    "failed to store transcription: {e}"
                )));
            }
        }

        if self.ai_config.snapshot().await.classification_active {
            self.classify(conversation_id).await;
        }
        Ok(text)
    }

    async fn classify(&self, conversation_id: &str) -> Option<ColorCode> {
        match self
            .classifier
            .classify_single_conversation(conversation_id, false)
            .await
        {
            Ok(outcome) => match outcome.data {
                Some(c) if c.applied => Some(c.classification),
                // Pinned: report the colour that is actually stored.
                Some(_) => match self.tracker.db().get_conversation(conversation_id).await {
                    Ok(conversation) => conversation.and_then(|c| c.color_code),
                    Err(e) => {
                        error!(conversation_id = %conversation_id, "Failed to read pinned colour: {}", e);
                        None
                    }
                },
                None => None,
            },
            Err(e) => {
                error!(conversation_id = %conversation_id, "Classification failed: {}", e);
                None
            }
        }
    }

    async fn auto_respond(
        &self,
        conversation: &Conversation,
        answering: &str,
        text: &str,
        preamble: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let recent = self
            .tracker
            .db()
            .recent_messages(&conversation.id, CONTEXT_TURNS + 1)
            .await?;
        let history = ChatTurn::context(&recent, answering);
        let reply = reply_or_apology(self.responder.as_deref(), preamble, &history, text).await;

        match self
            .transport
            .send(&conversation.contact_phone, &reply, None)
            .await
        {
            Ok(_) => {
                self.tracker
                    .record_outbound(conversation, &reply, Vec::new())
                    .await?;
                info!(conversation_id = %conversation.id, "Auto-response sent");
                Ok(Some(reply))
            }
            Err(e) => {
                warn!(conversation_id = %conversation.id, "Auto-response not delivered: {}", e);
                Ok(None)
            }
        }
    }
}
