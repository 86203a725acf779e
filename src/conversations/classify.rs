//! Conversation-level urgency classification and manual pinning.
//!
//! Automatic writes go through a conditional update that skips pinned
//! conversations, so a manual override racing an inbound classification
//! always wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::conversations::model::{ColorCode, Conversation, Message};
use crate::error::DatabaseError;
use crate::llm::classifier::UrgencyModel;
use crate::outcome::Outcome;
use crate::pipeline::rules::KeywordClassifier;
use crate::store::Database;

/// Result of classifying one conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub conversation_id: String,
    pub contact_name: String,
    pub classification: ColorCode,
    /// False when a manual pin kept the stored colour.
    pub applied: bool,
}

/// One line of a classify-all run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifyAllEntry {
    pub conversation_id: String,
    pub contact_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ColorCode>,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifyAllReport {
    pub classified_count: usize,
    pub results: Vec<ClassifyAllEntry>,
}

/// Colour state after a manual change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualClassification {
    pub conversation_id: String,
    pub classification: Option<ColorCode>,
    pub manually_classified: bool,
}

/// Classifies conversations from their recent messages.
pub struct ConversationClassifier {
    db: Arc<dyn Database>,
    rules: KeywordClassifier,
    model: Option<Arc<dyn UrgencyModel>>,
    window: usize,
    lookback: Duration,
}

impl ConversationClassifier {
    pub fn new(db: Arc<dyn Database>, rules: KeywordClassifier) -> Self {
        Self {
            db,
            rules,
            model: None,
            window: 5,
            lookback: Duration::from_secs(24 * 3600),
        }
    }

    /// Consult `model` when no keyword rule matches.
    pub fn with_model(mut self, model: Arc<dyn UrgencyModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_window(mut self, window: usize, lookback: Duration) -> Self {
        self.window = window.max(1);
        self.lookback = lookback;
        self
    }

    /// Classify free text: keyword rules first, then the model, else ATTENTION.
    pub async fn classify_text(&self, text: &str) -> ColorCode {
        if let Some(m) = self.rules.evaluate(text) {
            return m.color;
        }
        if let Some(model) = &self.model {
            match model.classify(text).await {
                Ok(color) => return color,
                Err(e) => warn!("Urgency model failed, using default: {}", e),
            }
        }
        self.rules.classify(text)
    }

    /// Classify a conversation from its last messages.
    ///
    /// Without `force`, a manually pinned conversation keeps its colour and
    /// the result reports `applied: false`.
    pub async fn classify_single_conversation(
        &self,
        conversation_id: &str,
        force: bool,
    ) -> Result<Outcome<Classification>, DatabaseError> {
        let Some(conversation) = self.db.get_conversation(conversation_id).await? else {
            return Ok(Outcome::failure("Conversation not found"));
        };
        self.classify_conversation(&conversation, force).await
    }

    async fn classify_conversation(
        &self,
        conversation: &Conversation,
        force: bool,
    ) -> Result<Outcome<Classification>, DatabaseError> {
        let messages = self.db.recent_messages(&conversation.id, self.window).await?;
        if messages.is_empty() {
            return Ok(Outcome::failure("No messages found"));
        }

        let combined = combined_text(&messages);
        let color = self.classify_text(&combined).await;
        let applied = self
            .db
            .apply_auto_classification(&conversation.id, color, Utc::now(), force)
            .await?;

        if applied {
            debug!(conversation_id = %conversation.id, color = %color, "Conversation classified");
        } else {
            debug!(
                conversation_id = %conversation.id,
                color = %color,
                "Conversation is manually classified, colour kept"
            );
        }

        Ok(Outcome::ok(Classification {
            conversation_id: conversation.id.clone(),
            contact_name: conversation.contact_name.clone(),
            classification: color,
            applied,
        }))
    }

    /// Classify every conversation active within the lookback window.
    ///
    /// Each conversation is isolated: a failure is recorded in its entry and
    /// the run continues.
    pub async fn classify_all_conversations(&self) -> Result<ClassifyAllReport, DatabaseError> {
        let lookback = chrono::Duration::from_std(self.lookback)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let since = Utc::now() - lookback;
        let conversations = self.db.list_conversations_updated_since(since).await?;

        let mut results = Vec::with_capacity(conversations.len());
        for conversation in &conversations {
            let entry = match self.classify_conversation(conversation, false).await {
                Ok(Outcome {
                    data: Some(c), ..
                }) => ClassifyAllEntry {
                    conversation_id: c.conversation_id,
                    contact_name: c.contact_name,
                    classification: Some(c.classification),
                    applied: c.applied,
                    error: None,
                },
                Ok(Outcome { error, .. }) => ClassifyAllEntry {
                    conversation_id: conversation.id.clone(),
                    contact_name: conversation.contact_name.clone(),
                    classification: None,
                    applied: false,
                    error,
                },
                Err(e) => {
                    warn!(conversation_id = %conversation.id, "Classification failed: {}", e);
                    ClassifyAllEntry {
                        conversation_id: conversation.id.clone(),
                        contact_name: conversation.contact_name.clone(),
                        classification: None,
                        applied: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(entry);
        }

        let classified_count = results.iter().filter(|r| r.applied).count();
        info!(
            total = results.len(),
            classified = classified_count,
            "Classified recent conversations"
        );
        Ok(ClassifyAllReport {
            classified_count,
            results,
        })
    }

    /// Pin a colour; automatic classification leaves it alone until cleared.
    pub async fn set_manual_classification(
        &self,
        conversation_id: &str,
        color: ColorCode,
    ) -> Result<Outcome<ManualClassification>, DatabaseError> {
        if !self
            .db
            .set_manual_classification(conversation_id, color, Utc::now())
            .await?
        {
            return Ok(Outcome::failure("Conversation not found"));
        }
        info!(conversation_id, color = %color, "Conversation pinned");
        Ok(Outcome::ok(ManualClassification {
            conversation_id: conversation_id.to_string(),
            classification: Some(color),
            manually_classified: true,
        }))
    }

    /// Remove the pin and the colour.
    pub async fn clear_classification(
        &self,
        conversation_id: &str,
    ) -> Result<Outcome<ManualClassification>, DatabaseError> {
        if !self.db.clear_classification(conversation_id, Utc::now()).await? {
            return Ok(Outcome::failure("Conversation not found"));
        }
        info!(conversation_id, "Conversation classification cleared");
        Ok(Outcome::ok(ManualClassification {
            conversation_id: conversation_id.to_string(),
            classification: None,
            manually_classified: false,
        }))
    }

    /// Conversations of one colour (or all), most recent activity first.
    pub async fn conversations_by_color(
        &self,
        color: Option<ColorCode>,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        self.db.list_conversations(color).await
    }
}

/// Recent message bodies joined newest first; audio contributes its transcription.
fn combined_text(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| match (&m.transcription, m.text.trim().is_empty()) {
            (Some(t), true) => t.as_str(),
            _ => m.text.as_str(),
        })
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
