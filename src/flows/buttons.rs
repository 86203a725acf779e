//! Interactive messages: operator sends with buttons and button clicks.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversations::model::{Button, ButtonResponse, Conversation};
use crate::error::DatabaseError;
use crate::flows::actions::ActionDispatcher;
use crate::flows::model::{ActionOutcome, Recipient};
use crate::outcome::Outcome;
use crate::store::Database;

/// Result of a button click.
#[derive(Debug, Clone, Serialize)]
pub struct ButtonResult {
    pub response_id: String,
    pub button_id: String,
    pub button_text: String,
    pub actions_executed: Vec<ActionOutcome>,
}

/// Result of an operator send.
#[derive(Debug, Clone, Serialize)]
pub struct SentMessage {
    pub message_id: String,
    pub conversation_id: String,
}

pub struct InteractiveMessages {
    db: Arc<dyn Database>,
    dispatcher: Arc<ActionDispatcher>,
}

fn recipient_for(conversation: &Conversation) -> Recipient {
    Recipient {
        name: conversation.contact_name.clone(),
        phone: conversation.contact_phone.clone(),
        conversation_id: Some(conversation.id.clone()),
        ..Default::default()
    }
}

impl InteractiveMessages {
    pub fn new(db: Arc<dyn Database>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// Send `text` (and optional buttons) into a conversation and record it.
    pub async fn send_to_conversation(
        &self,
        conversation_id: &str,
        text: &str,
        buttons: Vec<Button>,
    ) -> Result<Outcome<SentMessage>, DatabaseError> {
        let Some(conversation) = self.db.get_conversation(conversation_id).await? else {
            return Ok(Outcome::failure("Conversation not found"));
        };
        if text.trim().is_empty() {
            return Ok(Outcome::failure("Message text is empty"));
        }

        match self
            .dispatcher
            .send_text(&recipient_for(&conversation), text, buttons)
            .await
        {
            Ok(message) => Ok(Outcome::ok(SentMessage {
                message_id: message.id,
                conversation_id: conversation.id,
            })),
            Err(e) => {
                warn!(conversation_id = %conversation.id, "Operator send failed: {}", e);
                Ok(Outcome::failure(e))
            }
        }
    }

    /// Run the actions declared by a clicked button and audit the click.
    ///
    /// The audit record is written whatever the individual actions return.
    pub async fn handle_button_response(
        &self,
        message_id: &str,
        button_id: &str,
    ) -> Result<Outcome<ButtonResult>, DatabaseError> {
        let Some(message) = self.db.get_message(message_id).await? else {
            return Ok(Outcome::failure("Message not found"));
        };
        if message.buttons.is_empty() {
            return Ok(Outcome::failure("Message has no buttons"));
        }
        let Some(button) = message.find_button(button_id) else {
            return Ok(Outcome::failure("Button not found"));
        };
        let Some(conversation) = self.db.get_conversation(&message.conversation_id).await? else {
            return Ok(Outcome::failure("Conversation not found"));
        };

        let recipient = recipient_for(&conversation);
        let mut outcomes = Vec::with_capacity(button.actions.len());
        for action in &button.actions {
            outcomes.push(self.dispatcher.dispatch(action, &recipient).await);
        }

        let response = ButtonResponse {
            id: Uuid::new_v4().to_string(),
            message_id: message.id.clone(),
            conversation_id: conversation.id.clone(),
            button_id: button.id.clone(),
            button_text: button.text.clone(),
            actions_executed: outcomes,
            timestamp: Utc::now(),
        };
        self.db.insert_button_response(&response).await?;
        info!(
            conversation_id = %conversation.id,
            button_id = %button.id,
            actions = response.actions_executed.len(),
            "Button response handled"
        );

        Ok(Outcome::ok(ButtonResult {
            response_id: response.id,
            button_id: response.button_id,
            button_text: response.button_text,
            actions_executed: response.actions_executed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::model::{ColorCode, MessageType};
    use crate::conversations::tracker::ConversationTracker;
    use crate::flows::model::Action;
    use crate::pipeline::types::InboundMessage;
    use crate::store::LibSqlBackend;
    use crate::test_support::RecordingTransport;

    struct Fixture {
        db: Arc<dyn Database>,
        transport: Arc<RecordingTransport>,
        interactive: InteractiveMessages,
        conversation: Conversation,
    }

    async fn fixture() -> Fixture {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = Arc::new(ActionDispatcher::new(Arc::clone(&db), transport.clone()));
        let rec = ConversationTracker::new(Arc::clone(&db))
            .record_inbound(&InboundMessage {
                phone: "34600111222".into(),
                name: "Ana".into(),
                channel_id: None,
                message_type: MessageType::Text,
                text: "Quiero una cita".into(),
                media_url: None,
                received_at: Utc::now(),
            })
            .await
            .unwrap();
        Fixture {
            interactive: InteractiveMessages::new(Arc::clone(&db), dispatcher),
            db,
            transport,
            conversation: rec.conversation,
        }
    }

    fn buttons() -> Vec<Button> {
        vec![
            Button {
                id: "accept".into(),
                text: "Acepto".into(),
                actions: vec![
                    Action::SendConsentForm {
                        template_code: "lopd".into(),
                    },
                    Action::SendMessage {
                        message: "Gracias {Nombre}".into(),
                    },
                    Action::UpdateConversationColor { color: None },
                ],
            },
            Button {
                id: "later".into(),
                text: "Más tarde".into(),
                actions: vec![],
            },
        ]
    }

    #[tokio::test]
    async fn send_to_conversation_records_buttons() {
        let f = fixture().await;
        let out = f
            .interactive
            .send_to_conversation(&f.conversation.id, "¿Aceptas?", buttons())
            .await
            .unwrap();
        let sent = out.data.unwrap();
        assert_eq!(f.transport.sent()[0].buttons, vec!["accept", "later"]);

        let stored = f.db.get_message(&sent.message_id).await.unwrap().unwrap();
        assert!(stored.from_me);
        assert_eq!(stored.buttons.len(), 2);

        let missing = f
            .interactive
            .send_to_conversation("nope", "hola", vec![])
            .await
            .unwrap();
        assert_eq!(missing.error.as_deref(), Some("Conversation not found"));
    }

    #[tokio::test]
    async fn missing_consent_is_recorded_alongside_other_actions() {
        let f = fixture().await;
        let sent = f
            .interactive
            .send_to_conversation(&f.conversation.id, "¿Aceptas?", buttons())
            .await
            .unwrap()
            .data
            .unwrap();

        let out = f
            .interactive
            .handle_button_response(&sent.message_id, "accept")
            .await
            .unwrap();
        assert!(out.success);
        let result = out.data.unwrap();
        let flags: Vec<bool> = result.actions_executed.iter().map(|a| a.success).collect();
        assert_eq!(flags, vec![false, true, true]);
        assert!(result.actions_executed[0].error.as_ref().unwrap().contains("lopd"));

        let audit = f.db.list_button_responses(&f.conversation.id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].button_text, "Acepto");
        assert_eq!(audit[0].actions_executed, result.actions_executed);

        let conv = f.db.get_conversation(&f.conversation.id).await.unwrap().unwrap();
        assert_eq!(conv.color_code, Some(ColorCode::Resolved));
        assert!(f.transport.texts().contains(&"Gracias Ana".to_string()));
    }

    #[tokio::test]
    async fn unresolvable_clicks_are_reported() {
        let f = fixture().await;
        let out = f.interactive.handle_button_response("nope", "accept").await.unwrap();
        assert_eq!(out.error.as_deref(), Some("Message not found"));

        let plain = f
            .interactive
            .send_to_conversation(&f.conversation.id, "Sin botones", vec![])
            .await
            .unwrap()
            .data
            .unwrap();
        let out = f
            .interactive
            .handle_button_response(&plain.message_id, "accept")
            .await
            .unwrap();
        assert_eq!(out.error.as_deref(), Some("Message has no buttons"));

        let with_buttons = f
            .interactive
            .send_to_conversation(&f.conversation.id, "¿Aceptas?", buttons())
            .await
            .unwrap()
            .data
            .unwrap();
        let out = f
            .interactive
            .handle_button_response(&with_buttons.message_id, "reject")
            .await
            .unwrap();
        assert_eq!(out.error.as_deref(), Some("Button not found"));
        assert!(f.db.list_button_responses(&f.conversation.id).await.unwrap().is_empty());
    }
}
