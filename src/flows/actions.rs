//! Typed side effects of flow steps and buttons.
//!
//! Every dispatch yields an [`ActionOutcome`]; failures are recorded, never
//! raised, so sibling actions and the enclosing step keep running.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::channels::Transport;
use crate::conversations::model::{Button, ColorCode, Conversation, Message};
use crate::conversations::tracker::ConversationTracker;
use crate::error::FlowError;
use crate::flows::model::{Action, ActionOutcome, Recipient};
use crate::flows::template::render;
use crate::reminders::appointment::AppointmentStatus;
use crate::store::Database;

/// Executes [`Action`]s against the store and the transport.
pub struct ActionDispatcher {
    db: Arc<dyn Database>,
    transport: Arc<dyn Transport>,
    tracker: ConversationTracker,
}

impl ActionDispatcher {
    pub fn new(db: Arc<dyn Database>, transport: Arc<dyn Transport>) -> Self {
        let tracker = ConversationTracker::new(Arc::clone(&db));
        Self {
            db,
            transport,
            tracker,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run one action. Unknown actions are skipped.
    pub async fn dispatch(&self, action: &Action, recipient: &Recipient) -> ActionOutcome {
        let tag = action.type_tag();
        let result = match action {
            Action::UpdateStatus {
                value,
                appointment_id,
            } => {
                self.update_status(value, appointment_id.as_deref(), recipient)
                    .await
            }
            Action::SendMessage { message } => {
                let text = render(message, &recipient.bindings());
                self.send_text(recipient, &text, Vec::new())
                    .await
                    .map(|m| format!("message {} sent", m.id))
            }
            Action::SendConsentForm { template_code } => {
                self.send_consent(template_code, recipient).await
            }
            Action::UpdateConversationColor { color } => {
                return self
                    .update_color(color.unwrap_or(ColorCode::Resolved), recipient)
                    .await;
            }
            Action::Unknown => {
                debug!("Skipping unknown action type");
                return ActionOutcome::skipped(tag, "unknown action type");
            }
        };

        match result {
            Ok(detail) => ActionOutcome::ok(tag, detail),
            Err(e) => {
                warn!(action = tag, phone = %recipient.phone, "Action failed: {}", e);
                ActionOutcome::failed(tag, e.to_string())
            }
        }
    }

    /// Send text to the recipient and record it as an outbound message.
    pub async fn send_text(
        &self,
        recipient: &Recipient,
        text: &str,
        buttons: Vec<Button>,
    ) -> Result<Message, FlowError> {
        let buttons_ref = (!buttons.is_empty()).then_some(buttons.as_slice());
        self.transport
            .send(&recipient.phone, text, buttons_ref)
            .await?;

        let message = match self.recipient_conversation(recipient).await? {
            Some(conversation) => {
                self.tracker
                    .record_outbound(&conversation, text, buttons)
                    .await?
            }
            None => {
                let name = format!("{} {}", recipient.name, recipient.surname);
                self.tracker
                    .record_outbound_to_phone(&recipient.phone, name.trim(), text)
                    .await?
            }
        };
        Ok(message)
    }

    async fn update_status(
        &self,
        value: &str,
        appointment_id: Option<&str>,
        recipient: &Recipient,
    ) -> Result<String, FlowError> {
        let id = appointment_id
            .or(recipient.appointment_id.as_deref())
            .ok_or_else(|| FlowError::MissingParameter {
                action: "update_status".into(),
                param: "appointment_id".into(),
            })?;
        let status = AppointmentStatus::parse(value);
        if !self
            .db
            .update_appointment_status(id, &status, Utc::now())
            .await?
        {
            return Err(FlowError::not_found("appointment", id));
        }
        Ok(format!("appointment {id} set to {status}"))
    }

    async fn send_consent(&self, code: &str, recipient: &Recipient) -> Result<String, FlowError> {
        let template = self
            .db
            .get_consent_template_by_code(code)
            .await?
            .ok_or_else(|| FlowError::not_found("consent template", code))?;
        let message = self
            .send_text(recipient, &template.to_message(), Vec::new())
            .await?;
        Ok(format!("consent '{code}' sent as message {}", message.id))
    }

    async fn update_color(&self, color: ColorCode, recipient: &Recipient) -> ActionOutcome {
        let tag = "update_conversation_color";
        let conversation = match self.recipient_conversation(recipient).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                return ActionOutcome::failed(
                    tag,
                    FlowError::not_found("conversation", &recipient.phone).to_string(),
                );
            }
            Err(e) => return ActionOutcome::failed(tag, e.to_string()),
        };

        match self
            .db
            .apply_auto_classification(&conversation.id, color, Utc::now(), false)
            .await
        {
            Ok(true) => ActionOutcome::ok(tag, format!("conversation set to {color}")),
            Ok(false) => ActionOutcome::skipped(tag, "conversation is manually classified"),
            Err(e) => ActionOutcome::failed(tag, e.to_string()),
        }
    }

    /// The recipient's conversation: by id when known, else by phone.
    async fn recipient_conversation(
        &self,
        recipient: &Recipient,
    ) -> Result<Option<Conversation>, FlowError> {
        if let Some(id) = &recipient.conversation_id {
            return Ok(self.db.get_conversation(id).await?);
        }
        let Some(contact) = self.db.get_contact_by_phone(&recipient.phone).await? else {
            return Ok(None);
        };
        Ok(self.db.get_conversation_by_contact(&contact.id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::model::MessageType;
    use crate::flows::model::ConsentTemplate;
    use crate::pipeline::types::InboundMessage;
    use crate::reminders::appointment::Appointment;
    use crate::store::LibSqlBackend;
    use crate::test_support::RecordingTransport;

    struct Fixture {
        db: Arc<dyn Database>,
        transport: Arc<RecordingTransport>,
        dispatcher: ActionDispatcher,
    }

    async fn fixture(transport: RecordingTransport) -> Fixture {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(transport);
        let dispatcher = ActionDispatcher::new(Arc::clone(&db), transport.clone());
        Fixture {
            db,
            transport,
            dispatcher,
        }
    }

    fn recipient() -> Recipient {
        Recipient {
            name: "Ana".into(),
            surname: "López".into(),
            phone: "34600111222".into(),
            time: "10:00".into(),
            date: "09/03/2026".into(),
            doctor: "Dr. Rubio".into(),
            treatment: "Limpieza".into(),
            appointment_id: Some("R-1".into()),
            conversation_id: None,
        }
    }

    async fn seed_appointment(db: &Arc<dyn Database>) {
        db.upsert_appointment(&Appointment {
            registro: "R-1".into(),
            name: "Ana".into(),
            surname: "López".into(),
            phone: "34600111222".into(),
            date: "2026-03-09".into(),
            time: "10:00".into(),
            status: AppointmentStatus::Planned,
            doctor: "Dr. Rubio".into(),
            treatment: "Limpieza".into(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn send_message_renders_and_records() {
        let f = fixture(RecordingTransport::new()).await;
        let out = f
            .dispatcher
            .dispatch(
                &Action::SendMessage {
                    message: "Hola {Nombre}, te atiende {Doctor}".into(),
                },
                &recipient(),
            )
            .await;
        assert!(out.success, "{out:?}");
        assert_eq!(f.transport.texts(), vec!["Hola Ana, te atiende Dr. Rubio"]);

        let contact = f.db.get_contact_by_phone("34600111222").await.unwrap().unwrap();
        assert_eq!(contact.name, "Ana López");
        let conv = f.db.get_conversation_by_contact(&contact.id).await.unwrap().unwrap();
        let msgs = f.db.recent_messages(&conv.id, 5).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].from_me);
        assert_eq!(conv.unread_count, 0);
    }

    #[tokio::test]
    async fn transport_failure_is_recorded() {
        let f = fixture(RecordingTransport::failing_on("Hola")).await;
        let out = f
            .dispatcher
            .dispatch(&Action::SendMessage { message: "Hola".into() }, &recipient())
            .await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("500"));
        assert!(f.db.get_contact_by_phone("34600111222").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_status_writes_back() {
        let f = fixture(RecordingTransport::new()).await;
        seed_appointment(&f.db).await;

        let out = f
            .dispatcher
            .dispatch(
                &Action::UpdateStatus {
                    value: "confirmada".into(),
                    appointment_id: None,
                },
                &recipient(),
            )
            .await;
        assert!(out.success, "{out:?}");
        let a = f.db.get_appointment("R-1").await.unwrap().unwrap();
        assert_eq!(a.status, AppointmentStatus::Confirmed);
    }

    #[tokio::test]
    async fn update_status_without_target_fails() {
        let f = fixture(RecordingTransport::new()).await;
        let mut r = recipient();
        r.appointment_id = None;
        let missing_id = f
            .dispatcher
            .dispatch(
                &Action::UpdateStatus {
                    value: "confirmada".into(),
                    appointment_id: None,
                },
                &r,
            )
            .await;
        assert!(!missing_id.success);
        assert!(missing_id.error.unwrap().contains("appointment_id"));

        let unknown = f
            .dispatcher
            .dispatch(
                &Action::UpdateStatus {
                    value: "confirmada".into(),
                    appointment_id: Some("R-404".into()),
                },
                &recipient(),
            )
            .await;
        assert!(!unknown.success);
        assert!(unknown.error.unwrap().contains("R-404"));
    }

    #[tokio::test]
    async fn consent_form_is_formatted_and_sent() {
        let f = fixture(RecordingTransport::new()).await;
        f.db.insert_consent_template(&ConsentTemplate::new(
            "implante",
            "Implante dental",
            "Descripción",
            vec!["Inflamación".into()],
        ))
        .await
        .unwrap();

        let ok = f
            .dispatcher
            .dispatch(
                &Action::SendConsentForm {
                    template_code: "implante".into(),
                },
                &recipient(),
            )
            .await;
        assert!(ok.success);
        let sent = f.transport.texts();
        assert!(sent[0].contains("- Inflamación"));
        assert!(sent[0].contains("ACEPTO"));

        let missing = f
            .dispatcher
            .dispatch(
                &Action::SendConsentForm {
                    template_code: "lopd".into(),
                },
                &recipient(),
            )
            .await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("lopd"));
    }

    #[tokio::test]
    async fn color_update_honors_manual_pin() {
        let f = fixture(RecordingTransport::new()).await;
        let tracker = ConversationTracker::new(Arc::clone(&f.db));
        let rec = tracker
            .record_inbound(&InboundMessage {
                phone: "34600111222".into(),
                name: "Ana".into(),
                channel_id: None,
                message_type: MessageType::Text,
                text: "hola".into(),
                media_url: None,
                received_at: Utc::now(),
            })
            .await
            .unwrap();

        let out = f
            .dispatcher
            .dispatch(&Action::UpdateConversationColor { color: None }, &recipient())
            .await;
        assert!(out.success);
        let conv = f.db.get_conversation(&rec.conversation.id).await.unwrap().unwrap();
        assert_eq!(conv.color_code, Some(ColorCode::Resolved));

        f.db.set_manual_classification(&conv.id, ColorCode::Urgent, Utc::now())
            .await
            .unwrap();
        let out = f
            .dispatcher
            .dispatch(
                &Action::UpdateConversationColor {
                    color: Some(ColorCode::Attention),
                },
                &recipient(),
            )
            .await;
        assert!(out.success);
        assert!(out.detail.unwrap().starts_with("skipped"));
        let conv = f.db.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(conv.color_code, Some(ColorCode::Urgent));
    }

    #[tokio::test]
    async fn color_update_without_conversation_fails() {
        let f = fixture(RecordingTransport::new()).await;
        let out = f
            .dispatcher
            .dispatch(&Action::UpdateConversationColor { color: None }, &recipient())
            .await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn unknown_action_is_skipped() {
        let f = fixture(RecordingTransport::new()).await;
        let out = f.dispatcher.dispatch(&Action::Unknown, &recipient()).await;
        assert!(out.success);
        assert_eq!(out.action, "unknown");
        assert!(f.transport.sent().is_empty());
    }
}
