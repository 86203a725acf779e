//! Contact / conversation / message lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::conversations::model::{Button, Contact, Conversation, Message};
use crate::error::DatabaseError;
use crate::pipeline::types::InboundMessage;
use crate::store::Database;

/// Records created or touched by one inbound message.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub contact: Contact,
    pub conversation: Conversation,
    pub message: Message,
}

/// Owns upsert-on-inbound and record-on-outbound semantics.
#[derive(Clone)]
pub struct ConversationTracker {
    db: Arc<dyn Database>,
}

impl ConversationTracker {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Find-or-create contact and conversation, append the message, bump
    /// `unread_count` and the last-message fields.
    pub async fn record_inbound(
        &self,
        inbound: &InboundMessage,
    ) -> Result<InboundRecord, DatabaseError> {
        let now = Utc::now();
        let contact = self
            .find_or_create_contact(&inbound.phone, &inbound.name, inbound.channel_id.as_deref(), now)
            .await?;
        let conversation = self.find_or_create_conversation(&contact).await?;

        let message = Message::inbound(
            &conversation,
            inbound.message_type,
            &inbound.text,
            inbound.media_url.as_deref(),
            inbound.received_at,
        );
        self.db.insert_message(&message).await?;
        self.db
            .record_conversation_activity(&conversation.id, &inbound.preview(), inbound.received_at, true)
            .await?;

        debug!(
            conversation_id = %conversation.id,
            message_id = %message.id,
            message_type = message.message_type.as_str(),
            "Inbound message recorded"
        );

        let conversation = self
            .db
            .get_conversation(&conversation.id)
            .await?
            .unwrap_or(conversation);

        Ok(InboundRecord {
            contact,
            conversation,
            message,
        })
    }

    /// Append an outbound message to a known conversation. `unread_count` is untouched.
    pub async fn record_outbound(
        &self,
        conversation: &Conversation,
        text: &str,
        buttons: Vec<Button>,
    ) -> Result<Message, DatabaseError> {
        let message = Message::outbound(conversation, text, buttons);
        self.db.insert_message(&message).await?;
        self.db
            .record_conversation_activity(&conversation.id, text, message.timestamp, false)
            .await?;
        debug!(conversation_id = %conversation.id, message_id = %message.id, "Outbound message recorded");
        Ok(message)
    }

    /// Append an outbound message for a phone, creating contact and
    /// conversation on first contact.
    pub async fn record_outbound_to_phone(
        &self,
        phone: &str,
        name: &str,
        text: &str,
    ) -> Result<Message, DatabaseError> {
        let contact = self
            .find_or_create_contact(phone, name, None, Utc::now())
            .await?;
        let conversation = self.find_or_create_conversation(&contact).await?;
        self.record_outbound(&conversation, text, Vec::new()).await
    }

    /// Reset `unread_count`. Returns false for an unknown conversation.
    pub async fn mark_read(&self, conversation_id: &str) -> Result<bool, DatabaseError> {
        self.db.mark_conversation_read(conversation_id).await
    }

    /// One page of a conversation's history, oldest first.
    ///
    /// `offset` counts back from the newest message, so page 0 is the tail.
    pub async fn history(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, DatabaseError> {
        let mut page = self.db.list_messages(conversation_id, limit, offset).await?;
        page.reverse();
        Ok(page)
    }

    async fn find_or_create_contact(
        &self,
        phone: &str,
        name: &str,
        channel_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Contact, DatabaseError> {
        if let Some(existing) = self.db.get_contact_by_phone(phone).await? {
            self.db.touch_contact(&existing.id, now).await?;
            return Ok(existing);
        }

        let contact = Contact::new(phone, name, channel_id);
        match self.db.insert_contact(&contact).await {
            Ok(()) => {
                info!(contact_id = %contact.id, phone = %phone, "New contact");
                Ok(contact)
            }
            // Lost a race with a concurrent inbound for the same phone.
            Err(DatabaseError::Constraint(_)) => self
                .db
                .get_contact_by_phone(phone)
                .await?
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "contact".into(),
                    id: phone.into(),
                }),
            Err(e) => Err(e),
        }
    }

    async fn find_or_create_conversation(
        &self,
        contact: &Contact,
    ) -> Result<Conversation, DatabaseError> {
        if let Some(existing) = self.db.get_conversation_by_contact(&contact.id).await? {
            return Ok(existing);
        }

        let conversation = Conversation::new(contact);
        match self.db.insert_conversation(&conversation).await {
            Ok(()) => Ok(conversation),
            Err(DatabaseError::Constraint(_)) => self
                .db
                .get_conversation_by_contact(&contact.id)
                .await?
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "conversation".into(),
                    id: contact.id.clone(),
                }),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::model::MessageType;
    use crate::store::LibSqlBackend;

    async fn tracker() -> ConversationTracker {
        ConversationTracker::new(Arc::new(LibSqlBackend::new_memory().await.unwrap()))
    }

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage {
            phone: "34600111222".into(),
            name: "Ana".into(),
            channel_id: Some("34600111222@s.whatsapp.net".into()),
            message_type: MessageType::Text,
            text: text.into(),
            media_url: None,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn inbound_upserts_and_counts_unread() {
        let t = tracker().await;
        let first = t.record_inbound(&inbound("Hola")).await.unwrap();
        let second = t.record_inbound(&inbound("¿Hay cita mañana?")).await.unwrap();

        assert_eq!(first.contact.id, second.contact.id);
        assert_eq!(first.conversation.id, second.conversation.id);
        assert_ne!(first.message.id, second.message.id);
        assert_eq!(second.conversation.unread_count, 2);
        assert_eq!(second.conversation.last_message.as_deref(), Some("¿Hay cita mañana?"));
        assert_eq!(t.db().list_contacts(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn outbound_leaves_unread_alone() {
        let t = tracker().await;
        let rec = t.record_inbound(&inbound("Hola")).await.unwrap();
        let msg = t
            .record_outbound(&rec.conversation, "Buenos días", Vec::new())
            .await
            .unwrap();
        assert!(msg.from_me);

        let conv = t.db().get_conversation(&rec.conversation.id).await.unwrap().unwrap();
        assert_eq!(conv.unread_count, 1);
        assert_eq!(conv.last_message.as_deref(), Some("Buenos días"));

        assert!(t.mark_read(&conv.id).await.unwrap());
        let conv = t.db().get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(conv.unread_count, 0);
    }

    #[tokio::test]
    async fn outbound_to_new_phone_creates_conversation() {
        let t = tracker().await;
        let msg = t
            .record_outbound_to_phone("34600999888", "Luis", "Recordatorio")
            .await
            .unwrap();
        let contact = t.db().get_contact_by_phone("34600999888").await.unwrap().unwrap();
        let conv = t.db().get_conversation_by_contact(&contact.id).await.unwrap().unwrap();
        assert_eq!(msg.conversation_id, conv.id);
        assert_eq!(conv.unread_count, 0);
    }

    #[tokio::test]
    async fn history_pages_back_from_the_newest() {
        let t = tracker().await;
        let base = Utc::now() - chrono::Duration::minutes(5);
        let mut id = String::new();
        for (i, text) in ["uno", "dos", "tres"].into_iter().enumerate() {
            let mut msg = inbound(text);
            msg.received_at = base + chrono::Duration::minutes(i as i64);
            id = t.record_inbound(&msg).await.unwrap().conversation.id;
        }
        let texts = |page: Vec<Message>| page.into_iter().map(|m| m.text).collect::<Vec<_>>();
        assert_eq!(texts(t.history(&id, 2, 0).await.unwrap()), vec!["dos", "tres"]);
        assert_eq!(texts(t.history(&id, 2, 2).await.unwrap()), vec!["uno"]);
        assert!(t.history("nope", 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_first_messages_share_one_conversation() {
        let t = tracker().await;
        let (first, second) = (inbound("uno"), inbound("dos"));
        let (a, b) = tokio::join!(t.record_inbound(&first), t.record_inbound(&second));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.conversation.id, b.conversation.id);
        assert_eq!(t.db().list_conversations(None).await.unwrap().len(), 1);
    }
}
