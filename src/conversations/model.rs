//! Contact, conversation and message records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flows::model::{Action, ActionOutcome};

/// Urgency classification of a conversation.
///
/// The legacy colour names used by the clinic front desk (`AMARILLO`, `AZUL`,
/// `VERDE`) are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColorCode {
    #[serde(alias = "AMARILLO")]
    Urgent,
    #[serde(alias = "AZUL")]
    Attention,
    #[serde(alias = "VERDE")]
    Resolved,
}

impl ColorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorCode::Urgent => "URGENT",
            ColorCode::Attention => "ATTENTION",
            ColorCode::Resolved => "RESOLVED",
        }
    }
}

impl fmt::Display for ColorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "URGENT" | "AMARILLO" => Ok(ColorCode::Urgent),
            "ATTENTION" | "AZUL" => Ok(ColorCode::Attention),
            "RESOLVED" | "VERDE" => Ok(ColorCode::Resolved),
            other => Err(format!(
                "invalid classification '{other}', expected URGENT, ATTENTION or RESOLVED"
            )),
        }
    }
}

/// A messaging-channel contact, unique by phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub phone: String,
    pub name: String,
    /// Channel-native identifier (e.g. `34600111222@s.whatsapp.net`).
    pub channel_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(phone: &str, name: &str, channel_id: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            phone: phone.to_string(),
            name: name.to_string(),
            channel_id: channel_id.map(String::from),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The single conversation owned by a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub contact_id: String,
    pub contact_name: String,
    pub contact_phone: String,
    pub color_code: Option<ColorCode>,
    /// When set, automatic classification leaves `color_code` alone.
    pub manually_classified: bool,
    pub classified_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(contact: &Contact) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            contact_id: contact.id.clone(),
            contact_name: contact.name.clone(),
            contact_phone: contact.phone.clone(),
            color_code: None,
            manually_classified: false,
            classified_at: None,
            last_message: None,
            last_message_at: None,
            unread_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Kind of message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Audio,
    Voice,
    #[serde(other)]
    Other,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Audio => "audio",
            MessageType::Voice => "voice",
            MessageType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "text" | "chat" => MessageType::Text,
            "audio" => MessageType::Audio,
            "voice" | "ptt" => MessageType::Voice,
            _ => MessageType::Other,
        }
    }

    /// Audio payloads get an asynchronous transcription.
    pub fn is_audio(&self) -> bool {
        matches!(self, MessageType::Audio | MessageType::Voice)
    }
}

/// Interactive button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// A single message. Immutable once stored except for `transcription`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub contact_id: String,
    pub from_me: bool,
    pub message_type: MessageType,
    pub text: String,
    pub media_url: Option<String>,
    pub transcription: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn inbound(
        conversation: &Conversation,
        message_type: MessageType,
        text: &str,
        media_url: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation.id.clone(),
            contact_id: conversation.contact_id.clone(),
            from_me: false,
            message_type,
            text: text.to_string(),
            media_url: media_url.map(String::from),
            transcription: None,
            timestamp,
            buttons: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn outbound(conversation: &Conversation, text: &str, buttons: Vec<Button>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation.id.clone(),
            contact_id: conversation.contact_id.clone(),
            from_me: true,
            message_type: MessageType::Text,
            text: text.to_string(),
            media_url: None,
            transcription: None,
            timestamp: now,
            buttons,
            created_at: now,
        }
    }

    pub fn find_button(&self, button_id: &str) -> Option<&Button> {
        self.buttons.iter().find(|b| b.id == button_id)
    }
}

/// Append-only audit record of a button click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonResponse {
    pub id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub button_id: String,
    pub button_text: String,
    pub actions_executed: Vec<ActionOutcome>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_code_accepts_legacy_names() {
        assert_eq!("AMARILLO".parse::<ColorCode>().unwrap(), ColorCode::Urgent);
        assert_eq!("azul".parse::<ColorCode>().unwrap(), ColorCode::Attention);
        assert_eq!("VERDE".parse::<ColorCode>().unwrap(), ColorCode::Resolved);
        assert!("ROJO".parse::<ColorCode>().is_err());

        let c: ColorCode = serde_json::from_str("\"VERDE\"").unwrap();
        assert_eq!(c, ColorCode::Resolved);
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"RESOLVED\"");
    }

    #[test]
    fn message_type_parsing() {
        assert_eq!(MessageType::parse("ptt"), MessageType::Voice);
        assert_eq!(MessageType::parse("AUDIO"), MessageType::Audio);
        assert_eq!(MessageType::parse("sticker"), MessageType::Other);
        assert!(MessageType::Voice.is_audio());
        assert!(!MessageType::Text.is_audio());

        let t: MessageType = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(t, MessageType::Other);
    }
}
