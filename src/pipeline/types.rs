//! Shared types for the inbound message pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversations::model::MessageType;

// ── Gateway webhook ─────────────────────────────────────────────────

/// Raw inbound message as posted by the WhatsApp gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Sender JID, e.g. `34600111222@s.whatsapp.net`.
    pub from: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_type", rename = "type")]
    pub message_type: String,
    /// Unix seconds, possibly fractional.
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub pushname: Option<String>,
    #[serde(default, alias = "mediaUrl")]
    pub media_url: Option<String>,
}

fn default_type() -> String {
    "text".to_string()
}

// ── Inbound message ─────────────────────────────────────────────────

/// Normalised inbound message.
///
/// The gateway adapter converts its native payload into this struct before
/// the pipeline sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Bare phone number, no JID suffix.
    pub phone: String,
    /// Display name; falls back to the phone.
    pub name: String,
    /// Channel-native sender id.
    pub channel_id: Option<String>,
    pub message_type: MessageType,
    pub text: String,
    pub media_url: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn from_webhook(payload: &WebhookPayload) -> Self {
        let phone = normalize_phone(&payload.from);
        let name = payload
            .pushname
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .unwrap_or_else(|| phone.clone());
        let received_at = payload
            .timestamp
            .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64))
            .unwrap_or_else(Utc::now);

        Self {
            phone,
            name,
            channel_id: Some(payload.from.clone()),
            message_type: MessageType::parse(&payload.message_type),
            text: payload.body.clone(),
            media_url: payload.media_url.clone(),
            received_at,
        }
    }

    /// Text shown as the conversation's last message.
    pub fn preview(&self) -> String {
        if self.text.trim().is_empty() && self.message_type.is_audio() {
            "🎤 Audio".to_string()
        } else {
            self.text.clone()
        }
    }
}

/// Strip the JID suffix (`@s.whatsapp.net`, `@c.us`) from a sender id.
pub fn normalize_phone(sender: &str) -> String {
    sender
        .split('@')
        .next()
        .unwrap_or(sender)
        .trim()
        .trim_start_matches('+')
        .to_string()
}

// ── Processing result ───────────────────────────────────────────────

/// Identifiers created or touched by one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncomingResult {
    pub contact_id: String,
    pub conversation_id: String,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<crate::conversations::model::ColorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_response: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_jids() {
        assert_eq!(normalize_phone("34600111222@s.whatsapp.net"), "34600111222");
        assert_eq!(normalize_phone("34600111222@c.us"), "34600111222");
        assert_eq!(normalize_phone("+34600111222"), "34600111222");
    }

    #[test]
    fn webhook_conversion() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{"from": "34600111222@s.whatsapp.net", "body": "Hola", "type": "chat",
                "timestamp": 1767225600, "pushname": "Ana"}"#,
        )
        .unwrap();
        let msg = InboundMessage::from_webhook(&payload);
        assert_eq!(msg.phone, "34600111222");
        assert_eq!(msg.name, "Ana");
        assert_eq!(msg.message_type, MessageType::Text);
        assert_eq!(msg.received_at.timestamp(), 1_767_225_600);
        assert_eq!(msg.channel_id.as_deref(), Some("34600111222@s.whatsapp.net"));
    }

    #[test]
    fn missing_pushname_falls_back_to_phone() {
        let payload: WebhookPayload =
            serde_json::from_str(r#"{"from": "34600111222@c.us", "type": "ptt", "mediaUrl": "http://m/1.ogg"}"#)
                .unwrap();
        let msg = InboundMessage::from_webhook(&payload);
        assert_eq!(msg.name, "34600111222");
        assert_eq!(msg.message_type, MessageType::Voice);
        assert_eq!(msg.media_url.as_deref(), Some("http://m/1.ogg"));
        assert_eq!(msg.preview(), "🎤 Audio");
    }
}
