//! Flow definitions, actions, consent templates, and recipients.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversations::model::ColorCode;
use crate::reminders::appointment::Appointment;

/// An ordered, reusable script of message steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFlow {
    pub id: String,
    pub name: String,
    /// e.g. `confirmacion`, `consentimientos`, `recordatorio`.
    pub category: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub steps: Vec<FlowStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl MessageFlow {
    pub fn new(name: &str, category: &str, steps: Vec<FlowStep>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            category: category.to_string(),
            active: true,
            steps,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One step of a flow: a templated message, its actions, then a pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    /// Message template with `{Key}` placeholders.
    pub message: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Seconds to wait after this step's actions complete.
    #[serde(default, rename = "delay")]
    pub delay_secs: u64,
}

impl FlowStep {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            actions: Vec::new(),
            delay_secs: 0,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_delay(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }
}

/// A typed side effect declared by a flow step or a button.
///
/// Stored definitions with a type this build does not know deserialize to
/// `Unknown` and are skipped at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Write the associated appointment's status.
    #[serde(alias = "update_appointment_status")]
    UpdateStatus {
        #[serde(alias = "status")]
        value: String,
        /// Overrides the recipient's appointment id when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        appointment_id: Option<String>,
    },
    /// Render and send a free-text message.
    SendMessage { message: String },
    /// Send a consent document looked up by code.
    #[serde(alias = "send_consent")]
    SendConsentForm {
        #[serde(alias = "code")]
        template_code: String,
    },
    /// Recolour the conversation (defaults to RESOLVED).
    UpdateConversationColor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<ColorCode>,
    },
    #[serde(other)]
    Unknown,
}

impl Action {
    /// The tag recorded in execution logs.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Action::UpdateStatus { .. } => "update_status",
            Action::SendMessage { .. } => "send_message",
            Action::SendConsentForm { .. } => "send_consent_form",
            Action::UpdateConversationColor { .. } => "update_conversation_color",
            Action::Unknown => "unknown",
        }
    }
}

/// Result of one dispatched action, kept in execution logs and button audits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok(action: &str, detail: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            detail: Some(detail.into()),
            error: None,
        }
    }

    pub fn failed(action: &str, error: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            success: false,
            detail: None,
            error: Some(error.into()),
        }
    }

    pub fn skipped(action: &str, reason: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            detail: Some(format!("skipped: {}", reason.into())),
            error: None,
        }
    }
}

/// Consent document sent to patients before a treatment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentTemplate {
    pub id: String,
    /// Lookup key, e.g. `lopd`, `implante`.
    pub code: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub risks: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConsentTemplate {
    pub fn new(code: &str, title: &str, description: &str, risks: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            code: code.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            risks,
            created_at: now,
            updated_at: now,
        }
    }

    /// Message body sent for this consent: title, description, bulleted
    /// risks, and the reply instruction.
    pub fn to_message(&self) -> String {
        let risks = self
            .risks
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "📋 {}\n\n{}\n\n⚠️ Riesgos y Complicaciones:\n{}\n\n✅ Para confirmar tu consentimiento, responde con: ACEPTO",
            self.title, self.description, risks
        )
    }
}

/// The binding context a flow runs against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub surname: String,
    pub phone: String,
    pub time: String,
    pub date: String,
    pub doctor: String,
    pub treatment: String,
    #[serde(default)]
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl Recipient {
    pub fn from_appointment(appointment: &Appointment) -> Self {
        Self {
            name: appointment.name.clone(),
            surname: appointment.surname.clone(),
            phone: appointment.phone.clone(),
            time: appointment.time.clone(),
            date: appointment.date.clone(),
            doctor: appointment.doctor.clone(),
            treatment: appointment.treatment.clone(),
            appointment_id: Some(appointment.registro.clone()),
            conversation_id: None,
        }
    }

    /// Placeholder bindings for template rendering.
    pub fn bindings(&self) -> BTreeMap<String, String> {
        [
            ("Nombre", &self.name),
            ("Apellidos", &self.surname),
            ("Hora", &self.time),
            ("Fecha", &self.date),
            ("Doctor", &self.doctor),
            ("Tratamiento", &self.treatment),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_deserializes_tagged_variants() {
        let actions: Vec<Action> = serde_json::from_str(
            r#"[
                {"type": "update_status", "value": "confirmada"},
                {"type": "update_appointment_status", "status": "cancelada", "appointment_id": "R-9"},
                {"type": "send_message", "message": "Gracias {Nombre}"},
                {"type": "send_consent_form", "template_code": "lopd"},
                {"type": "update_conversation_color"},
                {"type": "start_flow", "flow_id": "x"}
            ]"#,
        )
        .unwrap();

        assert_eq!(
            actions[0],
            Action::UpdateStatus {
                value: "confirmada".into(),
                appointment_id: None
            }
        );
        assert_eq!(
            actions[1],
            Action::UpdateStatus {
                value: "cancelada".into(),
                appointment_id: Some("R-9".into())
            }
        );
        assert_eq!(actions[3].type_tag(), "send_consent_form");
        assert_eq!(actions[4], Action::UpdateConversationColor { color: None });
        assert_eq!(actions[5], Action::Unknown);
    }

    #[test]
    fn step_delay_uses_wire_name() {
        let step: FlowStep =
            serde_json::from_str(r#"{"message": "Hola", "delay": 30}"#).unwrap();
        assert_eq!(step.delay_secs, 30);
        assert!(step.actions.is_empty());
    }

    #[test]
    fn consent_message_lists_risks_and_instruction() {
        let t = ConsentTemplate::new(
            "implante",
            "Implante dental",
            "Colocación de implante de titanio.",
            vec!["Inflamación".into(), "Dolor leve".into()],
        );
        let msg = t.to_message();
        assert!(msg.starts_with("📋 Implante dental"));
        assert!(msg.contains("- Inflamación\n- Dolor leve"));
        assert!(msg.ends_with("responde con: ACEPTO"));
    }

    #[test]
    fn recipient_bindings_cover_placeholders() {
        let r = Recipient {
            name: "Ana".into(),
            time: "10:00".into(),
            ..Default::default()
        };
        let b = r.bindings();
        assert_eq!(b.len(), 6);
        assert_eq!(b["Nombre"], "Ana");
        assert_eq!(b["Hora"], "10:00");
        assert_eq!(b["Doctor"], "");
    }
}
