//! Unified `Database` trait: single async interface for all persistence.
//!
//! Collections are keyed by application-level ids (`id`, `phone`, `registro`),
//! never by the backend's row identity. Every mutation is a single-row
//! insert or conditional update; no multi-row transactions are required.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::AiConfig;
use crate::conversations::model::{ButtonResponse, ColorCode, Contact, Conversation, Message};
use crate::error::DatabaseError;
use crate::flows::model::{ConsentTemplate, MessageFlow};
use crate::reminders::appointment::{Appointment, AppointmentStatus};

/// Backend-agnostic database trait covering contacts, conversations, messages,
/// flows, consent templates, appointments, reminders, and the AI config.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    async fn get_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, DatabaseError>;

    /// Insert a contact. Fails with `Constraint` if the phone already exists.
    async fn insert_contact(&self, contact: &Contact) -> Result<(), DatabaseError>;

    /// Bump a contact's `updated_at`.
    async fn touch_contact(&self, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    /// List contacts, optionally filtered by a case-insensitive name/phone fragment.
    async fn list_contacts(&self, search: Option<&str>) -> Result<Vec<Contact>, DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, DatabaseError>;

    async fn get_conversation_by_contact(
        &self,
        contact_id: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// Insert a conversation. Fails with `Constraint` if the contact already has one.
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), DatabaseError>;

    /// Update `last_message` / `last_message_at`, optionally incrementing `unread_count`.
    async fn record_conversation_activity(
        &self,
        id: &str,
        last_message: &str,
        at: DateTime<Utc>,
        increment_unread: bool,
    ) -> Result<bool, DatabaseError>;

    /// Reset `unread_count` to 0. Returns false if the conversation does not exist.
    async fn mark_conversation_read(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Conditionally write an automatic classification.
    ///
    /// Without `force`, the write only happens while `manually_classified` is
    /// false. Returns true if a row was updated.
    async fn apply_auto_classification(
        &self,
        id: &str,
        color: ColorCode,
        at: DateTime<Utc>,
        force: bool,
    ) -> Result<bool, DatabaseError>;

    /// Pin a colour and set `manually_classified`.
    async fn set_manual_classification(
        &self,
        id: &str,
        color: ColorCode,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Unset colour, pin flag and `classified_at`.
    async fn clear_classification(&self, id: &str, at: DateTime<Utc>)
    -> Result<bool, DatabaseError>;

    /// List conversations (optionally by colour), most recent activity first.
    async fn list_conversations(
        &self,
        color: Option<ColorCode>,
    ) -> Result<Vec<Conversation>, DatabaseError>;

    /// Conversations whose `updated_at` is at or after `since`.
    async fn list_conversations_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Conversation>, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>, DatabaseError>;

    /// The most recent `limit` messages of a conversation, newest first.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError>;

    /// One page of a conversation's messages, newest first, skipping `offset`.
    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, DatabaseError>;

    /// Write the transcription of an audio message.
    async fn set_transcription(
        &self,
        id: &str,
        transcription: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    // ── Button responses ────────────────────────────────────────────

    async fn insert_button_response(&self, response: &ButtonResponse)
    -> Result<(), DatabaseError>;

    async fn list_button_responses(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ButtonResponse>, DatabaseError>;

    // ── Message flows ───────────────────────────────────────────────

    async fn insert_flow(&self, flow: &MessageFlow) -> Result<(), DatabaseError>;

    async fn get_flow(&self, id: &str) -> Result<Option<MessageFlow>, DatabaseError>;

    async fn list_flows(&self, category: Option<&str>) -> Result<Vec<MessageFlow>, DatabaseError>;

    /// Replace a flow's definition. Returns false if it does not exist.
    async fn update_flow(&self, flow: &MessageFlow) -> Result<bool, DatabaseError>;

    async fn delete_flow(&self, id: &str) -> Result<bool, DatabaseError>;

    /// First active flow of a category, oldest first.
    async fn active_flow_for_category(
        &self,
        category: &str,
    ) -> Result<Option<MessageFlow>, DatabaseError>;

    // ── Consent templates ───────────────────────────────────────────

    async fn insert_consent_template(&self, template: &ConsentTemplate)
    -> Result<(), DatabaseError>;

    async fn get_consent_template_by_code(
        &self,
        code: &str,
    ) -> Result<Option<ConsentTemplate>, DatabaseError>;

    async fn list_consent_templates(&self) -> Result<Vec<ConsentTemplate>, DatabaseError>;

    async fn update_consent_template(
        &self,
        template: &ConsentTemplate,
    ) -> Result<bool, DatabaseError>;

    async fn delete_consent_template(&self, id: &str) -> Result<bool, DatabaseError>;

    // ── Appointments ────────────────────────────────────────────────

    /// Insert or replace an appointment keyed by `registro`.
    async fn upsert_appointment(&self, appointment: &Appointment) -> Result<(), DatabaseError>;

    /// Insert an appointment unless its `registro` is already stored.
    /// Returns true if a row was inserted.
    async fn insert_appointment_if_absent(
        &self,
        appointment: &Appointment,
    ) -> Result<bool, DatabaseError>;

    async fn get_appointment(&self, registro: &str) -> Result<Option<Appointment>, DatabaseError>;

    async fn delete_appointment(&self, registro: &str) -> Result<bool, DatabaseError>;

    async fn list_appointments(&self) -> Result<Vec<Appointment>, DatabaseError>;

    /// Write back an appointment status. Returns false if the appointment is unknown.
    async fn update_appointment_status(
        &self,
        registro: &str,
        status: &AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    // ── Reminders ───────────────────────────────────────────────────

    /// Atomically claim the reminder for one appointment slot.
    ///
    /// Returns true only for the first caller; later calls for the same
    /// `(appointment_key, scheduled_for)` return false.
    async fn claim_reminder(
        &self,
        appointment_key: &str,
        scheduled_for: DateTime<Utc>,
        flow_id: &str,
    ) -> Result<bool, DatabaseError>;

    // ── AI config ───────────────────────────────────────────────────

    async fn load_ai_config(&self) -> Result<Option<AiConfig>, DatabaseError>;

    async fn save_ai_config(&self, config: &AiConfig) -> Result<(), DatabaseError>;
}
