//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Structured sub-documents
//! (flow steps, buttons, risks, action outcomes) are stored as JSON text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::params::IntoParams;
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::AiConfig;
use crate::conversations::model::{
    ButtonResponse, ColorCode, Contact, Conversation, Message, MessageType,
};
use crate::error::DatabaseError;
use crate::flows::model::{ConsentTemplate, MessageFlow};
use crate::reminders::appointment::{Appointment, AppointmentStatus};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    /// Owns the database `conn` was opened from; never read, only held.
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_all<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl IntoParams,
        map: fn(&libsql::Row) -> Result<T, libsql::Error>,
    ) -> Result<Vec<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            out.push(map(&row).map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?);
        }
        Ok(out)
    }

    async fn query_one<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl IntoParams,
        map: fn(&libsql::Row) -> Result<T, libsql::Error>,
    ) -> Result<Option<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value =
                    map(&row).map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    /// Execute a statement and return the number of affected rows.
    async fn exec(
        &self,
        op: &str,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<u64, DatabaseError> {
        self.conn()
            .execute(sql, params)
            .await
            .map_err(|e| map_write_err(op, e))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format: fixed-width RFC 3339 so text ordering matches time ordering.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn map_write_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

const CONTACT_COLUMNS: &str = "id, phone, name, channel_id, created_at, updated_at";

const CONVERSATION_COLUMNS: &str = "id, contact_id, contact_name, contact_phone, color_code, manually_classified, classified_at, last_message, last_message_at, unread_count, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, contact_id, from_me, message_type, text, media_url, transcription, timestamp, buttons, created_at";

const BUTTON_RESPONSE_COLUMNS: &str =
    "id, message_id, conversation_id, button_id, button_text, actions_executed, timestamp";

const FLOW_COLUMNS: &str = "id, name, category, active, steps, created_at, updated_at";

const CONSENT_COLUMNS: &str = "id, code, title, description, risks, created_at, updated_at";

const APPOINTMENT_COLUMNS: &str =
    "registro, name, surname, phone, date, time, status, doctor, treatment";

const AI_CONFIG_KEY: &str = "ai_config";

fn row_to_contact(row: &libsql::Row) -> Result<Contact, libsql::Error> {
    let created: String = row.get(4)?;
    let updated: String = row.get(5)?;
    Ok(Contact {
        id: row.get(0)?,
        phone: row.get(1)?,
        name: row.get(2)?,
        channel_id: row.get(3).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Column order matches CONVERSATION_COLUMNS.
fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, libsql::Error> {
    let color: Option<String> = row.get(4).ok();
    let manual: i64 = row.get(5)?;
    let classified_at: Option<String> = row.get(6).ok();
    let last_message_at: Option<String> = row.get(8).ok();
    let unread: i64 = row.get(9)?;
    let created: String = row.get(10)?;
    let updated: String = row.get(11)?;

    Ok(Conversation {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        contact_name: row.get(2)?,
        contact_phone: row.get(3)?,
        color_code: color.and_then(|c| c.parse::<ColorCode>().ok()),
        manually_classified: manual != 0,
        classified_at: parse_optional_datetime(&classified_at),
        last_message: row.get(7).ok(),
        last_message_at: parse_optional_datetime(&last_message_at),
        unread_count: u32::try_from(unread).unwrap_or(0),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let from_me: i64 = row.get(3)?;
    let kind: String = row.get(4)?;
    let timestamp: String = row.get(8)?;
    let buttons: String = row.get::<String>(9).unwrap_or_else(|_| "[]".into());
    let created: String = row.get(10)?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        contact_id: row.get(2)?,
        from_me: from_me != 0,
        message_type: MessageType::parse(&kind),
        text: row.get(5)?,
        media_url: row.get(6).ok(),
        transcription: row.get(7).ok(),
        timestamp: parse_datetime(&timestamp),
        buttons: serde_json::from_str(&buttons).unwrap_or_default(),
        created_at: parse_datetime(&created),
    })
}

fn row_to_button_response(row: &libsql::Row) -> Result<ButtonResponse, libsql::Error> {
    let actions: String = row.get(5)?;
    let timestamp: String = row.get(6)?;
    Ok(ButtonResponse {
        id: row.get(0)?,
        message_id: row.get(1)?,
        conversation_id: row.get(2)?,
        button_id: row.get(3)?,
        button_text: row.get(4)?,
        actions_executed: serde_json::from_str(&actions).unwrap_or_default(),
        timestamp: parse_datetime(&timestamp),
    })
}

fn row_to_flow(row: &libsql::Row) -> Result<MessageFlow, libsql::Error> {
    let active: i64 = row.get(3)?;
    let steps: String = row.get(4)?;
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;
    let id: String = row.get(0)?;

    let steps = serde_json::from_str(&steps).unwrap_or_else(|e| {
        tracing::warn!(flow_id = %id, "Stored flow steps are not valid JSON: {}", e);
        Vec::new()
    });

    Ok(MessageFlow {
        id,
        name: row.get(1)?,
        category: row.get(2)?,
        active: active != 0,
        steps,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_consent(row: &libsql::Row) -> Result<ConsentTemplate, libsql::Error> {
    let risks: String = row.get(4)?;
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;
    Ok(ConsentTemplate {
        id: row.get(0)?,
        code: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        risks: serde_json::from_str(&risks).unwrap_or_default(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_appointment(row: &libsql::Row) -> Result<Appointment, libsql::Error> {
    let status: String = row.get(6)?;
    Ok(Appointment {
        registro: row.get(0)?,
        name: row.get(1)?,
        surname: row.get(2)?,
        phone: row.get(3)?,
        date: row.get(4)?,
        time: row.get(5)?,
        status: AppointmentStatus::parse(&status),
        doctor: row.get(7)?,
        treatment: row.get(8)?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn get_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, DatabaseError> {
        self.query_one(
            "get_contact_by_phone",
            &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE phone = ?1"),
            params![phone],
            row_to_contact,
        )
        .await
    }

    async fn insert_contact(&self, contact: &Contact) -> Result<(), DatabaseError> {
        self.exec(
            "insert_contact",
            "INSERT INTO contacts (id, phone, name, channel_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                contact.id.as_str(),
                contact.phone.as_str(),
                contact.name.as_str(),
                opt_text(contact.channel_id.as_deref()),
                ts(&contact.created_at),
                ts(&contact.updated_at),
            ],
        )
        .await?;
        debug!(contact_id = %contact.id, phone = %contact.phone, "Contact inserted");
        Ok(())
    }

    async fn touch_contact(&self, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.exec(
            "touch_contact",
            "UPDATE contacts SET updated_at = ?1 WHERE id = ?2",
            params![ts(&at), id],
        )
        .await?;
        Ok(())
    }

    async fn list_contacts(&self, search: Option<&str>) -> Result<Vec<Contact>, DatabaseError> {
        match search.map(str::trim).filter(|s| !s.is_empty()) {
            Some(term) => {
                let pattern = format!("%{}%", term.to_lowercase());
                self.query_all(
                    "list_contacts",
                    &format!(
                        "SELECT {CONTACT_COLUMNS} FROM contacts \
                         WHERE lower(name) LIKE ?1 OR phone LIKE ?1 ORDER BY name"
                    ),
                    params![pattern],
                    row_to_contact,
                )
                .await
            }
            None => {
                self.query_all(
                    "list_contacts",
                    &format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY name"),
                    (),
                    row_to_contact,
                )
                .await
            }
        }
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, DatabaseError> {
        self.query_one(
            "get_conversation",
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            params![id],
            row_to_conversation,
        )
        .await
    }

    async fn get_conversation_by_contact(
        &self,
        contact_id: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        self.query_one(
            "get_conversation_by_contact",
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE contact_id = ?1"),
            params![contact_id],
            row_to_conversation,
        )
        .await
    }

    async fn insert_conversation(&self, c: &Conversation) -> Result<(), DatabaseError> {
        self.exec(
            "insert_conversation",
            &format!(
                "INSERT INTO conversations ({CONVERSATION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                c.id.as_str(),
                c.contact_id.as_str(),
                c.contact_name.as_str(),
                c.contact_phone.as_str(),
                opt_text(c.color_code.as_ref().map(ColorCode::as_str)),
                c.manually_classified as i64,
                opt_text(c.classified_at.as_ref().map(ts).as_deref()),
                opt_text(c.last_message.as_deref()),
                opt_text(c.last_message_at.as_ref().map(ts).as_deref()),
                c.unread_count as i64,
                ts(&c.created_at),
                ts(&c.updated_at),
            ],
        )
        .await?;
        debug!(conversation_id = %c.id, contact_id = %c.contact_id, "Conversation inserted");
        Ok(())
    }

    async fn record_conversation_activity(
        &self,
        id: &str,
        last_message: &str,
        at: DateTime<Utc>,
        increment_unread: bool,
    ) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "record_conversation_activity",
                "UPDATE conversations SET last_message = ?1, last_message_at = ?2, updated_at = ?2, \
                 unread_count = unread_count + ?3 WHERE id = ?4",
                params![last_message, ts(&at), increment_unread as i64, id],
            )
            .await?;
        Ok(n > 0)
    }

    async fn mark_conversation_read(&self, id: &str) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "mark_conversation_read",
                "UPDATE conversations SET unread_count = 0 WHERE id = ?1",
                params![id],
            )
            .await?;
        Ok(n > 0)
    }

    async fn apply_auto_classification(
        &self,
        id: &str,
        color: ColorCode,
        at: DateTime<Utc>,
        force: bool,
    ) -> Result<bool, DatabaseError> {
        // The pin check lives in the WHERE clause so a concurrent manual
        // override can never be overwritten.
        let sql = if force {
            "UPDATE conversations SET color_code = ?1, classified_at = ?2, updated_at = ?2 WHERE id = ?3"
        } else {
            "UPDATE conversations SET color_code = ?1, classified_at = ?2, updated_at = ?2 \
             WHERE id = ?3 AND manually_classified = 0"
        };
        let n = self
            .exec(
                "apply_auto_classification",
                sql,
                params![color.as_str(), ts(&at), id],
            )
            .await?;
        Ok(n > 0)
    }

    async fn set_manual_classification(
        &self,
        id: &str,
        color: ColorCode,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "set_manual_classification",
                "UPDATE conversations SET color_code = ?1, manually_classified = 1, \
                 classified_at = ?2, updated_at = ?2 WHERE id = ?3",
                params![color.as_str(), ts(&at), id],
            )
            .await?;
        Ok(n > 0)
    }

    async fn clear_classification(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "clear_classification",
                "UPDATE conversations SET color_code = NULL, manually_classified = 0, \
                 classified_at = NULL, updated_at = ?1 WHERE id = ?2",
                params![ts(&at), id],
            )
            .await?;
        Ok(n > 0)
    }

    async fn list_conversations(
        &self,
        color: Option<ColorCode>,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        match color {
            Some(color) => {
                self.query_all(
                    "list_conversations",
                    &format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                         WHERE color_code = ?1 ORDER BY last_message_at DESC"
                    ),
                    params![color.as_str()],
                    row_to_conversation,
                )
                .await
            }
            None => {
                self.query_all(
                    "list_conversations",
                    &format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY last_message_at DESC"
                    ),
                    (),
                    row_to_conversation,
                )
                .await
            }
        }
    }

    async fn list_conversations_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        self.query_all(
            "list_conversations_updated_since",
            &format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                 WHERE updated_at >= ?1 ORDER BY updated_at DESC"
            ),
            params![ts(&since)],
            row_to_conversation,
        )
        .await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, m: &Message) -> Result<(), DatabaseError> {
        let buttons = to_json(&m.buttons)?;
        self.exec(
            "insert_message",
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                m.id.as_str(),
                m.conversation_id.as_str(),
                m.contact_id.as_str(),
                m.from_me as i64,
                m.message_type.as_str(),
                m.text.as_str(),
                opt_text(m.media_url.as_deref()),
                opt_text(m.transcription.as_deref()),
                ts(&m.timestamp),
                buttons,
                ts(&m.created_at),
            ],
        )
        .await?;
        debug!(message_id = %m.id, conversation_id = %m.conversation_id, from_me = m.from_me, "Message inserted");
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, DatabaseError> {
        self.query_one(
            "get_message",
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id],
            row_to_message,
        )
        .await
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError> {
        self.query_all(
            "recent_messages",
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 \
                 ORDER BY timestamp DESC, created_at DESC LIMIT ?2"
            ),
            params![conversation_id, limit as i64],
            row_to_message,
        )
        .await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, DatabaseError> {
        self.query_all(
            "list_messages",
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 \
                 ORDER BY timestamp DESC, created_at DESC LIMIT ?2 OFFSET ?3"
            ),
            params![conversation_id, limit as i64, offset as i64],
            row_to_message,
        )
        .await
    }

    async fn set_transcription(
        &self,
        id: &str,
        transcription: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "set_transcription",
                "UPDATE messages SET transcription = ?1, transcribed_at = ?2 WHERE id = ?3",
                params![transcription, ts(&at), id],
            )
            .await?;
        Ok(n > 0)
    }

    // ── Button responses ────────────────────────────────────────────

    async fn insert_button_response(&self, r: &ButtonResponse) -> Result<(), DatabaseError> {
        let actions = to_json(&r.actions_executed)?;
        self.exec(
            "insert_button_response",
            &format!(
                "INSERT INTO button_responses ({BUTTON_RESPONSE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                r.id.as_str(),
                r.message_id.as_str(),
                r.conversation_id.as_str(),
                r.button_id.as_str(),
                r.button_text.as_str(),
                actions,
                ts(&r.timestamp),
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_button_responses(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ButtonResponse>, DatabaseError> {
        self.query_all(
            "list_button_responses",
            &format!(
                "SELECT {BUTTON_RESPONSE_COLUMNS} FROM button_responses \
                 WHERE conversation_id = ?1 ORDER BY timestamp"
            ),
            params![conversation_id],
            row_to_button_response,
        )
        .await
    }

    // ── Message flows ───────────────────────────────────────────────

    async fn insert_flow(&self, flow: &MessageFlow) -> Result<(), DatabaseError> {
        let steps = to_json(&flow.steps)?;
        self.exec(
            "insert_flow",
            &format!("INSERT INTO message_flows ({FLOW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                flow.id.as_str(),
                flow.name.as_str(),
                flow.category.as_str(),
                flow.active as i64,
                steps,
                ts(&flow.created_at),
                ts(&flow.updated_at),
            ],
        )
        .await?;
        info!(flow_id = %flow.id, category = %flow.category, steps = flow.steps.len(), "Flow created");
        Ok(())
    }

    async fn get_flow(&self, id: &str) -> Result<Option<MessageFlow>, DatabaseError> {
        self.query_one(
            "get_flow",
            &format!("SELECT {FLOW_COLUMNS} FROM message_flows WHERE id = ?1"),
            params![id],
            row_to_flow,
        )
        .await
    }

    async fn list_flows(&self, category: Option<&str>) -> Result<Vec<MessageFlow>, DatabaseError> {
        match category {
            Some(category) => {
                self.query_all(
                    "list_flows",
                    &format!(
                        "SELECT {FLOW_COLUMNS} FROM message_flows WHERE category = ?1 ORDER BY created_at, rowid"
                    ),
                    params![category],
                    row_to_flow,
                )
                .await
            }
            None => {
                self.query_all(
                    "list_flows",
                    &format!("SELECT {FLOW_COLUMNS} FROM message_flows ORDER BY created_at, rowid"),
                    (),
                    row_to_flow,
                )
                .await
            }
        }
    }

    async fn update_flow(&self, flow: &MessageFlow) -> Result<bool, DatabaseError> {
        let steps = to_json(&flow.steps)?;
        let n = self
            .exec(
                "update_flow",
                "UPDATE message_flows SET name = ?1, category = ?2, active = ?3, steps = ?4, \
                 updated_at = ?5 WHERE id = ?6",
                params![
                    flow.name.as_str(),
                    flow.category.as_str(),
                    flow.active as i64,
                    steps,
                    ts(&flow.updated_at),
                    flow.id.as_str(),
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn delete_flow(&self, id: &str) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "delete_flow",
                "DELETE FROM message_flows WHERE id = ?1",
                params![id],
            )
            .await?;
        Ok(n > 0)
    }

    async fn active_flow_for_category(
        &self,
        category: &str,
    ) -> Result<Option<MessageFlow>, DatabaseError> {
        self.query_one(
            "active_flow_for_category",
            &format!(
                "SELECT {FLOW_COLUMNS} FROM message_flows \
                 WHERE category = ?1 AND active = 1 ORDER BY created_at, rowid LIMIT 1"
            ),
            params![category],
            row_to_flow,
        )
        .await
    }

    // ── Consent templates ───────────────────────────────────────────

    async fn insert_consent_template(&self, t: &ConsentTemplate) -> Result<(), DatabaseError> {
        let risks = to_json(&t.risks)?;
        self.exec(
            "insert_consent_template",
            &format!(
                "INSERT INTO consent_templates ({CONSENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                t.id.as_str(),
                t.code.as_str(),
                t.title.as_str(),
                t.description.as_str(),
                risks,
                ts(&t.created_at),
                ts(&t.updated_at),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_consent_template_by_code(
        &self,
        code: &str,
    ) -> Result<Option<ConsentTemplate>, DatabaseError> {
        self.query_one(
            "get_consent_template_by_code",
            &format!("SELECT {CONSENT_COLUMNS} FROM consent_templates WHERE code = ?1"),
            params![code],
            row_to_consent,
        )
        .await
    }

    async fn list_consent_templates(&self) -> Result<Vec<ConsentTemplate>, DatabaseError> {
        self.query_all(
            "list_consent_templates",
            &format!("SELECT {CONSENT_COLUMNS} FROM consent_templates ORDER BY code"),
            (),
            row_to_consent,
        )
        .await
    }

    async fn update_consent_template(&self, t: &ConsentTemplate) -> Result<bool, DatabaseError> {
        let risks = to_json(&t.risks)?;
        let n = self
            .exec(
                "update_consent_template",
                "UPDATE consent_templates SET code = ?1, title = ?2, description = ?3, risks = ?4, \
                 updated_at = ?5 WHERE id = ?6",
                params![
                    t.code.as_str(),
                    t.title.as_str(),
                    t.description.as_str(),
                    risks,
                    ts(&t.updated_at),
                    t.id.as_str(),
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn delete_consent_template(&self, id: &str) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "delete_consent_template",
                "DELETE FROM consent_templates WHERE id = ?1",
                params![id],
            )
            .await?;
        Ok(n > 0)
    }

    // ── Appointments ────────────────────────────────────────────────

    async fn upsert_appointment(&self, a: &Appointment) -> Result<(), DatabaseError> {
        self.exec(
            "upsert_appointment",
            "INSERT INTO appointments (registro, name, surname, phone, date, time, status, doctor, treatment, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(registro) DO UPDATE SET name = excluded.name, surname = excluded.surname, \
             phone = excluded.phone, date = excluded.date, time = excluded.time, \
             status = excluded.status, doctor = excluded.doctor, treatment = excluded.treatment, \
             updated_at = excluded.updated_at",
            params![
                a.registro.as_str(),
                a.name.as_str(),
                a.surname.as_str(),
                a.phone.as_str(),
                a.date.as_str(),
                a.time.as_str(),
                a.status.as_str(),
                a.doctor.as_str(),
                a.treatment.as_str(),
                ts(&Utc::now()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn insert_appointment_if_absent(&self, a: &Appointment) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "insert_appointment_if_absent",
                "INSERT INTO appointments (registro, name, surname, phone, date, time, status, doctor, treatment, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(registro) DO NOTHING",
                params![
                    a.registro.as_str(),
                    a.name.as_str(),
                    a.surname.as_str(),
                    a.phone.as_str(),
                    a.date.as_str(),
                    a.time.as_str(),
                    a.status.as_str(),
                    a.doctor.as_str(),
                    a.treatment.as_str(),
                    ts(&Utc::now()),
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn get_appointment(&self, registro: &str) -> Result<Option<Appointment>, DatabaseError> {
        self.query_one(
            "get_appointment",
            &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE registro = ?1"),
            params![registro],
            row_to_appointment,
        )
        .await
    }

    async fn list_appointments(&self) -> Result<Vec<Appointment>, DatabaseError> {
        self.query_all(
            "list_appointments",
            &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments ORDER BY registro"),
            (),
            row_to_appointment,
        )
        .await
    }

    async fn delete_appointment(&self, registro: &str) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "delete_appointment",
                "DELETE FROM appointments WHERE registro = ?1",
                params![registro],
            )
            .await?;
        Ok(n > 0)
    }

    async fn update_appointment_status(
        &self,
        registro: &str,
        status: &AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "update_appointment_status",
                "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE registro = ?3",
                params![status.as_str(), ts(&at), registro],
            )
            .await?;
        Ok(n > 0)
    }

    // ── Reminders ───────────────────────────────────────────────────

    async fn claim_reminder(
        &self,
        appointment_key: &str,
        scheduled_for: DateTime<Utc>,
        flow_id: &str,
    ) -> Result<bool, DatabaseError> {
        let n = self
            .exec(
                "claim_reminder",
                "INSERT OR IGNORE INTO reminders_sent (appointment_key, scheduled_for, flow_id, sent_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![appointment_key, ts(&scheduled_for), flow_id, ts(&Utc::now())],
            )
            .await?;
        Ok(n == 1)
    }

    // ── AI config ───────────────────────────────────────────────────

    async fn load_ai_config(&self) -> Result<Option<AiConfig>, DatabaseError> {
        let value: Option<String> = self
            .query_one(
                "load_ai_config",
                "SELECT value FROM settings WHERE key = ?1",
                params![AI_CONFIG_KEY],
                |row| row.get(0),
            )
            .await?;

        value
            .map(|v| {
                serde_json::from_str(&v)
                    .map_err(|e| DatabaseError::Serialization(format!("load_ai_config: {e}")))
            })
            .transpose()
    }

    async fn save_ai_config(&self, config: &AiConfig) -> Result<(), DatabaseError> {
        let value = to_json(config)?;
        self.exec(
            "save_ai_config",
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![AI_CONFIG_KEY, value, ts(&Utc::now())],
        )
        .await?;
        Ok(())
    }
}
