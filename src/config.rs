//! Configuration types.
//!
//! Static settings are read once from the environment and handed to each
//! component at construction. The AI assistant settings live in the store and
//! are swapped in memory only through [`AiConfigHandle`].

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{ConfigError, DatabaseError};
use crate::store::Database;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Directory for daily rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
    /// Messages considered when classifying a conversation.
    pub classification_window: usize,
    /// How far back `classify_all_conversations` looks.
    pub classify_lookback: Duration,
    /// Ask the LLM when no keyword rule matches.
    pub llm_classifier_fallback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/clinic.db"),
            log_dir: None,
            classification_window: 5,
            classify_lookback: Duration::from_secs(24 * 3600), // 24 hours
            llm_classifier_fallback: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            db_path: env_opt("CLINIC_DB_PATH").map(PathBuf::from).unwrap_or(d.db_path),
            log_dir: env_opt("CLINIC_LOG_DIR").map(PathBuf::from),
            classification_window: env_or("CLASSIFICATION_WINDOW", d.classification_window),
            classify_lookback: d.classify_lookback,
            llm_classifier_fallback: env_or("LLM_CLASSIFIER_FALLBACK", d.llm_classifier_fallback),
        }
    }
}

/// Messaging gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL; messages are posted to `{base_url}/send-message`.
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let base_url = env_opt("WHATSAPP_SERVICE_URL").unwrap_or(d.base_url);
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "WHATSAPP_SERVICE_URL".into(),
                message: format!("expected an http(s) URL, got '{base_url}'"),
            });
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(env_or("WHATSAPP_TIMEOUT_SECS", 30)),
        })
    }
}

/// Reminder scheduler settings.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    /// Lower bound of the reminder window, in hours before the appointment.
    pub window_start_hours: i64,
    /// Upper bound of the reminder window (inclusive).
    pub window_end_hours: i64,
    /// How far ahead the appointment source is asked to look.
    pub lookahead_days: i64,
    /// Fixed offset of the clinic's local time from UTC.
    pub utc_offset_minutes: i32,
    /// Flow category run for each due appointment.
    pub flow_category: String,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(15 * 60), // 15 minutes
            window_start_hours: 24,
            window_end_hours: 26,
            lookahead_days: 7,
            utc_offset_minutes: 0,
            flow_category: "confirmacion".to_string(),
        }
    }
}

impl ReminderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let config = Self {
            enabled: env_or("REMINDERS_ENABLED", d.enabled),
            poll_interval: Duration::from_secs(env_or("REMINDER_POLL_INTERVAL_SECS", 900)),
            window_start_hours: env_or("REMINDER_WINDOW_START_HOURS", d.window_start_hours),
            window_end_hours: env_or("REMINDER_WINDOW_END_HOURS", d.window_end_hours),
            lookahead_days: env_or("REMINDER_LOOKAHEAD_DAYS", d.lookahead_days),
            utc_offset_minutes: env_or("CLINIC_UTC_OFFSET_MINUTES", d.utc_offset_minutes),
            flow_category: env_opt("REMINDER_FLOW_CATEGORY").unwrap_or(d.flow_category),
        };

        if config.window_start_hours > config.window_end_hours {
            return Err(ConfigError::InvalidValue {
                key: "REMINDER_WINDOW_START_HOURS".into(),
                message: format!(
                    "window start ({}h) is after window end ({}h)",
                    config.window_start_hours, config.window_end_hours
                ),
            });
        }
        if FixedOffset::east_opt(config.utc_offset_minutes * 60).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "CLINIC_UTC_OFFSET_MINUTES".into(),
                message: format!("{} is out of range", config.utc_offset_minutes),
            });
        }
        if config.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "REMINDER_POLL_INTERVAL_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(config)
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

/// Google Sheets appointment source settings.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    /// A1 range covering the agenda rows, header excluded.
    pub range: String,
    pub api_key: SecretString,
    pub base_url: String,
}

impl SheetsConfig {
    /// `None` when no spreadsheet is configured.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(spreadsheet_id) = env_opt("GOOGLE_SHEETS_ID") else {
            return Ok(None);
        };
        let api_key = env_opt("GOOGLE_SHEETS_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("GOOGLE_SHEETS_API_KEY".into()))?;
        Ok(Some(Self {
            spreadsheet_id,
            range: env_opt("GOOGLE_SHEETS_RANGE").unwrap_or_else(|| "Sheet1!A2:N".into()),
            api_key: SecretString::from(api_key),
            base_url: "https://sheets.googleapis.com/v4/spreadsheets".into(),
        }))
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            host: env_opt("CLINIC_HOST").unwrap_or(d.host),
            port: env_or("CLINIC_PORT", d.port),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── AI assistant settings ───────────────────────────────────────────

/// Opening hours for one weekday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSchedule {
    pub day: String,
    pub start: String,
    pub end: String,
}

/// Settings for the assistant: whether it classifies, whether it answers,
/// and what it knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub ai_active: bool,
    pub auto_response: bool,
    pub classification_active: bool,
    pub personality: String,
    pub knowledge_topics: Vec<String>,
    pub work_schedules: Vec<WorkSchedule>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            ai_active: false,
            auto_response: false,
            classification_active: true,
            personality: "Soy el asistente virtual de Rubio García Dental. Respondo de forma \
                          amable, breve y profesional, y derivo a la clínica cualquier consulta \
                          médica que requiera valoración."
                .to_string(),
            knowledge_topics: Vec::new(),
            work_schedules: Vec::new(),
        }
    }
}

impl AiConfig {
    /// System prompt for the response generator.
    pub fn preamble(&self) -> String {
        let mut out = self.personality.clone();
        if !self.knowledge_topics.is_empty() {
            out.push_str("\n\nTemas sobre los que puedes informar:\n");
            for topic in &self.knowledge_topics {
                out.push_str(&format!("- {topic}\n"));
            }
        }
        if !self.work_schedules.is_empty() {
            out.push_str("\nHorario de la clínica:\n");
            for s in &self.work_schedules {
                out.push_str(&format!("- {}: {} - {}\n", s.day, s.start, s.end));
            }
        }
        out
    }
}

/// Shared, reloadable view of the persisted [`AiConfig`].
///
/// Readers take a snapshot; writers persist first and swap the in-memory copy
/// only after the store accepted it.
#[derive(Clone)]
pub struct AiConfigHandle {
    current: Arc<RwLock<AiConfig>>,
    db: Arc<dyn Database>,
}

impl AiConfigHandle {
    /// Load the stored config, falling back to defaults.
    pub async fn load(db: Arc<dyn Database>) -> Result<Self, DatabaseError> {
        let config = db.load_ai_config().await?.unwrap_or_default();
        Ok(Self {
            current: Arc::new(RwLock::new(config)),
            db,
        })
    }

    pub async fn snapshot(&self) -> AiConfig {
        self.current.read().await.clone()
    }

    pub async fn update(&self, config: AiConfig) -> Result<AiConfig, DatabaseError> {
        self.db.save_ai_config(&config).await?;
        *self.current.write().await = config.clone();
        tracing::info!(
            ai_active = config.ai_active,
            auto_response = config.auto_response,
            classification_active = config.classification_active,
            "AI config updated"
        );
        Ok(config)
    }

    /// Re-read the stored config, discarding the in-memory copy.
    pub async fn reload(&self) -> Result<AiConfig, DatabaseError> {
        let config = self.db.load_ai_config().await?.unwrap_or_default();
        *self.current.write().await = config.clone();
        tracing::info!("AI config reloaded from store");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[test]
    fn defaults_match_documented_values() {
        let r = ReminderConfig::default();
        assert_eq!(r.poll_interval, Duration::from_secs(900));
        assert_eq!((r.window_start_hours, r.window_end_hours), (24, 26));
        assert_eq!(r.lookahead_days, 7);
        assert_eq!(r.offset(), Utc.fix());

        let g = GatewayConfig::default();
        assert_eq!(g.timeout, Duration::from_secs(30));
        assert_eq!(EngineConfig::default().classification_window, 5);
    }

    #[test]
    fn ai_config_fills_missing_fields() {
        let c: AiConfig = serde_json::from_str(r#"{"ai_active": true}"#).unwrap();
        assert!(c.ai_active);
        assert!(!c.auto_response);
        assert!(c.classification_active);
        assert!(c.personality.contains("Rubio García Dental"));
    }

    #[test]
    fn preamble_lists_topics_and_hours() {
        let c = AiConfig {
            knowledge_topics: vec!["Implantes".into()],
            work_schedules: vec![WorkSchedule {
                day: "Lunes".into(),
                start: "09:00".into(),
                end: "14:00".into(),
            }],
            ..Default::default()
        };
        let p = c.preamble();
        assert!(p.contains("- Implantes"));
        assert!(p.contains("- Lunes: 09:00 - 14:00"));
    }

    #[tokio::test]
    async fn handle_update_persists_and_reload_reads_store() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let handle = AiConfigHandle::load(Arc::clone(&db)).await.unwrap();
        assert_eq!(handle.snapshot().await, AiConfig::default());

        let updated = AiConfig {
            ai_active: true,
            auto_response: true,
            ..Default::default()
        };
        handle.update(updated.clone()).await.unwrap();
        assert_eq!(handle.snapshot().await, updated);

        // A write that bypasses the handle is only picked up on reload.
        let external = AiConfig {
            classification_active: false,
            ..Default::default()
        };
        db.save_ai_config(&external).await.unwrap();
        assert!(handle.snapshot().await.ai_active);
        handle.reload().await.unwrap();
        assert_eq!(handle.snapshot().await, external);
    }
}
