//! Where upcoming appointments come from.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SheetsConfig;
use crate::error::SourceError;
use crate::pipeline::types::normalize_phone;
use crate::reminders::appointment::{Appointment, AppointmentStatus, parse_date};
use crate::store::Database;

/// Agenda rows narrower than this are incomplete exports and are ignored.
const SHEET_COLUMNS: usize = 14;

/// A provider of upcoming appointments.
#[async_trait]
pub trait AppointmentSource: Send + Sync {
    fn name(&self) -> &str;

    /// Appointments dated between today and `now + lookahead`.
    ///
    /// Rows whose date cannot be parsed are passed through so the caller can
    /// report them.
    async fn list_upcoming(
        &self,
        now: DateTime<Utc>,
        lookahead: Duration,
    ) -> Result<Vec<Appointment>, SourceError>;
}

/// Date-level look-ahead filter, evaluated in the clinic's local time.
pub fn within_lookahead(
    appointment: &Appointment,
    now: DateTime<Utc>,
    lookahead: Duration,
    offset: FixedOffset,
) -> bool {
    let Some(date) = parse_date(&appointment.date) else {
        return true;
    };
    let today = now.with_timezone(&offset).date_naive();
    let last = (now + lookahead).with_timezone(&offset).date_naive();
    date >= today && date <= last
}

// ── Local store ─────────────────────────────────────────────────────

/// Reads the local `appointments` collection.
pub struct StoreAppointmentSource {
    db: Arc<dyn Database>,
    offset: FixedOffset,
}

impl StoreAppointmentSource {
    pub fn new(db: Arc<dyn Database>, offset: FixedOffset) -> Self {
        Self { db, offset }
    }
}

#[async_trait]
impl AppointmentSource for StoreAppointmentSource {
    fn name(&self) -> &str {
        "store"
    }

    async fn list_upcoming(
        &self,
        now: DateTime<Utc>,
        lookahead: Duration,
    ) -> Result<Vec<Appointment>, SourceError> {
        Ok(self
            .db
            .list_appointments()
            .await?
            .into_iter()
            .filter(|a| within_lookahead(a, now, lookahead, self.offset))
            .collect())
    }
}

// ── Google Sheets ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Reads the agenda from a Google Sheets range through the v4 REST API.
///
/// Column layout: registro, citMod, numHis, numPac, apellidos, nombre,
/// telMovil, fecha, hora, estadoCita, tratamiento, odontologo, duracion,
/// is_first_visit.
pub struct SheetsSource {
    config: SheetsConfig,
    client: reqwest::Client,
    offset: FixedOffset,
}

impl SheetsSource {
    pub fn new(config: SheetsConfig, offset: FixedOffset) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            offset,
        }
    }

    fn values_url(&self) -> Result<reqwest::Url, SourceError> {
        let mut url = reqwest::Url::parse(&self.config.base_url)
            .map_err(|e| SourceError::Fetch(format!("invalid Sheets base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Fetch("Sheets base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend([
                self.config.spreadsheet_id.as_str(),
                "values",
                self.config.range.as_str(),
            ]);
        Ok(url)
    }

    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, SourceError> {
        let resp = self
            .client
            .get(self.values_url()?)
            .query(&[("key", self.config.api_key.expose_secret())])
            .send()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Fetch(format!("Sheets HTTP {status}: {body}")));
        }
        let range: ValueRange = resp
            .json()
            .await
            .map_err(|e| SourceError::Fetch(format!("invalid Sheets response: {e}")))?;
        Ok(range.values)
    }
}

/// Map one agenda row. `None` for rows that cannot identify an appointment.
fn row_to_appointment(row: &[String]) -> Option<Appointment> {
    if row.len() < SHEET_COLUMNS {
        return None;
    }
    let cell = |i: usize| row[i].trim().to_string();
    let registro = cell(0);
    if registro.is_empty() {
        return None;
    }
    Some(Appointment {
        registro,
        surname: cell(4),
        name: cell(5),
        phone: normalize_phone(&cell(6)).replace(' ', ""),
        date: cell(7),
        time: cell(8),
        status: AppointmentStatus::parse(&row[9]),
        treatment: cell(10),
        doctor: cell(11),
    })
}

#[async_trait]
impl AppointmentSource for SheetsSource {
    fn name(&self) -> &str {
        "google_sheets"
    }

    async fn list_upcoming(
        &self,
        now: DateTime<Utc>,
        lookahead: Duration,
    ) -> Result<Vec<Appointment>, SourceError> {
        let rows = self.fetch_rows().await?;
        let total = rows.len();
        let appointments: Vec<Appointment> = rows
            .iter()
            .filter_map(|row| {
                let parsed = row_to_appointment(row);
                if parsed.is_none() {
                    debug!(columns = row.len(), "Skipping incomplete agenda row");
                }
                parsed
            })
            .filter(|a| within_lookahead(a, now, lookahead, self.offset))
            .collect();

        if total > 0 && appointments.is_empty() {
            warn!(rows = total, "No upcoming appointments in agenda sheet");
        }
        debug!(rows = total, upcoming = appointments.len(), "Agenda sheet read");
        Ok(appointments)
    }
}
