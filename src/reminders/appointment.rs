//! Appointment records as seen by the reminder engine.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Date formats the clinic agenda has been seen to use.
///
/// `%d/%m/%y` must precede `%d/%m/%Y`: chrono's `%Y` also accepts two digits.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%y", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

const TIME_FORMATS: &[&str] = &["%H:%M", "%H:%M:%S", "%I:%M %p"];

/// Lifecycle status of an appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AppointmentStatus {
    Planned,
    Confirmed,
    Cancelled,
    Other(String),
}

impl AppointmentStatus {
    /// Parse a status in either the agenda's Spanish wording or English.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "planned" | "planificada" | "planificado" | "pendiente" => Self::Planned,
            "confirmed" | "confirmada" | "confirmado" => Self::Confirmed,
            "cancelled" | "canceled" | "cancelada" | "anulada" => Self::Cancelled,
            _ => Self::Other(s.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Planned => "planned",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Other(s) => s,
        }
    }

    pub fn is_planned(&self) -> bool {
        matches!(self, Self::Planned)
    }
}

impl From<String> for AppointmentStatus {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<AppointmentStatus> for String {
    fn from(s: AppointmentStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An appointment from the clinic agenda.
///
/// `date` and `time` are kept as the agenda wrote them; [`Appointment::starts_at`]
/// resolves them to an instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    /// Agenda record number. Dedup key for reminders.
    pub registro: String,
    pub name: String,
    pub surname: String,
    pub phone: String,
    pub date: String,
    pub time: String,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub doctor: String,
    #[serde(default)]
    pub treatment: String,
}

impl Appointment {
    /// Resolve date and time to UTC, interpreting them in the clinic's offset.
    pub fn starts_at(&self, offset: FixedOffset) -> Result<DateTime<Utc>, SourceError> {
        let naive = parse_local(&self.date, &self.time).ok_or_else(|| SourceError::Parse {
            id: self.registro.clone(),
            reason: format!("unrecognised date/time '{} {}'", self.date, self.time),
        })?;
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| SourceError::Parse {
                id: self.registro.clone(),
                reason: "ambiguous local time".into(),
            })
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    // Sheets exports sometimes carry a time suffix on the date cell.
    let s = s.split_whitespace().next().unwrap_or(s);
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(s, f).ok())
}

fn parse_local(date: &str, time: &str) -> Option<NaiveDateTime> {
    Some(parse_date(date)?.and_time(parse_time(time)?))
}
