//! Local appointment book.
//!
//! Appointments written here feed [`StoreAppointmentSource`](super::StoreAppointmentSource)
//! and are the targets of the `update_status` flow action.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::error::DatabaseError;
use crate::outcome::Outcome;
use crate::pipeline::types::normalize_phone;
use crate::reminders::appointment::{Appointment, AppointmentStatus, parse_date, parse_time};
use crate::store::Database;

/// Create/replace payload for an appointment.
#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentInput {
    /// Ignored on update; the path key wins.
    #[serde(default)]
    pub registro: String,
    pub name: String,
    #[serde(default)]
    pub surname: String,
    pub phone: String,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub doctor: String,
    #[serde(default)]
    pub treatment: String,
}

impl AppointmentInput {
    fn into_appointment(self, registro: &str) -> Result<Appointment, String> {
        let registro = registro.trim();
        if registro.is_empty() {
            return Err("Missing registro".into());
        }
        let phone = normalize_phone(&self.phone);
        if phone.is_empty() {
            return Err("Missing phone".into());
        }
        if parse_date(&self.date).is_none() {
            return Err(format!("Unrecognised date '{}'", self.date));
        }
        if parse_time(&self.time).is_none() {
            return Err(format!("Unrecognised time '{}'", self.time));
        }
        Ok(Appointment {
            registro: registro.to_string(),
            name: self.name.trim().to_string(),
            surname: self.surname.trim().to_string(),
            phone,
            date: self.date.trim().to_string(),
            time: self.time.trim().to_string(),
            status: self
                .status
                .as_deref()
                .map(AppointmentStatus::parse)
                .unwrap_or(AppointmentStatus::Planned),
            doctor: self.doctor,
            treatment: self.treatment,
        })
    }
}

/// CRUD over the local `appointments` collection.
#[derive(Clone)]
pub struct AppointmentBook {
    db: Arc<dyn Database>,
}

impl AppointmentBook {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        input: AppointmentInput,
    ) -> Result<Outcome<Appointment>, DatabaseError> {
        let registro = input.registro.clone();
        let appointment = match input.into_appointment(&registro) {
            Ok(a) => a,
            Err(e) => return Ok(Outcome::failure(e)),
        };
        if !self.db.insert_appointment_if_absent(&appointment).await? {
            return Ok(Outcome::failure(format!(
                "Appointment '{}' already exists",
                appointment.registro
            )));
        }
        info!(registro = %appointment.registro, date = %appointment.date, "Appointment created");
        Ok(Outcome::ok(appointment))
    }

    pub async fn get(&self, registro: &str) -> Result<Option<Appointment>, DatabaseError> {
        self.db.get_appointment(registro).await
    }

    pub async fn list(&self) -> Result<Vec<Appointment>, DatabaseError> {
        self.db.list_appointments().await
    }

    /// Replace the appointment stored under `registro`.
    pub async fn update(
        &self,
        registro: &str,
        input: AppointmentInput,
    ) -> Result<Outcome<Appointment>, DatabaseError> {
        if self.db.get_appointment(registro).await?.is_none() {
            return Ok(Outcome::failure("Appointment not found"));
        }
        let appointment = match input.into_appointment(registro) {
            Ok(a) => a,
            Err(e) => return Ok(Outcome::failure(e)),
        };
        self.db.upsert_appointment(&appointment).await?;
        info!(registro = %appointment.registro, "Appointment updated");
        Ok(Outcome::ok(appointment))
    }

    pub async fn delete(&self, registro: &str) -> Result<bool, DatabaseError> {
        self.db.delete_appointment(registro).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn book() -> AppointmentBook {
        AppointmentBook::new(Arc::new(LibSqlBackend::new_memory().await.unwrap()))
    }

    fn input(registro: &str) -> AppointmentInput {
        AppointmentInput {
            registro: registro.into(),
            name: "Ana".into(),
            surname: "López".into(),
            phone: "+34600111222".into(),
            date: "09/03/2026".into(),
            time: "10:30".into(),
            status: None,
            doctor: "Dr. Rubio".into(),
            treatment: "Limpieza".into(),
        }
    }

    #[tokio::test]
    async fn create_defaults_to_planned_and_rejects_duplicates() {
        let book = book().await;
        let created = book.create(input("R-1")).await.unwrap();
        let a = created.data.unwrap();
        assert_eq!(a.status, AppointmentStatus::Planned);
        assert_eq!(a.phone, "34600111222");

        let dup = book.create(input("R-1")).await.unwrap();
        assert!(!dup.success);
        assert_eq!(dup.error.as_deref(), Some("Appointment 'R-1' already exists"));
    }

    #[tokio::test]
    async fn invalid_input_is_reported() {
        let book = book().await;
        let mut bad = input("R-1");
        bad.date = "mañana".into();
        let out = book.create(bad).await.unwrap();
        assert_eq!(out.error.as_deref(), Some("Unrecognised date 'mañana'"));

        let out = book.create(input("  ")).await.unwrap();
        assert_eq!(out.error.as_deref(), Some("Missing registro"));
        assert!(book.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_uses_path_key_and_delete_removes() {
        let book = book().await;
        book.create(input("R-1")).await.unwrap();

        let mut change = input("ignored");
        change.time = "12:00".into();
        change.status = Some("confirmada".into());
        let updated = book.update("R-1", change).await.unwrap().data.unwrap();
        assert_eq!(updated.registro, "R-1");
        assert_eq!(updated.status, AppointmentStatus::Confirmed);
        assert_eq!(book.get("R-1").await.unwrap().unwrap().time, "12:00");
        assert!(book.get("ignored").await.unwrap().is_none());

        let missing = book.update("R-9", input("R-9")).await.unwrap();
        assert_eq!(missing.error.as_deref(), Some("Appointment not found"));

        assert!(book.delete("R-1").await.unwrap());
        assert!(!book.delete("R-1").await.unwrap());
    }
}
