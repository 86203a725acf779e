//! Appointment reminders.

pub mod agenda;
pub mod appointment;
pub mod scheduler;
pub mod source;

pub use agenda::{AppointmentBook, AppointmentInput};
pub use appointment::{Appointment, AppointmentStatus};
pub use scheduler::{ReminderScheduler, TickReport, spawn_reminder_ticker};
pub use source::{AppointmentSource, SheetsSource, StoreAppointmentSource};
