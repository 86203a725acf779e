//! Periodic reminder ticks.
//!
//! Each tick pulls upcoming appointments, keeps the planned ones whose start
//! falls inside the reminder window, claims the `(registro, start)` slot in
//! `reminders_sent` and spawns the confirmation flow for every claim won.
//! A slot can only be claimed once, so overlapping or repeated ticks never
//! send a second reminder.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ReminderConfig;
use crate::flows::executor::{FlowExecution, FlowExecutor};
use crate::flows::model::Recipient;
use crate::reminders::source::AppointmentSource;
use crate::store::Database;

/// Counters for one scheduler tick.
#[derive(Debug, Default, Serialize)]
pub struct TickReport {
    pub checked: usize,
    pub triggered: usize,
    /// Appointments that could not be processed (bad date, no phone, store error).
    pub skipped: usize,
    /// Due, but the reminder was already claimed.
    pub already_sent: usize,
    /// Outside the window or no longer planned.
    pub not_due: usize,
    /// No active flow in the reminder category.
    pub no_flow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Flow runs started by this tick.
    #[serde(skip)]
    pub handles: Vec<JoinHandle<FlowExecution>>,
}

impl TickReport {
    /// Wait for every flow run started by this tick.
    pub async fn wait(&mut self) -> Vec<FlowExecution> {
        futures::future::join_all(std::mem::take(&mut self.handles))
            .await
            .into_iter()
            .filter_map(|r| match r {
                Ok(execution) => Some(execution),
                Err(e) => {
                    error!("Reminder flow task failed: {}", e);
                    None
                }
            })
            .collect()
    }
}

pub struct ReminderScheduler {
    db: Arc<dyn Database>,
    source: Arc<dyn AppointmentSource>,
    executor: FlowExecutor,
    config: ReminderConfig,
}

impl ReminderScheduler {
    pub fn new(
        db: Arc<dyn Database>,
        source: Arc<dyn AppointmentSource>,
        executor: FlowExecutor,
        config: ReminderConfig,
    ) -> Self {
        Self {
            db,
            source,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &ReminderConfig {
        &self.config
    }

    /// Run one tick as of `now`. Flow runs are spawned and not awaited.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let flow = match self
            .db
            .active_flow_for_category(&self.config.flow_category)
            .await
        {
            Ok(Some(flow)) => flow,
            Ok(None) => {
                warn!(
                    category = %self.config.flow_category,
                    "No active reminder flow configured, skipping tick"
                );
                report.no_flow = true;
                return report;
            }
            Err(e) => {
                error!("Failed to load reminder flow: {}", e);
                report.error = Some(e.to_string());
                return report;
            }
        };

        let lookahead = chrono::Duration::days(self.config.lookahead_days);
        let appointments = match self.source.list_upcoming(now, lookahead).await {
            Ok(list) => list,
            Err(e) => {
                error!(source = self.source.name(), "Failed to list appointments: {}", e);
                report.error = Some(e.to_string());
                return report;
            }
        };

        let window_start = chrono::Duration::hours(self.config.window_start_hours);
        let window_end = chrono::Duration::hours(self.config.window_end_hours);
        let offset = self.config.offset();

        for appointment in appointments {
            report.checked += 1;

            if !appointment.status.is_planned() {
                report.not_due += 1;
                continue;
            }
            let starts_at = match appointment.starts_at(offset) {
                Ok(t) => t,
                Err(e) => {
                    warn!(registro = %appointment.registro, "Skipping appointment: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };
            let until = starts_at - now;
            if until < window_start || until > window_end {
                report.not_due += 1;
                continue;
            }
            if appointment.phone.is_empty() {
                warn!(registro = %appointment.registro, "Skipping due appointment without phone");
                report.skipped += 1;
                continue;
            }

            match self
                .db
                .claim_reminder(&appointment.registro, starts_at, &flow.id)
                .await
            {
                Ok(true) => {
                    info!(
                        registro = %appointment.registro,
                        phone = %appointment.phone,
                        starts_at = %starts_at,
                        "Sending reminder"
                    );
                    // External agendas get a local row for status write-back.
                    if let Err(e) = self.db.insert_appointment_if_absent(&appointment).await {
                        warn!(registro = %appointment.registro, "Failed to mirror appointment: {}", e);
                    }
                    let executor = self.executor.clone();
                    let flow = flow.clone();
                    let recipient = Recipient::from_appointment(&appointment);
                    report.triggered += 1;
                    report.handles.push(tokio::spawn(async move {
                        executor.execute(&flow, &recipient).await
                    }));
                }
                Ok(false) => {
                    debug!(registro = %appointment.registro, "Reminder already sent");
                    report.already_sent += 1;
                }
                Err(e) => {
                    error!(registro = %appointment.registro, "Failed to claim reminder: {}", e);
                    report.skipped += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            triggered = report.triggered,
            skipped = report.skipped,
            already_sent = report.already_sent,
            "Reminder tick complete"
        );
        report
    }
}

/// Spawn the reminder ticker background task.
pub fn spawn_reminder_ticker(
    scheduler: Arc<ReminderScheduler>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            scheduler.run_tick(Utc::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::flows::actions::ActionDispatcher;
    use crate::flows::model::{Action, FlowStep, MessageFlow};
    use crate::reminders::appointment::{Appointment, AppointmentStatus};
    use crate::store::LibSqlBackend;
    use crate::test_support::RecordingTransport;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct FixedSource(Mutex<Vec<Appointment>>);

    #[async_trait]
    impl AppointmentSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn list_upcoming(
            &self,
            _now: DateTime<Utc>,
            _lookahead: chrono::Duration,
        ) -> Result<Vec<Appointment>, SourceError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    struct Fixture {
        db: Arc<dyn Database>,
        transport: Arc<RecordingTransport>,
        scheduler: ReminderScheduler,
    }

    fn appointment(registro: &str, date: &str, time: &str, status: &str) -> Appointment {
        Appointment {
            registro: registro.into(),
            name: "Ana".into(),
            surname: "López".into(),
            phone: format!("34600{registro}"),
            date: date.into(),
            time: time.into(),
            status: AppointmentStatus::parse(status),
            doctor: "Dr. Rubio".into(),
            treatment: "Limpieza".into(),
        }
    }

    async fn fixture(appointments: Vec<Appointment>, with_flow: bool) -> Fixture {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        for a in &appointments {
            db.upsert_appointment(a).await.unwrap();
        }
        if with_flow {
            let flow = MessageFlow::new(
                "Confirmación 24h",
                "confirmacion",
                vec![FlowStep::new("Hola {Nombre}, te recordamos tu cita del {Fecha} a las {Hora}")
                    .with_action(Action::UpdateStatus {
                        value: "confirmada".into(),
                        appointment_id: None,
                    })],
            );
            db.insert_flow(&flow).await.unwrap();
        }
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = Arc::new(ActionDispatcher::new(Arc::clone(&db), transport.clone()));
        let scheduler = ReminderScheduler::new(
            Arc::clone(&db),
            Arc::new(FixedSource(Mutex::new(appointments))),
            FlowExecutor::new(dispatcher),
            ReminderConfig::default(),
        );
        Fixture {
            db,
            transport,
            scheduler,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 8, 9, 0, 0).unwrap()
    }

    async fn finish(report: &mut TickReport) -> Vec<FlowExecution> {
        let expected = report.handles.len();
        let runs = report.wait().await;
        assert_eq!(runs.len(), expected);
        runs
    }

    #[tokio::test]
    async fn due_appointment_is_reminded_once() {
        let f = fixture(vec![appointment("1", "09/03/2026", "10:00", "Planificada")], true).await;

        let mut first = f.scheduler.run_tick(now()).await;
        assert_eq!(first.triggered, 1);
        let runs = finish(&mut first).await;
        assert_eq!(runs[0].sent_count(), 1);
        assert_eq!(
            f.transport.texts(),
            vec!["Hola Ana, te recordamos tu cita del 09/03/2026 a las 10:00"]
        );
        let stored = f.db.get_appointment("1").await.unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Confirmed);

        // The source still reports the appointment as planned on later polls.
        for minutes in [15, 30, 45] {
            let mut again = f
                .scheduler
                .run_tick(now() + chrono::Duration::minutes(minutes))
                .await;
            assert_eq!(again.triggered, 0);
            assert_eq!(again.already_sent, 1);
            finish(&mut again).await;
        }
        assert_eq!(f.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn external_appointment_is_mirrored_for_status_write_back() {
        let f = fixture(vec![appointment("7", "09/03/2026", "10:00", "Planificada")], true).await;
        f.db.delete_appointment("7").await.unwrap();

        let mut report = f.scheduler.run_tick(now()).await;
        let runs = finish(&mut report).await;
        assert_eq!(runs[0].failed_actions(), 0);
        let stored = f.db.get_appointment("7").await.unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Confirmed);
        assert_eq!(stored.phone, "346007");
    }

    #[tokio::test]
    async fn window_bounds_are_inclusive() {
        let f = fixture(
            vec![
                appointment("24", "09/03/2026", "09:00", "Planificada"),
                appointment("26", "09/03/2026", "11:00", "Planificada"),
                appointment("30", "09/03/2026", "15:00", "Planificada"),
                appointment("23", "09/03/2026", "08:00", "Planificada"),
            ],
            true,
        )
        .await;
        let mut report = f.scheduler.run_tick(now()).await;
        assert_eq!(report.checked, 4);
        assert_eq!(report.triggered, 2);
        assert_eq!(report.not_due, 2);
        finish(&mut report).await;

        let mut phones: Vec<String> = f.transport.sent().into_iter().map(|s| s.phone).collect();
        phones.sort();
        assert_eq!(phones, vec!["3460024", "3460026"]);
    }

    #[tokio::test]
    async fn only_planned_appointments_are_reminded() {
        let f = fixture(
            vec![
                appointment("1", "09/03/2026", "10:00", "Confirmada"),
                appointment("2", "09/03/2026", "10:00", "Cancelada"),
            ],
            true,
        )
        .await;
        let report = f.scheduler.run_tick(now()).await;
        assert_eq!(report.triggered, 0);
        assert_eq!(report.not_due, 2);
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn unparseable_dates_do_not_stop_the_tick() {
        let f = fixture(
            vec![
                appointment("1", "el lunes", "10:00", "Planificada"),
                appointment("2", "2026-03-09", "10:00", "Planificada"),
            ],
            true,
        )
        .await;
        let mut report = f.scheduler.run_tick(now()).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.triggered, 1);
        finish(&mut report).await;
        assert_eq!(f.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn missing_flow_is_a_noop() {
        let f = fixture(vec![appointment("1", "09/03/2026", "10:00", "Planificada")], false).await;
        let report = f.scheduler.run_tick(now()).await;
        assert!(report.no_flow);
        assert_eq!(report.checked, 0);
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn concurrent_ticks_claim_once() {
        let f = fixture(vec![appointment("1", "09/03/2026", "10:00", "Planificada")], true).await;
        let (mut a, mut b) = tokio::join!(f.scheduler.run_tick(now()), f.scheduler.run_tick(now()));
        assert_eq!(a.triggered + b.triggered, 1);
        assert_eq!(a.already_sent + b.already_sent, 1);
        finish(&mut a).await;
        finish(&mut b).await;
        assert_eq!(f.transport.sent().len(), 1);
    }
}
