//! End-to-end tests: the API server and a fake WhatsApp gateway, each on a
//! random port, driven over real HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::routing::post;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use clinic_flows::api::{self, AppState};
use clinic_flows::channels::{GatewayTransport, Transport};
use clinic_flows::config::{AiConfigHandle, GatewayConfig, ReminderConfig};
use clinic_flows::conversations::{ConversationClassifier, ConversationTracker};
use clinic_flows::flows::{ActionDispatcher, FlowExecutor, FlowService, InteractiveMessages};
use clinic_flows::pipeline::{InboundProcessor, KeywordClassifier};
use clinic_flows::reminders::{
    Appointment, AppointmentBook, AppointmentStatus, ReminderScheduler, StoreAppointmentSource,
};
use clinic_flows::store::{Database, LibSqlBackend};

type Outbox = Arc<Mutex<Vec<Value>>>;

async fn serve(app: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://{addr}")
}

/// Fake gateway that records every `/send-message` body.
async fn start_gateway() -> (String, Outbox) {
    let outbox: Outbox = Arc::new(Mutex::new(Vec::new()));
    let app = axum::Router::new()
        .route(
            "/send-message",
            post(|State(outbox): State<Outbox>, Json(body): Json<Value>| async move {
                outbox.lock().unwrap().push(body);
                Json(json!({"status": "sent"}))
            }),
        )
        .with_state(Arc::clone(&outbox));
    (serve(app).await, outbox)
}

struct Harness {
    base: String,
    db: Arc<dyn Database>,
    outbox: Outbox,
    http: reqwest::Client,
}

async fn start() -> Harness {
    let (gateway_url, outbox) = start_gateway().await;
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let transport: Arc<dyn Transport> = Arc::new(GatewayTransport::new(GatewayConfig {
        base_url: gateway_url,
        timeout: Duration::from_secs(5),
    }));

    let tracker = ConversationTracker::new(Arc::clone(&db));
    let classifier = Arc::new(ConversationClassifier::new(
        Arc::clone(&db),
        KeywordClassifier::default_rules(),
    ));
    let ai_config = AiConfigHandle::load(Arc::clone(&db)).await.unwrap();
    let dispatcher = Arc::new(ActionDispatcher::new(Arc::clone(&db), Arc::clone(&transport)));
    let reminders = ReminderConfig::default();
    let scheduler = Arc::new(ReminderScheduler::new(
        Arc::clone(&db),
        Arc::new(StoreAppointmentSource::new(Arc::clone(&db), reminders.offset())),
        FlowExecutor::new(Arc::clone(&dispatcher)),
        reminders,
    ));

    let state = AppState {
        processor: InboundProcessor::new(
            tracker.clone(),
            Arc::clone(&classifier),
            ai_config.clone(),
            Arc::clone(&transport),
        ),
        tracker,
        classifier,
        interactive: Arc::new(InteractiveMessages::new(Arc::clone(&db), dispatcher)),
        flows: FlowService::new(Arc::clone(&db)),
        ai_config,
        appointments: AppointmentBook::new(Arc::clone(&db)),
        scheduler: Some(scheduler),
    };
    let base = serve(api::routes(state)).await;

    Harness {
        base,
        db,
        outbox,
        http: reqwest::Client::new(),
    }
}

impl Harness {
    async fn post(&self, path: &str, body: Value) -> Value {
        self.http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    fn sent(&self) -> Vec<Value> {
        self.outbox.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn health_check() {
    let h = start().await;
    let body: Value = h
        .http
        .get(format!("{}/health", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn reminder_flow_runs_once_and_confirms() {
    let h = start().await;

    let created = h
        .post(
            "/api/message-flows",
            json!({
                "name": "Confirmación 24h",
                "category": "confirmacion",
                "steps": [{
                    "message": "Hola {Nombre}, mañana a las {Hora} tienes cita con {Doctor}.",
                    "actions": [{"type": "update_status", "value": "confirmada"}],
                    "delay": 0
                }]
            }),
        )
        .await;
    assert_eq!(created["success"], true);

    // An appointment 25 hours from now, in UTC.
    let start = chrono::Utc::now() + chrono::Duration::hours(25);
    h.db.upsert_appointment(&Appointment {
        registro: "R-77".into(),
        name: "Ana".into(),
        surname: "López".into(),
        phone: "34600111222".into(),
        date: start.format("%Y-%m-%d").to_string(),
        time: start.format("%H:%M").to_string(),
        status: AppointmentStatus::Planned,
        doctor: "Dr. Rubio".into(),
        treatment: "Limpieza".into(),
    })
    .await
    .unwrap();

    let first = h.post("/api/reminders/run?wait=true", json!({})).await;
    assert_eq!(first["report"]["triggered"], 1);
    assert_eq!(first["executions"][0]["steps"][0]["sent"], true);

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["number"], "34600111222");
    assert!(
        sent[0]["message"]
            .as_str()
            .unwrap()
            .starts_with("Hola Ana, mañana a las")
    );

    let second = h.post("/api/reminders/run?wait=true", json!({})).await;
    assert_eq!(second["report"]["triggered"], 0);
    assert_eq!(h.sent().len(), 1);

    let stored = h.db.get_appointment("R-77").await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn appointment_booked_over_http_is_reminded() {
    let h = start().await;
    h.post(
        "/api/message-flows",
        json!({
            "name": "Confirmación 24h",
            "category": "confirmacion",
            "steps": [{
                "message": "Hola {Nombre}, tu cita de {Tratamiento} es el {Fecha}.",
                "actions": [{"type": "update_status", "value": "confirmada"}],
                "delay": 0
            }]
        }),
    )
    .await;

    let start = chrono::Utc::now() + chrono::Duration::hours(25);
    let booked = h
        .post(
            "/api/appointments",
            json!({
                "registro": "R-88",
                "name": "Luis",
                "surname": "Martín",
                "phone": "+34600333444",
                "date": start.format("%d/%m/%Y").to_string(),
                "time": start.format("%H:%M").to_string(),
                "treatment": "Revisión"
            }),
        )
        .await;
    assert_eq!(booked["success"], true);

    let run = h.post("/api/reminders/run?wait=true", json!({})).await;
    assert_eq!(run["report"]["triggered"], 1);

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["number"], "34600333444");
    assert!(sent[0]["message"].as_str().unwrap().contains("cita de Revisión"));

    let stored: Value = h
        .http
        .get(format!("{}/api/appointments/R-88", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stored["appointment"]["status"], "confirmed");
}

#[tokio::test]
async fn webhook_buttons_and_audit() {
    let h = start().await;

    let inbound = h
        .post(
            "/api/whatsapp/webhook",
            json!({
                "from": "34600111222@s.whatsapp.net",
                "body": "Quería información sobre el implante",
                "type": "chat",
                "pushname": "Ana"
            }),
        )
        .await;
    assert_eq!(inbound["success"], true);
    assert_eq!(inbound["classification"], "ATTENTION");
    let conversation_id = inbound["conversation_id"].as_str().unwrap().to_string();

    let consent = h
        .post(
            "/api/consent-templates",
            json!({
                "code": "implante",
                "title": "Consentimiento de implante",
                "description": "Colocación de un implante dental.",
                "risks": ["Inflamación", "Molestias"]
            }),
        )
        .await;
    assert_eq!(consent["success"], true);

    let sent = h
        .post(
            &format!("/api/conversations/{conversation_id}/send"),
            json!({
                "message": "¿Quieres recibir el consentimiento?",
                "buttons": [{
                    "id": "yes",
                    "text": "Sí",
                    "actions": [
                        {"type": "send_consent_form", "template_code": "implante"},
                        {"type": "send_consent_form", "template_code": "lopd"}
                    ]
                }]
            }),
        )
        .await;
    assert_eq!(sent["success"], true);
    let message_id = sent["message_id"].as_str().unwrap().to_string();
    assert_eq!(h.sent()[0]["buttons"][0]["id"], "yes");

    let clicked = h
        .post(
            "/api/conversations/button-response",
            json!({"message_id": message_id, "button_id": "yes"}),
        )
        .await;
    assert_eq!(clicked["success"], true);
    assert_eq!(clicked["actions_executed"][0]["success"], true);
    assert_eq!(clicked["actions_executed"][1]["success"], false);

    let outbound = h.sent();
    assert_eq!(outbound.len(), 2);
    let consent_text = outbound[1]["message"].as_str().unwrap();
    assert!(consent_text.contains("- Molestias"));
    assert!(consent_text.ends_with("ACEPTO"));

    let audit = h.db.list_button_responses(&conversation_id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].actions_executed.len(), 2);

    let read = h
        .post(&format!("/api/conversations/{conversation_id}/mark-read"), json!({}))
        .await;
    assert_eq!(read["success"], true);
    let conv = h.db.get_conversation(&conversation_id).await.unwrap().unwrap();
    assert_eq!(conv.unread_count, 0);
}
