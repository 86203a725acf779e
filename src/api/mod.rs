//! HTTP routes over the engine operations.
//!
//! Handlers only marshal. Recoverable conditions answer 200 with
//! `{success: false, error}`; store failures answer 500.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use crate::config::{AiConfig, AiConfigHandle};
use crate::conversations::classify::ConversationClassifier;
use crate::conversations::model::{Button, ColorCode};
use crate::conversations::tracker::ConversationTracker;
use crate::error::Error;
use crate::flows::buttons::InteractiveMessages;
use crate::flows::service::{ConsentInput, FlowInput, FlowService};
use crate::outcome::Outcome;
use crate::pipeline::processor::InboundProcessor;
use crate::pipeline::types::WebhookPayload;
use crate::reminders::agenda::{AppointmentBook, AppointmentInput};
use crate::reminders::scheduler::ReminderScheduler;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: ConversationTracker,
    pub classifier: Arc<ConversationClassifier>,
    pub processor: InboundProcessor,
    pub interactive: Arc<InteractiveMessages>,
    pub flows: FlowService,
    pub ai_config: AiConfigHandle,
    pub appointments: AppointmentBook,
    /// `None` when no appointment source is configured.
    pub scheduler: Option<Arc<ReminderScheduler>>,
}

/// Unexpected failure, answered as 500.
pub struct ApiError(Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": self.0.to_string()})),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the router.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/whatsapp/webhook", post(webhook))
        .route("/api/contacts", get(list_contacts))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/button-response", post(button_response))
        .route("/api/conversations/classify", post(classify_all))
        .route("/api/conversations/{id}", get(get_conversation))
        .route("/api/conversations/{id}/messages", get(conversation_messages))
        .route("/api/conversations/{id}/send", post(send_message))
        .route("/api/conversations/{id}/mark-read", post(mark_read))
        .route("/api/conversations/{id}/classify", post(classify_one))
        .route("/api/conversations/{id}/set-classification", post(set_classification))
        .route(
            "/api/conversations/{id}/classification",
            axum::routing::delete(clear_classification),
        )
        .route("/api/message-flows", get(list_flows).post(create_flow))
        .route(
            "/api/message-flows/{id}",
            get(get_flow).put(update_flow).delete(delete_flow),
        )
        .route("/api/consent-templates", get(list_consents).post(create_consent))
        .route(
            "/api/consent-templates/{code}",
            get(get_consent).put(update_consent).delete(delete_consent),
        )
        .route("/api/appointments", get(list_appointments).post(create_appointment))
        .route(
            "/api/appointments/{registro}",
            get(get_appointment)
                .put(update_appointment)
                .delete(delete_appointment),
        )
        .route("/api/ai-config", get(get_ai_config).put(update_ai_config))
        .route("/api/ai-config/reload", post(reload_ai_config))
        .route("/api/reminders/run", post(run_reminders))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "clinic-flows"
    }))
}

// ── Inbound ─────────────────────────────────────────────────────────

async fn webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> ApiResult<Value> {
    let outcome = state.processor.handle_incoming(&payload).await?;
    Ok(Json(json!(outcome)))
}

#[derive(Deserialize)]
struct ButtonClick {
    message_id: String,
    button_id: String,
}

async fn button_response(
    State(state): State<AppState>,
    Json(click): Json<ButtonClick>,
) -> ApiResult<Value> {
    let outcome = state
        .interactive
        .handle_button_response(&click.message_id, &click.button_id)
        .await?;
    Ok(Json(json!(outcome)))
}

// ── Contacts and conversations ──────────────────────────────────────

#[derive(Deserialize)]
struct SearchQuery {
    search: Option<String>,
}

async fn list_contacts(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> ApiResult<Value> {
    let search = q.search.as_deref().filter(|s| !s.trim().is_empty());
    let contacts = state.tracker.db().list_contacts(search).await?;
    Ok(Json(json!({"success": true, "contacts": contacts})))
}

#[derive(Deserialize)]
struct ColorQuery {
    color: Option<String>,
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(q): Query<ColorQuery>,
) -> ApiResult<Value> {
    let color = match q.color.as_deref().filter(|c| !c.is_empty()) {
        None => None,
        Some(raw) => match raw.parse::<ColorCode>() {
            Ok(c) => Some(c),
            Err(e) => return Ok(Json(json!(Outcome::<()>::failure(e)))),
        },
    };
    let conversations = state.classifier.conversations_by_color(color).await?;
    Ok(Json(json!({
        "success": true,
        "conversations": conversations,
    })))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    match state.tracker.db().get_conversation(&id).await? {
        Some(conversation) => Ok(Json(json!({"success": true, "conversation": conversation}))),
        None => Ok(Json(json!(Outcome::<()>::failure("Conversation not found")))),
    }
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_page_size")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_page_size() -> usize {
    50
}

async fn conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<PageQuery>,
) -> ApiResult<Value> {
    if state.tracker.db().get_conversation(&id).await?.is_none() {
        return Ok(Json(json!(Outcome::<()>::failure("Conversation not found"))));
    }
    let messages = state.tracker.history(&id, q.limit.min(500), q.offset).await?;
    Ok(Json(json!({"success": true, "messages": messages})))
}

#[derive(Deserialize)]
struct SendRequest {
    message: String,
    #[serde(default)]
    buttons: Vec<Button>,
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendRequest>,
) -> ApiResult<Value> {
    let outcome = state
        .interactive
        .send_to_conversation(&id, &body.message, body.buttons)
        .await?;
    Ok(Json(json!(outcome)))
}

async fn mark_read(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    if state.tracker.mark_read(&id).await? {
        Ok(Json(json!({"success": true, "conversation_id": id})))
    } else {
        Ok(Json(json!(Outcome::<()>::failure("Conversation not found"))))
    }
}

async fn classify_all(State(state): State<AppState>) -> ApiResult<Value> {
    let report = state.classifier.classify_all_conversations().await?;
    Ok(Json(json!(Outcome::ok(report))))
}

#[derive(Deserialize)]
struct ForceQuery {
    #[serde(default)]
    force: bool,
}

async fn classify_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ForceQuery>,
) -> ApiResult<Value> {
    let outcome = state
        .classifier
        .classify_single_conversation(&id, q.force)
        .await?;
    Ok(Json(json!(outcome)))
}

#[derive(Deserialize)]
struct ClassificationQuery {
    classification: String,
}

async fn set_classification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ClassificationQuery>,
) -> ApiResult<Value> {
    let color = match q.classification.parse::<ColorCode>() {
        Ok(c) => c,
        Err(e) => return Ok(Json(json!(Outcome::<()>::failure(e)))),
    };
    let outcome = state.classifier.set_manual_classification(&id, color).await?;
    Ok(Json(json!(outcome)))
}

async fn clear_classification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let outcome = state.classifier.clear_classification(&id).await?;
    Ok(Json(json!(outcome)))
}

// ── Flows and consent templates ─────────────────────────────────────

#[derive(Deserialize)]
struct CategoryQuery {
    category: Option<String>,
}

async fn list_flows(
    State(state): State<AppState>,
    Query(q): Query<CategoryQuery>,
) -> ApiResult<Value> {
    let flows = state.flows.list_flows(q.category.as_deref()).await?;
    Ok(Json(json!({"success": true, "flows": flows})))
}

async fn create_flow(
    State(state): State<AppState>,
    Json(input): Json<FlowInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let saved = state.flows.create_flow(input).await?;
    Ok((StatusCode::CREATED, Json(json!(Outcome::ok(saved)))))
}

async fn get_flow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    match state.flows.get_flow(&id).await? {
        Some(flow) => Ok(Json(json!({"success": true, "flow": flow}))),
        None => Ok(Json(json!(Outcome::<()>::failure("Flow not found")))),
    }
}

async fn update_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<FlowInput>,
) -> ApiResult<Value> {
    let outcome = state.flows.update_flow(&id, input).await?;
    Ok(Json(json!(outcome)))
}

async fn delete_flow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    if state.flows.delete_flow(&id).await? {
        Ok(Json(json!({"success": true, "deleted": id})))
    } else {
        Ok(Json(json!(Outcome::<()>::failure("Flow not found"))))
    }
}

async fn list_consents(State(state): State<AppState>) -> ApiResult<Value> {
    let templates = state.flows.list_consents().await?;
    Ok(Json(json!({"success": true, "templates": templates})))
}

async fn create_consent(
    State(state): State<AppState>,
    Json(input): Json<ConsentInput>,
) -> ApiResult<Value> {
    let outcome = state.flows.create_consent(input).await?;
    Ok(Json(json!(outcome)))
}

async fn get_consent(State(state): State<AppState>, Path(code): Path<String>) -> ApiResult<Value> {
    match state.flows.get_consent(&code).await? {
        Some(template) => Ok(Json(json!({"success": true, "template": template}))),
        None => Ok(Json(json!(Outcome::<()>::failure("Consent template not found")))),
    }
}

async fn update_consent(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(input): Json<ConsentInput>,
) -> ApiResult<Value> {
    let outcome = state.flows.update_consent(&code, input).await?;
    Ok(Json(json!(outcome)))
}

async fn delete_consent(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Value> {
    if state.flows.delete_consent(&code).await? {
        Ok(Json(json!({"success": true, "deleted": code})))
    } else {
        Ok(Json(json!(Outcome::<()>::failure("Consent template not found"))))
    }
}

// ── Appointments ────────────────────────────────────────────────────

async fn list_appointments(State(state): State<AppState>) -> ApiResult<Value> {
    let appointments = state.appointments.list().await?;
    Ok(Json(json!({"success": true, "appointments": appointments})))
}

async fn create_appointment(
    State(state): State<AppState>,
    Json(input): Json<AppointmentInput>,
) -> ApiResult<Value> {
    let outcome = state.appointments.create(input).await?;
    Ok(Json(json!(outcome)))
}

async fn get_appointment(
    State(state): State<AppState>,
    Path(registro): Path<String>,
) -> ApiResult<Value> {
    match state.appointments.get(&registro).await? {
        Some(appointment) => Ok(Json(json!({"success": true, "appointment": appointment}))),
        None => Ok(Json(json!(Outcome::<()>::failure("Appointment not found")))),
    }
}

async fn update_appointment(
    State(state): State<AppState>,
    Path(registro): Path<String>,
    Json(input): Json<AppointmentInput>,
) -> ApiResult<Value> {
    let outcome = state.appointments.update(&registro, input).await?;
    Ok(Json(json!(outcome)))
}

async fn delete_appointment(
    State(state): State<AppState>,
    Path(registro): Path<String>,
) -> ApiResult<Value> {
    if state.appointments.delete(&registro).await? {
        Ok(Json(json!({"success": true, "deleted": registro})))
    } else {
        Ok(Json(json!(Outcome::<()>::failure("Appointment not found"))))
    }
}

// ── AI config ───────────────────────────────────────────────────────

async fn get_ai_config(State(state): State<AppState>) -> Json<AiConfig> {
    Json(state.ai_config.snapshot().await)
}

async fn update_ai_config(
    State(state): State<AppState>,
    Json(config): Json<AiConfig>,
) -> ApiResult<Value> {
    let config = state.ai_config.update(config).await?;
    Ok(Json(json!({"success": true, "config": config})))
}

async fn reload_ai_config(State(state): State<AppState>) -> ApiResult<Value> {
    let config = state.ai_config.reload().await?;
    Ok(Json(json!({"success": true, "config": config})))
}

// ── Reminders ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RunQuery {
    /// Wait for the started flows and include their logs.
    #[serde(default)]
    wait: bool,
}

async fn run_reminders(
    State(state): State<AppState>,
    Query(q): Query<RunQuery>,
) -> Json<Value> {
    let Some(scheduler) = state.scheduler else {
        return Json(json!(Outcome::<()>::failure(
            "No appointment source configured"
        )));
    };
    let mut report = scheduler.run_tick(Utc::now()).await;
    if q.wait {
        let executions = report.wait().await;
        return Json(json!({
            "success": report.error.is_none(),
            "report": report,
            "executions": executions,
        }));
    }
    Json(json!({"success": report.error.is_none(), "report": report}))
}
