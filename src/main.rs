use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clinic_flows::api::{self, AppState};
use clinic_flows::channels::{GatewayTransport, Transport};
use clinic_flows::config::{
    AiConfigHandle, EngineConfig, GatewayConfig, ReminderConfig, ServerConfig, SheetsConfig,
};
use clinic_flows::conversations::{ConversationClassifier, ConversationTracker};
use clinic_flows::flows::{ActionDispatcher, FlowExecutor, FlowService, InteractiveMessages};
use clinic_flows::llm::{LlmConfig, RigResponder, RigUrgencyModel};
use clinic_flows::pipeline::{
    InboundProcessor, KeywordClassifier, WhisperConfig, WhisperTranscriber,
};
use clinic_flows::reminders::{
    AppointmentBook, AppointmentSource, ReminderScheduler, SheetsSource,
    StoreAppointmentSource, spawn_reminder_ticker,
};
use clinic_flows::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let engine = EngineConfig::from_env();

    // Initialize tracing; a log directory switches output to a daily file.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _log_guard = match &engine.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "clinic-flows.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    };

    let gateway = GatewayConfig::from_env()?;
    let reminders = ReminderConfig::from_env()?;
    let sheets = SheetsConfig::from_env()?;
    let server = ServerConfig::from_env();
    let llm = LlmConfig::from_env();

    eprintln!("🦷 Clinic Flows v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://{}", server.bind_addr());
    eprintln!("   Gateway: {}", gateway.base_url);
    eprintln!("   Database: {}", engine.db_path.display());
    match &llm {
        Some(c) => eprintln!("   LLM: {}", c.model),
        None => eprintln!("   LLM: disabled (OPENROUTER_API_KEY not set)"),
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&engine.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", engine.db_path.display()))?,
    );
    let ai_config = AiConfigHandle::load(Arc::clone(&db)).await?;

    // ── Components ───────────────────────────────────────────────────────
    let transport: Arc<dyn Transport> = Arc::new(GatewayTransport::new(gateway));
    let tracker = ConversationTracker::new(Arc::clone(&db));

    let mut classifier = ConversationClassifier::new(
        Arc::clone(&db),
        KeywordClassifier::default_rules(),
    )
    .with_window(engine.classification_window, engine.classify_lookback);
    if let (Some(cfg), true) = (&llm, engine.llm_classifier_fallback) {
        classifier = classifier.with_model(Arc::new(RigUrgencyModel::new(cfg)?));
        eprintln!("   Classifier: keywords + LLM fallback");
    }
    let classifier = Arc::new(classifier);

    let mut processor = InboundProcessor::new(
        tracker.clone(),
        Arc::clone(&classifier),
        ai_config.clone(),
        Arc::clone(&transport),
    );
    if let Some(cfg) = &llm {
        processor = processor.with_responder(Arc::new(RigResponder::new(cfg)?));
    }
    match WhisperConfig::from_env() {
        Some(cfg) => processor = processor.with_transcriber(Arc::new(WhisperTranscriber::new(cfg))),
        None => warn!("OPENAI_API_KEY not set, voice notes will not be transcribed"),
    }

    let dispatcher = Arc::new(ActionDispatcher::new(Arc::clone(&db), Arc::clone(&transport)));
    let executor = FlowExecutor::new(Arc::clone(&dispatcher));
    let interactive = Arc::new(InteractiveMessages::new(Arc::clone(&db), dispatcher));

    // ── Reminders ────────────────────────────────────────────────────────
    let source: Arc<dyn AppointmentSource> = match sheets {
        Some(cfg) => {
            eprintln!("   Appointments: Google Sheets ({})", cfg.spreadsheet_id);
            Arc::new(SheetsSource::new(cfg, reminders.offset()))
        }
        None => {
            eprintln!("   Appointments: local store");
            Arc::new(StoreAppointmentSource::new(Arc::clone(&db), reminders.offset()))
        }
    };
    let poll_interval = reminders.poll_interval;
    let enabled = reminders.enabled;
    let scheduler = Arc::new(ReminderScheduler::new(
        Arc::clone(&db),
        source,
        executor,
        reminders,
    ));
    let _ticker = if enabled {
        eprintln!("   Reminders: every {}s", poll_interval.as_secs());
        Some(spawn_reminder_ticker(Arc::clone(&scheduler), poll_interval))
    } else {
        eprintln!("   Reminders: disabled");
        None
    };

    // ── HTTP ─────────────────────────────────────────────────────────────
    let state = AppState {
        tracker,
        classifier,
        processor,
        interactive,
        flows: FlowService::new(Arc::clone(&db)),
        ai_config,
        appointments: AppointmentBook::new(Arc::clone(&db)),
        scheduler: Some(scheduler),
    };
    let app = api::routes(state);

    let listener = tokio::net::TcpListener::bind(server.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", server.bind_addr()))?;
    info!(addr = %server.bind_addr(), "Clinic Flows listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
