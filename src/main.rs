use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use schedulebot::config::AppConfig;
use schedulebot::db::{CalendarStore, SqliteCalendarStore};
use schedulebot::handlers;
use schedulebot::models::BusinessConfig;
use schedulebot::services::dialogue::DialogueManager;
use schedulebot::services::rules::RuleEngine;
use schedulebot::services::sessions::{spawn_sweeper, SessionManager};
use schedulebot::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let business = match &config.business_config_path {
        Some(path) => {
            tracing::info!("loading business rules from {path}");
            BusinessConfig::load(path)?
        }
        None => {
            tracing::info!("BUSINESS_CONFIG not set, using default business rules");
            BusinessConfig::default()
        }
    };
    tracing::info!("business hours: {}", business.to_human_readable());

    let store: Arc<dyn CalendarStore> =
        Arc::new(SqliteCalendarStore::open(&config.database_url)?.with_limits(&business));
    let rules = RuleEngine::new(Arc::new(business));
    let dialogue = DialogueManager::new(rules, store.clone(), config.dialogue.clone());
    let sessions = Arc::new(SessionManager::new(
        dialogue,
        chrono::Duration::minutes(config.session_idle_timeout_minutes),
    ));

    spawn_sweeper(
        sessions.clone(),
        std::time::Duration::from_secs(config.session_sweep_interval_secs),
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        sessions,
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
