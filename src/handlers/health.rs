use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
    business_hours: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.sessions.active_sessions(),
        business_hours: state
            .sessions
            .dialogue()
            .rules()
            .config()
            .to_human_readable(),
    })
}
