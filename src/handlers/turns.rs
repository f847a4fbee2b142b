use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::errors::AppError;
use crate::models::{Action, NluResult};
use crate::state::AppState;

const MAX_SESSION_ID_LEN: usize = 128;

fn validate_session_id(session_id: &str) -> Result<(), AppError> {
    if session_id.trim().is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        return Err(AppError::BadRequest("invalid session id".to_string()));
    }
    Ok(())
}

// POST /api/sessions/:session_id/turns
pub async fn post_turn(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(input): Json<NluResult>,
) -> Result<Json<Action>, AppError> {
    validate_session_id(&session_id)?;
    let action = state.sessions.process_turn(&session_id, &input).await;
    Ok(Json(action))
}

// DELETE /api/sessions/:session_id
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.sessions.end_session(&session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("session {session_id}")))
    }
}
