use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::retry_once;
use crate::errors::AppError;
use crate::models::{Appointment, AppointmentStatus};
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// GET /api/appointments
#[derive(Deserialize)]
pub struct AppointmentsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct AppointmentsResponse {
    appointments: Vec<Appointment>,
}

pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<AppointmentsResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let status = match query.status.as_deref() {
        None | Some("") | Some("all") => None,
        Some(s) => Some(
            AppointmentStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status: {s}")))?,
        ),
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let appointments = state.store.list(status, limit).await?;
    Ok(Json(AppointmentsResponse { appointments }))
}

// POST /api/appointments/:id/cancel
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let appointment = retry_once("cancel", || state.store.cancel(&id)).await?;
    tracing::info!(appointment_id = %id, "appointment cancelled by admin");
    Ok(Json(appointment))
}
