use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{Local, NaiveDate};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::Slot;
use crate::state::AppState;

#[derive(Serialize)]
pub struct AvailabilityResponse {
    date: NaiveDate,
    slots: Vec<Slot>,
}

// GET /api/availability/:date
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(raw_date): Path<String>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("invalid date: {raw_date}")))?;

    let slots = state
        .sessions
        .dialogue()
        .availability()
        .free_slots(date, Local::now().naive_local(), None)
        .await?;

    Ok(Json(AvailabilityResponse { date, slots }))
}
