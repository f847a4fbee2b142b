pub mod appointments;
pub mod availability;
pub mod calendar;
pub mod health;
pub mod turns;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/sessions/:session_id/turns", post(turns::post_turn))
        .route("/api/sessions/:session_id", delete(turns::end_session))
        .route("/api/availability/:date", get(availability::get_availability))
        .route("/api/appointments", get(appointments::list_appointments))
        .route(
            "/api/appointments/:id/cancel",
            post(appointments::cancel_appointment),
        )
        .route("/calendar/:appointment_id", get(calendar::download_ics))
        .with_state(state)
}
