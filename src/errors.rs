use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RuleViolation {
    #[error("that day is not a working day")]
    NonWorkingDay,
    #[error("the business is closed on that date")]
    NonWorkingDate,
    #[error("that time is outside working hours")]
    OutsideWorkingHours,
    #[error("that time falls within the lunch break")]
    LunchBreak,
    #[error("appointments can only start on the slot grid")]
    Misaligned,
    #[error("that time is too soon to book")]
    BelowLeadTime,
    #[error("that date is beyond the booking horizon")]
    BeyondHorizon,
    #[error("that time slot is already booked")]
    Occupied,
    #[error("that time is too close to another appointment")]
    TooCloseToAnother,
    #[error("the maximum number of appointments for that day has been reached")]
    DailyLimitReached,
    #[error("there is no free slot in the requested time range")]
    NoFreeSlotInRange,
}

impl RuleViolation {
    pub fn rejects_date(&self) -> bool {
        matches!(
            self,
            RuleViolation::NonWorkingDay
                | RuleViolation::NonWorkingDate
                | RuleViolation::BeyondHorizon
                | RuleViolation::DailyLimitReached
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("slot conflicts with appointment {existing}")]
    Conflict { existing: String },

    #[error("appointment not found: {0}")]
    NotFound(String),

    #[error("calendar store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(rusqlite::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Unavailable(e.to_string())
            }
            _ => StoreError::Database(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
            AppError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(StoreError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_database_is_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(StoreError::from(busy).is_transient());

        let other = rusqlite::Error::QueryReturnedNoRows;
        assert!(!StoreError::from(other).is_transient());
    }

    #[test]
    fn test_rule_violation_serializes_snake_case() {
        let json = serde_json::to_string(&RuleViolation::Misaligned).unwrap();
        assert_eq!(json, "\"misaligned\"");
        assert!(RuleViolation::NonWorkingDay.rejects_date());
        assert!(!RuleViolation::LunchBreak.rejects_date());
    }
}
