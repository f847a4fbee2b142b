use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};

use crate::db::{self, queries};
use crate::errors::StoreError;
use crate::models::{
    Appointment, AppointmentDraft, AppointmentStatus, BusinessConfig, ReferenceHint,
};

#[async_trait]
pub trait CalendarStore: Send + Sync {
    // A draft that is already committed returns the stored row
    async fn try_insert(&self, draft: &AppointmentDraft) -> Result<Appointment, StoreError>;

    async fn cancel(&self, id: &str) -> Result<Appointment, StoreError>;

    async fn reschedule(
        &self,
        previous_id: &str,
        draft: &AppointmentDraft,
    ) -> Result<Appointment, StoreError>;

    async fn query_occupied(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn find_by_fuzzy_reference(
        &self,
        hint: &ReferenceHint,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Appointment>, StoreError>;

    async fn list(
        &self,
        status: Option<AppointmentStatus>,
        limit: i64,
    ) -> Result<Vec<Appointment>, StoreError>;
}

pub async fn retry_once<T, F, Fut>(operation: &str, mut call: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match call().await {
        Err(e) if e.is_transient() => {
            tracing::warn!(operation, error = %e, "transient store failure, retrying once");
            call().await
        }
        other => other,
    }
}

pub struct SqliteCalendarStore {
    conn: Arc<Mutex<Connection>>,
    min_gap: Duration,
    max_per_day: Option<u32>,
}

impl SqliteCalendarStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            min_gap: Duration::zero(),
            max_per_day: None,
        }
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(db::init_db(path)?))
    }

    // Spacing and daily cap are re-checked inside the write transaction
    pub fn with_limits(mut self, business: &BusinessConfig) -> Self {
        self.min_gap = Duration::minutes(business.min_gap_minutes.max(0));
        self.max_per_day = business.max_appointments_per_day;
        self
    }

    fn check_commit(
        &self,
        conn: &Connection,
        draft: &AppointmentDraft,
        exclude: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(clash) = queries::find_overlapping(conn, &draft.start, &draft.end, exclude)? {
            tracing::info!(draft_id = %draft.id, existing = %clash.id, "slot taken at commit");
            return Err(StoreError::Conflict { existing: clash.id });
        }

        if self.min_gap > Duration::zero() {
            let from = draft.start - self.min_gap;
            let to = draft.end + self.min_gap;
            if let Some(clash) = queries::find_overlapping(conn, &from, &to, exclude)? {
                tracing::info!(draft_id = %draft.id, existing = %clash.id, "too close to another appointment at commit");
                return Err(StoreError::Conflict { existing: clash.id });
            }
        }

        if let Some(max) = self.max_per_day {
            let booked = queries::confirmed_ids_on(conn, &draft.start.date(), exclude)?;
            if booked.len() >= max as usize {
                tracing::info!(draft_id = %draft.id, booked = booked.len(), "daily limit reached at commit");
                return Err(StoreError::Conflict {
                    existing: booked.last().cloned().unwrap_or_default(),
                });
            }
        }

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("calendar store lock poisoned".to_string()))
    }
}

fn confirmed_from(draft: &AppointmentDraft) -> Appointment {
    let now = Utc::now().naive_utc();
    Appointment {
        id: draft.id.clone(),
        subject: draft.subject.clone(),
        start: draft.start,
        end: draft.end,
        status: AppointmentStatus::Confirmed,
        created_at: now,
        updated_at: now,
    }
}

fn already_committed(
    conn: &Connection,
    draft: &AppointmentDraft,
) -> Result<Option<Appointment>, StoreError> {
    match queries::get_appointment(conn, &draft.id)? {
        Some(existing)
            if existing.status == AppointmentStatus::Confirmed
                && existing.start == draft.start
                && existing.end == draft.end =>
        {
            Ok(Some(existing))
        }
        Some(existing) => Err(StoreError::Conflict {
            existing: existing.id,
        }),
        None => Ok(None),
    }
}

#[async_trait]
impl CalendarStore for SqliteCalendarStore {
    async fn try_insert(&self, draft: &AppointmentDraft) -> Result<Appointment, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = already_committed(&tx, draft)? {
            tracing::debug!(appointment_id = %existing.id, "draft already committed");
            return Ok(existing);
        }

        self.check_commit(&tx, draft, None)?;

        let appointment = confirmed_from(draft);
        queries::insert_appointment(&tx, &appointment)?;
        tx.commit()?;

        tracing::info!(
            appointment_id = %appointment.id,
            start = %appointment.start,
            "appointment booked"
        );
        Ok(appointment)
    }

    async fn cancel(&self, id: &str) -> Result<Appointment, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut appointment = match queries::get_appointment(&tx, id)? {
            Some(a) if a.status == AppointmentStatus::Confirmed => a,
            _ => return Err(StoreError::NotFound(id.to_string())),
        };

        queries::set_status(&tx, id, AppointmentStatus::Cancelled)?;
        tx.commit()?;

        appointment.status = AppointmentStatus::Cancelled;
        appointment.updated_at = Utc::now().naive_utc();
        tracing::info!(appointment_id = %id, "appointment cancelled");
        Ok(appointment)
    }

    async fn reschedule(
        &self,
        previous_id: &str,
        draft: &AppointmentDraft,
    ) -> Result<Appointment, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = already_committed(&tx, draft)? {
            tracing::debug!(appointment_id = %existing.id, "reschedule already committed");
            return Ok(existing);
        }

        match queries::get_appointment(&tx, previous_id)? {
            Some(a) if a.status == AppointmentStatus::Confirmed => {}
            _ => return Err(StoreError::NotFound(previous_id.to_string())),
        }

        self.check_commit(&tx, draft, Some(previous_id))?;

        queries::set_status(&tx, previous_id, AppointmentStatus::Cancelled)?;
        let appointment = confirmed_from(draft);
        queries::insert_appointment(&tx, &appointment)?;
        tx.commit()?;

        tracing::info!(
            appointment_id = %appointment.id,
            replaced = %previous_id,
            start = %appointment.start,
            "appointment rescheduled"
        );
        Ok(appointment)
    }

    async fn query_occupied(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Appointment>, StoreError> {
        let conn = self.lock()?;
        Ok(queries::appointments_in_range(&conn, &from, &to)?)
    }

    async fn find_by_fuzzy_reference(
        &self,
        hint: &ReferenceHint,
    ) -> Result<Vec<Appointment>, StoreError> {
        let conn = self.lock()?;
        Ok(queries::search_appointments(&conn, hint)?)
    }

    async fn get(&self, id: &str) -> Result<Option<Appointment>, StoreError> {
        let conn = self.lock()?;
        Ok(queries::get_appointment(&conn, id)?)
    }

    async fn list(
        &self,
        status: Option<AppointmentStatus>,
        limit: i64,
    ) -> Result<Vec<Appointment>, StoreError> {
        let conn = self.lock()?;
        Ok(queries::list_appointments(&conn, status, limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn store() -> SqliteCalendarStore {
        SqliteCalendarStore::open(":memory:").unwrap()
    }

    fn draft(start: &str) -> AppointmentDraft {
        let start = at(start);
        AppointmentDraft::new("Dentist", start, start + chrono::Duration::minutes(30))
    }

    #[tokio::test]
    async fn test_try_insert_rejects_overlap() {
        let store = store();
        store.try_insert(&draft("2025-06-18 10:00")).await.unwrap();

        let err = store.try_insert(&draft("2025-06-18 10:00")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // Adjacent slot is fine
        store.try_insert(&draft("2025-06-18 10:30")).await.unwrap();
    }

    #[tokio::test]
    async fn test_try_insert_enforces_min_gap() {
        let mut business = BusinessConfig::default();
        business.min_gap_minutes = 15;
        let store = store().with_limits(&business);
        let first = store.try_insert(&draft("2025-06-18 10:00")).await.unwrap();

        let err = store.try_insert(&draft("2025-06-18 10:30")).await.unwrap_err();
        match err {
            StoreError::Conflict { existing } => assert_eq!(existing, first.id),
            other => panic!("expected conflict, got {other:?}"),
        }
        store.try_insert(&draft("2025-06-18 11:00")).await.unwrap();
    }

    #[tokio::test]
    async fn test_try_insert_enforces_daily_limit() {
        let mut business = BusinessConfig::default();
        business.max_appointments_per_day = Some(1);
        let store = store().with_limits(&business);
        let first = store.try_insert(&draft("2025-06-18 10:00")).await.unwrap();

        let err = store.try_insert(&draft("2025-06-18 15:00")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        store.try_insert(&draft("2025-06-19 15:00")).await.unwrap();

        // Moving the day's only appointment does not count against itself
        let moved = draft("2025-06-18 15:00").replacing(first.id.clone());
        let new = store.reschedule(&first.id, &moved).await.unwrap();
        assert_eq!(new.start, at("2025-06-18 15:00"));
    }

    #[tokio::test]
    async fn test_try_insert_is_idempotent_per_draft() {
        let store = store();
        let d = draft("2025-06-18 10:00");
        let first = store.try_insert(&d).await.unwrap();
        let second = store.try_insert(&d).await.unwrap();
        assert_eq!(first.id, second.id);

        let all = store.list(None, 10).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_keeps_row_and_frees_slot() {
        let store = store();
        let booked = store.try_insert(&draft("2025-06-18 10:00")).await.unwrap();

        let cancelled = store.cancel(&booked.id).await.unwrap();
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

        // Cancelling twice is NotFound
        let err = store.cancel(&booked.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let occupied = store
            .query_occupied(at("2025-06-18 00:00"), at("2025-06-19 00:00"))
            .await
            .unwrap();
        assert!(occupied.is_empty());
        let kept = store.get(&booked.id).await.unwrap().unwrap();
        assert_eq!(kept.status, AppointmentStatus::Cancelled);

        // The freed interval can be booked again
        let rebooked = store.try_insert(&draft("2025-06-18 10:00")).await.unwrap();
        assert_ne!(rebooked.id, booked.id);
        assert_eq!(rebooked.status, AppointmentStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_reschedule_is_atomic() {
        let store = store();
        let original = store.try_insert(&draft("2025-06-18 10:00")).await.unwrap();
        store.try_insert(&draft("2025-06-18 14:00")).await.unwrap();

        // Moving onto another booking leaves the original untouched
        let blocked = draft("2025-06-18 14:00").replacing(original.id.clone());
        let err = store.reschedule(&original.id, &blocked).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        let still = store.get(&original.id).await.unwrap().unwrap();
        assert_eq!(still.status, AppointmentStatus::Confirmed);

        // Moving by a quarter hour over its own slot is allowed
        let moved = draft("2025-06-18 10:15").replacing(original.id.clone());
        let new = store.reschedule(&original.id, &moved).await.unwrap();
        assert_eq!(new.start, at("2025-06-18 10:15"));
        let old = store.get(&original.id).await.unwrap().unwrap();
        assert_eq!(old.status, AppointmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_retry_once_only_for_transient_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), StoreError> = retry_once("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Unavailable("busy".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let calls = AtomicUsize::new(0);
        let result: Result<(), StoreError> = retry_once("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::NotFound("x".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
