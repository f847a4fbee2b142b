use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::db::{retry_once, CalendarStore};
use crate::errors::{RuleViolation, StoreError};
use crate::models::{Appointment, Slot, TimeWindow};
use crate::services::rules::RuleEngine;

#[derive(Debug, thiserror::Error)]
pub enum AvailabilityError {
    #[error(transparent)]
    Rule(#[from] RuleViolation),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct AvailabilityService {
    rules: RuleEngine,
    store: Arc<dyn CalendarStore>,
}

impl AvailabilityService {
    pub fn new(rules: RuleEngine, store: Arc<dyn CalendarStore>) -> Self {
        Self { rules, store }
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub async fn check_slot(
        &self,
        slot: &Slot,
        now: NaiveDateTime,
        exclude: Option<&str>,
    ) -> Result<(), AvailabilityError> {
        self.rules.check(slot, now)?;
        let occupied = self.occupied_between(slot.date(), slot.date(), exclude).await?;
        self.rules.check_occupancy(slot, &occupied)?;
        Ok(())
    }

    pub async fn free_slots(
        &self,
        date: NaiveDate,
        now: NaiveDateTime,
        exclude: Option<&str>,
    ) -> Result<Vec<Slot>, StoreError> {
        let legal = self.rules.enumerate_legal_slots(date, now);
        if legal.is_empty() {
            return Ok(legal);
        }
        let occupied = self.occupied_between(date, date, exclude).await?;
        Ok(self.without_occupied(legal, &occupied))
    }

    pub async fn first_free_in(
        &self,
        date: NaiveDate,
        window: TimeWindow,
        now: NaiveDateTime,
        exclude: Option<&str>,
    ) -> Result<Option<Slot>, StoreError> {
        let free = self.free_slots(date, now, exclude).await?;
        Ok(free
            .into_iter()
            .find(|s| s.start.time() >= window.start && s.end.time() <= window.end))
    }

    // Same-day slots nearest to `preferred` first (earlier wins a tie), then later days in order
    pub async fn find_alternatives(
        &self,
        date: NaiveDate,
        preferred: Option<NaiveTime>,
        limit: usize,
        now: NaiveDateTime,
        exclude: Option<&str>,
    ) -> Result<Vec<Slot>, StoreError> {
        let first = date.max(now.date());
        let last = self.rules.last_bookable_date(now);
        if first > last || limit == 0 {
            return Ok(vec![]);
        }

        let occupied = self.occupied_between(first, last, exclude).await?;

        let mut found = vec![];
        let mut day = first;
        while day <= last && found.len() < limit {
            let mut free = self.without_occupied(self.rules.enumerate_legal_slots(day, now), &occupied);

            if let (true, Some(time)) = (day == date, preferred) {
                let target = day.and_time(time);
                free.sort_by_key(|s| ((s.start - target).num_minutes().abs(), s.start));
            }

            let wanted = limit - found.len();
            found.extend(free.into_iter().take(wanted));

            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        Ok(found)
    }

    fn without_occupied(&self, slots: Vec<Slot>, occupied: &[Appointment]) -> Vec<Slot> {
        slots
            .into_iter()
            .filter(|s| self.rules.check_occupancy(s, occupied).is_ok())
            .collect()
    }

    async fn occupied_between(
        &self,
        first: NaiveDate,
        last: NaiveDate,
        exclude: Option<&str>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let gap = Duration::minutes(self.rules.config().min_gap_minutes);
        let from = first.and_time(NaiveTime::MIN) - gap;
        let to = last.and_time(NaiveTime::MIN) + Duration::days(1) + gap;

        let mut occupied =
            retry_once("query_occupied", || self.store.query_occupied(from, to)).await?;
        if let Some(id) = exclude {
            occupied.retain(|a| a.id != id);
        }
        Ok(occupied)
    }
}
