use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::errors::RuleViolation;
use crate::models::{Appointment, BusinessConfig, Slot};

#[derive(Debug, Clone)]
pub struct RuleEngine {
    config: Arc<BusinessConfig>,
}

impl RuleEngine {
    pub fn new(config: Arc<BusinessConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BusinessConfig {
        &self.config
    }

    pub fn slot_at(&self, date: NaiveDate, time: NaiveTime) -> Slot {
        let start = date.and_time(time);
        Slot {
            start,
            end: start + self.config.slot_duration(),
        }
    }

    pub fn check(&self, slot: &Slot, now: NaiveDateTime) -> Result<(), RuleViolation> {
        let date = slot.date();
        self.check_date(date, now)?;

        let Some(hours) = self.config.working_hours_on(date) else {
            return Err(RuleViolation::NonWorkingDay);
        };

        if slot.end.date() != date
            || slot.start.time() < hours.start
            || slot.end.time() > hours.end
        {
            return Err(RuleViolation::OutsideWorkingHours);
        }

        if self
            .config
            .lunch_breaks
            .iter()
            .any(|lunch| lunch.overlaps(slot.start.time(), slot.end.time()))
        {
            return Err(RuleViolation::LunchBreak);
        }

        let step = self.config.slot_duration().num_seconds();
        let offset = (slot.start.time() - hours.start).num_seconds();
        if offset % step != 0 || slot.end - slot.start != self.config.slot_duration() {
            return Err(RuleViolation::Misaligned);
        }

        if slot.start < now + Duration::minutes(self.config.min_lead_time_minutes) {
            return Err(RuleViolation::BelowLeadTime);
        }

        if slot.start > now + Duration::days(self.config.booking_horizon_days) {
            return Err(RuleViolation::BeyondHorizon);
        }

        Ok(())
    }

    pub fn check_date(&self, date: NaiveDate, now: NaiveDateTime) -> Result<(), RuleViolation> {
        if self.config.non_working_dates.contains(&date) {
            return Err(RuleViolation::NonWorkingDate);
        }
        if self.config.working_hours(date.weekday()).is_none() {
            return Err(RuleViolation::NonWorkingDay);
        }
        if date > self.last_bookable_date(now) {
            return Err(RuleViolation::BeyondHorizon);
        }
        Ok(())
    }

    pub fn is_legal(&self, slot: &Slot, now: NaiveDateTime) -> bool {
        self.check(slot, now).is_ok()
    }

    pub fn grid(&self, date: NaiveDate) -> Vec<Slot> {
        let Some(hours) = self.config.working_hours_on(date) else {
            return vec![];
        };

        let duration = self.config.slot_duration();
        let close = date.and_time(hours.end);
        let mut slots = vec![];
        let mut start = date.and_time(hours.start);
        while start + duration <= close {
            slots.push(Slot {
                start,
                end: start + duration,
            });
            start += duration;
        }
        slots
    }

    pub fn enumerate_legal_slots(&self, date: NaiveDate, now: NaiveDateTime) -> Vec<Slot> {
        self.grid(date)
            .into_iter()
            .filter(|slot| self.is_legal(slot, now))
            .collect()
    }

    // Why nothing on `date` can be booked, if that is the case
    pub fn closed_day(&self, date: NaiveDate, now: NaiveDateTime) -> Option<RuleViolation> {
        if let Err(violation) = self.check_date(date, now) {
            return Some(violation);
        }
        let grid = self.grid(date);
        if grid.iter().any(|slot| self.is_legal(slot, now)) {
            return None;
        }
        // The last slot of the day fails for the reason that closes it
        Some(
            grid.last()
                .and_then(|slot| self.check(slot, now).err())
                .unwrap_or(RuleViolation::OutsideWorkingHours),
        )
    }

    pub fn check_occupancy(
        &self,
        slot: &Slot,
        occupied: &[Appointment],
    ) -> Result<(), RuleViolation> {
        if occupied.iter().any(|a| slot.overlaps(a)) {
            return Err(RuleViolation::Occupied);
        }

        if self.config.min_gap_minutes > 0 {
            let gap = Duration::minutes(self.config.min_gap_minutes);
            if occupied
                .iter()
                .any(|a| a.overlaps(&(slot.start - gap), &(slot.end + gap)))
            {
                return Err(RuleViolation::TooCloseToAnother);
            }
        }

        if let Some(max) = self.config.max_appointments_per_day {
            let booked = occupied
                .iter()
                .filter(|a| a.start.date() == slot.date())
                .count();
            if booked >= max as usize {
                return Err(RuleViolation::DailyLimitReached);
            }
        }

        Ok(())
    }

    pub fn last_bookable_date(&self, now: NaiveDateTime) -> NaiveDate {
        (now + Duration::days(self.config.booking_horizon_days)).date()
    }
}
