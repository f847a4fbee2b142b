use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::models::Appointment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Slot {
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn overlaps(&self, appointment: &Appointment) -> bool {
        appointment.overlaps(&self.start, &self.end)
    }
}
