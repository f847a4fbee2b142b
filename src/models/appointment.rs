use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub subject: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub status: AppointmentStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    pub fn overlaps(&self, start: &NaiveDateTime, end: &NaiveDateTime) -> bool {
        self.start < *end && self.end > *start
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }
}

// The id is fixed at creation so committing the same draft twice is a no-op
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentDraft {
    pub id: String,
    pub subject: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
}

impl AppointmentDraft {
    pub fn new(subject: impl Into<String>, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject: subject.into(),
            start,
            end,
            replaces: None,
        }
    }

    pub fn replacing(mut self, previous_id: impl Into<String>) -> Self {
        self.replaces = Some(previous_id.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceHint {
    pub id_prefix: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub subject: Option<String>,
    pub not_before: Option<NaiveDateTime>,
}

impl ReferenceHint {
    pub fn is_empty(&self) -> bool {
        self.id_prefix.is_none() && self.date.is_none() && self.time.is_none() && self.subject.is_none()
    }
}
