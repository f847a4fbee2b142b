use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::models::business::TimeWindow;
use crate::models::Entity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Date,
    Time,
    TimeRange,
    Duration,
    AppointmentRef,
    Subject,
}

impl SlotName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotName::Date => "date",
            SlotName::Time => "time",
            SlotName::TimeRange => "time_range",
            SlotName::Duration => "duration",
            SlotName::AppointmentRef => "appointment_ref",
            SlotName::Subject => "subject",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    Date(NaiveDate),
    Time(NaiveTime),
    TimeRange(TimeWindow),
    Duration(i64),
    Reference(AppointmentRef),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentRef {
    Id(String),
    Nth(usize),
    Last,
    Contextual,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid value {value:?} for {slot}: {reason}")]
pub struct InvalidSlotValue {
    pub slot: SlotName,
    pub value: String,
    pub reason: String,
}

impl InvalidSlotValue {
    fn new(slot: SlotName, value: &str, reason: &str) -> Self {
        Self {
            slot,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub fn parse_entity(entity: &Entity) -> Result<Vec<(SlotName, SlotValue)>, InvalidSlotValue> {
    let value = entity.value.trim();
    let is_datetime = entity
        .value_type
        .as_deref()
        .map(|t| t.eq_ignore_ascii_case("datetime"))
        .unwrap_or(false);

    match entity.slot_name.trim().to_lowercase().as_str() {
        "datetime" => parse_datetime_slots(value),
        "date" if is_datetime => parse_datetime_slots(value),
        "date" => match parse_date(value) {
            Some(date) => Ok(vec![(SlotName::Date, SlotValue::Date(date))]),
            None => Err(InvalidSlotValue::new(SlotName::Date, value, "expected YYYY-MM-DD")),
        },
        "time" => match parse_time(value) {
            Some(time) if !is_datetime => Ok(vec![(SlotName::Time, SlotValue::Time(time))]),
            _ => parse_datetime_slots(value)
                .map_err(|_| InvalidSlotValue::new(SlotName::Time, value, "expected HH:MM")),
        },
        "time_range" => parse_time_range(value)
            .map(|w| vec![(SlotName::TimeRange, SlotValue::TimeRange(w))])
            .ok_or_else(|| {
                InvalidSlotValue::new(SlotName::TimeRange, value, "expected HH:MM-HH:MM")
            }),
        "duration" => parse_duration(value)
            .map(|m| vec![(SlotName::Duration, SlotValue::Duration(m))])
            .ok_or_else(|| {
                InvalidSlotValue::new(SlotName::Duration, value, "expected a number of minutes")
            }),
        "appointment_ref" | "appointment_id" | "reference" => parse_reference(value)
            .map(|r| vec![(SlotName::AppointmentRef, SlotValue::Reference(r))])
            .ok_or_else(|| {
                InvalidSlotValue::new(SlotName::AppointmentRef, value, "empty reference")
            }),
        "subject" | "title" | "appointment_type" => {
            if value.is_empty() {
                Err(InvalidSlotValue::new(SlotName::Subject, value, "empty subject"))
            } else {
                Ok(vec![(SlotName::Subject, SlotValue::Text(value.to_string()))])
            }
        }
        other => {
            tracing::debug!(slot = other, "ignoring entity for unknown slot");
            Ok(vec![])
        }
    }
}

fn parse_datetime_slots(value: &str) -> Result<Vec<(SlotName, SlotValue)>, InvalidSlotValue> {
    let dt = parse_datetime(value).ok_or_else(|| {
        InvalidSlotValue::new(SlotName::Date, value, "expected an ISO 8601 date and time")
    })?;
    Ok(vec![
        (SlotName::Date, SlotValue::Date(dt.date())),
        (SlotName::Time, SlotValue::Time(dt.time())),
    ])
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

// Offsets are dropped: the wall-clock time the user said is what counts
fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn parse_time_range(s: &str) -> Option<TimeWindow> {
    let (start, end) = s.split_once('-')?;
    let start = parse_time(start.trim())?;
    let end = parse_time(end.trim())?;
    (start < end).then(|| TimeWindow::new(start, end))
}

fn parse_duration(s: &str) -> Option<i64> {
    let lowered = s.to_lowercase();
    let digits = ["minutes", "minute", "mins", "min", "m"]
        .iter()
        .find_map(|suffix| lowered.strip_suffix(suffix))
        .unwrap_or(lowered.as_str())
        .trim();
    digits.parse::<i64>().ok().filter(|m| *m > 0)
}

fn parse_reference(s: &str) -> Option<AppointmentRef> {
    let cleaned = s.trim().trim_start_matches('#').trim().to_lowercase();
    if cleaned.is_empty() {
        return None;
    }

    let reference = match cleaned.as_str() {
        "that one" | "that" | "it" | "this one" | "this" | "the same one" => {
            AppointmentRef::Contextual
        }
        "first" | "1st" | "the first one" => AppointmentRef::Nth(0),
        "second" | "2nd" | "the second one" => AppointmentRef::Nth(1),
        "third" | "3rd" | "the third one" => AppointmentRef::Nth(2),
        "fourth" | "4th" => AppointmentRef::Nth(3),
        "fifth" | "5th" => AppointmentRef::Nth(4),
        "last" | "the last one" => AppointmentRef::Last,
        n if n.len() <= 2 && n.chars().all(|c| c.is_ascii_digit()) => match n.parse::<usize>() {
            Ok(0) | Err(_) => AppointmentRef::Id(n.to_string()),
            Ok(index) => AppointmentRef::Nth(index - 1),
        },
        other => AppointmentRef::Id(other.to_string()),
    };
    Some(reference)
}
