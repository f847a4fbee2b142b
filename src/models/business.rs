use std::collections::BTreeSet;

use anyhow::Context;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        start < self.end && end > self.start
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusinessConfig {
    pub slot_duration_minutes: i64,
    working_hours: [Option<TimeWindow>; 7],
    pub lunch_breaks: Vec<TimeWindow>,
    pub non_working_dates: BTreeSet<NaiveDate>,
    pub booking_horizon_days: i64,
    pub min_lead_time_minutes: i64,
    pub min_gap_minutes: i64,
    pub max_appointments_per_day: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawDayHours {
    day: String,
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct RawWindow {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct RawBusinessConfig {
    slot_duration_minutes: i64,
    working_hours: Vec<RawDayHours>,
    #[serde(default)]
    lunch_breaks: Vec<RawWindow>,
    #[serde(default)]
    non_working_days: Vec<String>,
    #[serde(default)]
    non_working_dates: Vec<String>,
    #[serde(default = "default_horizon_days")]
    booking_horizon_days: i64,
    #[serde(default)]
    min_lead_time_minutes: i64,
    #[serde(default)]
    min_gap_minutes: i64,
    #[serde(default)]
    max_appointments_per_day: Option<u32>,
}

fn default_horizon_days() -> i64 {
    30
}

impl Default for BusinessConfig {
    fn default() -> Self {
        let hours = TimeWindow::new(hm(9, 0), hm(17, 0));
        Self {
            slot_duration_minutes: 30,
            working_hours: [
                Some(hours),
                Some(hours),
                Some(hours),
                Some(hours),
                Some(hours),
                None,
                None,
            ],
            lunch_breaks: vec![TimeWindow::new(hm(12, 0), hm(13, 0))],
            non_working_dates: BTreeSet::new(),
            booking_horizon_days: default_horizon_days(),
            min_lead_time_minutes: 60,
            min_gap_minutes: 0,
            max_appointments_per_day: None,
        }
    }
}

impl BusinessConfig {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let raw: RawBusinessConfig = serde_json::from_str(s)?;

        let mut working_hours: [Option<TimeWindow>; 7] = [None; 7];
        for entry in &raw.working_hours {
            let day = parse_weekday(&entry.day)?;
            let idx = day.num_days_from_monday() as usize;
            if working_hours[idx].is_some() {
                anyhow::bail!("duplicate working hours for {}", entry.day);
            }
            working_hours[idx] = Some(TimeWindow::new(
                parse_time(&entry.start)?,
                parse_time(&entry.end)?,
            ));
        }

        for day in &raw.non_working_days {
            let day = parse_weekday(day)?;
            working_hours[day.num_days_from_monday() as usize] = None;
        }

        let lunch_breaks = raw
            .lunch_breaks
            .iter()
            .map(|w| Ok(TimeWindow::new(parse_time(&w.start)?, parse_time(&w.end)?)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let non_working_dates = raw
            .non_working_dates
            .iter()
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .with_context(|| format!("invalid non-working date: {d}"))
            })
            .collect::<anyhow::Result<BTreeSet<_>>>()?;

        let config = Self {
            slot_duration_minutes: raw.slot_duration_minutes,
            working_hours,
            lunch_breaks,
            non_working_dates,
            booking_horizon_days: raw.booking_horizon_days,
            min_lead_time_minutes: raw.min_lead_time_minutes,
            min_gap_minutes: raw.min_gap_minutes,
            max_appointments_per_day: raw.max_appointments_per_day,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read business config: {path}"))?;
        Self::from_json(&json).with_context(|| format!("invalid business config: {path}"))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.slot_duration_minutes <= 0 {
            anyhow::bail!("slot duration must be positive");
        }
        if self.booking_horizon_days < 0 || self.min_lead_time_minutes < 0 || self.min_gap_minutes < 0 {
            anyhow::bail!("horizon, lead time and gap must not be negative");
        }

        for (day, window) in self.working_days() {
            if window.start >= window.end {
                anyhow::bail!("working hours for {day} end before they start");
            }
            if window.minutes() % self.slot_duration_minutes != 0 {
                anyhow::bail!(
                    "slot duration of {} minutes does not divide working hours for {day}",
                    self.slot_duration_minutes
                );
            }
            for lunch in &self.lunch_breaks {
                if !window.contains(lunch) {
                    anyhow::bail!("lunch break is not inside working hours for {day}");
                }
            }
        }

        for lunch in &self.lunch_breaks {
            if lunch.start >= lunch.end {
                anyhow::bail!("lunch break ends before it starts");
            }
        }

        Ok(())
    }

    pub fn slot_duration(&self) -> Duration {
        Duration::minutes(self.slot_duration_minutes)
    }

    pub fn working_hours(&self, day: Weekday) -> Option<TimeWindow> {
        self.working_hours[day.num_days_from_monday() as usize]
    }

    pub fn working_hours_on(&self, date: NaiveDate) -> Option<TimeWindow> {
        if self.non_working_dates.contains(&date) {
            return None;
        }
        self.working_hours(date.weekday())
    }

    pub fn working_days(&self) -> impl Iterator<Item = (Weekday, TimeWindow)> + '_ {
        WEEKDAYS
            .iter()
            .filter_map(|day| self.working_hours(*day).map(|w| (*day, w)))
    }

    pub fn to_human_readable(&self) -> String {
        let mut parts: Vec<String> = self
            .working_days()
            .map(|(day, w)| {
                format!("{day}: {}-{}", w.start.format("%H:%M"), w.end.format("%H:%M"))
            })
            .collect();

        if !self.lunch_breaks.is_empty() {
            let lunch = self
                .lunch_breaks
                .iter()
                .map(|w| format!("{}-{}", w.start.format("%H:%M"), w.end.format("%H:%M")))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("lunch {lunch}"));
        }

        parts.join(", ")
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn parse_weekday(s: &str) -> anyhow::Result<Weekday> {
    match s.to_lowercase().as_str() {
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        "sun" | "sunday" => Ok(Weekday::Sun),
        _ => Err(anyhow::anyhow!("invalid weekday: {s}")),
    }
}

fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| anyhow::anyhow!("invalid time: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEEKDAY_JSON: &str = r#"{
        "slot_duration_minutes": 30,
        "working_hours": [
            {"day":"mon","start":"09:00","end":"17:00"},
            {"day":"tue","start":"09:00","end":"17:00"},
            {"day":"wed","start":"09:00","end":"17:00"},
            {"day":"thu","start":"09:00","end":"17:00"},
            {"day":"fri","start":"09:00","end":"17:00"}
        ],
        "lunch_breaks": [{"start":"12:00","end":"13:00"}],
        "non_working_dates": ["2025-12-25"],
        "booking_horizon_days": 14,
        "min_lead_time_minutes": 120
    }"#;

    #[test]
    fn test_parse_valid_json() {
        let config = BusinessConfig::from_json(WEEKDAY_JSON).unwrap();
        assert_eq!(config.slot_duration_minutes, 30);
        assert_eq!(config.booking_horizon_days, 14);
        assert_eq!(config.min_lead_time_minutes, 120);
        assert_eq!(config.min_gap_minutes, 0);
        assert!(config.working_hours(Weekday::Mon).is_some());
        assert!(config.working_hours(Weekday::Sat).is_none());
        assert_eq!(config.lunch_breaks.len(), 1);
    }

    #[test]
    fn test_non_working_date_has_no_hours() {
        let config = BusinessConfig::from_json(WEEKDAY_JSON).unwrap();
        // 2025-12-25 is a Thursday
        let christmas = NaiveDate::from_ymd_opt(2025, 12, 25).unwrap();
        assert!(config.working_hours_on(christmas).is_none());
        let next_day = NaiveDate::from_ymd_opt(2025, 12, 26).unwrap();
        assert!(config.working_hours_on(next_day).is_some());
    }

    #[test]
    fn test_non_working_days_remove_hours() {
        let json = r#"{
            "slot_duration_minutes": 60,
            "working_hours": [
                {"day":"mon","start":"09:00","end":"17:00"},
                {"day":"fri","start":"09:00","end":"17:00"}
            ],
            "non_working_days": ["Friday"]
        }"#;
        let config = BusinessConfig::from_json(json).unwrap();
        assert!(config.working_hours(Weekday::Mon).is_some());
        assert!(config.working_hours(Weekday::Fri).is_none());
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(BusinessConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_parse_invalid_day() {
        let json = r#"{"slot_duration_minutes":30,"working_hours":[{"day":"xyz","start":"09:00","end":"17:00"}]}"#;
        assert!(BusinessConfig::from_json(json).is_err());
    }

    #[test]
    fn test_parse_invalid_time() {
        let json = r#"{"slot_duration_minutes":30,"working_hours":[{"day":"mon","start":"25:00","end":"17:00"}]}"#;
        assert!(BusinessConfig::from_json(json).is_err());
    }

    #[test]
    fn test_duplicate_day_rejected() {
        let json = r#"{"slot_duration_minutes":30,"working_hours":[
            {"day":"mon","start":"09:00","end":"17:00"},
            {"day":"mon","start":"10:00","end":"12:00"}
        ]}"#;
        assert!(BusinessConfig::from_json(json).is_err());
    }

    #[test]
    fn test_slot_duration_must_divide_working_hours() {
        let json = r#"{"slot_duration_minutes":45,"working_hours":[{"day":"mon","start":"09:00","end":"17:00"}]}"#;
        let err = BusinessConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("does not divide"));
    }

    #[test]
    fn test_lunch_must_be_inside_working_hours() {
        let json = r#"{
            "slot_duration_minutes": 30,
            "working_hours": [{"day":"mon","start":"13:00","end":"17:00"}],
            "lunch_breaks": [{"start":"12:00","end":"13:00"}]
        }"#;
        let err = BusinessConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("lunch break"));
    }

    #[test]
    fn test_default_is_valid() {
        let config = BusinessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.working_days().count(), 5);
    }

    #[test]
    fn test_to_human_readable() {
        let config = BusinessConfig::default();
        assert_eq!(
            config.to_human_readable(),
            "Mon: 09:00-17:00, Tue: 09:00-17:00, Wed: 09:00-17:00, Thu: 09:00-17:00, Fri: 09:00-17:00, lunch 12:00-13:00"
        );
    }
}
