use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::RuleViolation;
use crate::models::{Appointment, AppointmentDraft, SlotName, Slot};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Greet,
    Goodbye,
    RequestInformation {
        slot: SlotName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invalid_value: Option<String>,
    },
    ConfirmBooking {
        draft: AppointmentDraft,
    },
    ProposeAlternatives {
        reason: RuleViolation,
        alternatives: Vec<Slot>,
    },
    Availability {
        date: NaiveDate,
        slots: Vec<Slot>,
    },
    BookingSucceeded {
        appointment: Appointment,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replaced: Option<String>,
    },
    AlreadyBooked {
        appointment: Appointment,
    },
    BookingFailed {
        reason: FailureReason,
    },
    CancelSucceeded {
        appointment: Appointment,
    },
    Clarify {
        ambiguity: Ambiguity,
        candidates: Vec<Appointment>,
    },
    Abandoned,
    Fallback {
        reason: FallbackReason,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Conflict,
    NoAvailability,
    NotFound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Ambiguity {
    MultipleAppointments,
    NoMatchingAppointment,
    MissingTask,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NotUnderstood,
    StoreUnavailable,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Greet => "greet",
            Action::Goodbye => "goodbye",
            Action::RequestInformation { .. } => "request_information",
            Action::ConfirmBooking { .. } => "confirm_booking",
            Action::ProposeAlternatives { .. } => "propose_alternatives",
            Action::Availability { .. } => "availability",
            Action::BookingSucceeded { .. } => "booking_succeeded",
            Action::AlreadyBooked { .. } => "already_booked",
            Action::BookingFailed { .. } => "booking_failed",
            Action::CancelSucceeded { .. } => "cancel_succeeded",
            Action::Clarify { .. } => "clarify",
            Action::Abandoned => "abandoned",
            Action::Fallback { .. } => "fallback",
        }
    }

    pub fn appointment_id(&self) -> Option<&str> {
        match self {
            Action::BookingSucceeded { appointment, .. }
            | Action::AlreadyBooked { appointment }
            | Action::CancelSucceeded { appointment } => Some(appointment.id.as_str()),
            Action::ConfirmBooking { draft } => draft.replaces.as_deref(),
            _ => None,
        }
    }

    pub fn ends_session(&self) -> bool {
        matches!(self, Action::Goodbye)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag() {
        let action = Action::RequestInformation {
            slot: SlotName::Date,
            invalid_value: None,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "request_information");
        assert_eq!(json["slot"], "date");
        assert!(json.get("invalid_value").is_none());

        let json = serde_json::to_value(Action::Fallback {
            reason: FallbackReason::StoreUnavailable,
        })
        .unwrap();
        assert_eq!(json["action"], "fallback");
        assert_eq!(json["reason"], "store_unavailable");
    }

    #[test]
    fn test_propose_alternatives_carries_reason() {
        let json = serde_json::to_value(Action::ProposeAlternatives {
            reason: RuleViolation::LunchBreak,
            alternatives: vec![],
        })
        .unwrap();
        assert_eq!(json["reason"], "lunch_break");
        assert_eq!(json["alternatives"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_unit_variant_round_trip() {
        let json = serde_json::to_string(&Action::Abandoned).unwrap();
        assert_eq!(json, r#"{"action":"abandoned"}"#);
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Action::Abandoned);
        assert!(Action::Goodbye.ends_session());
        assert!(!back.ends_session());
    }
}
