use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Schedule,
    Cancel,
    Reschedule,
    QueryAvailability,
    Affirm,
    Deny,
    Greet,
    Goodbye,
    Inform,
    None,
}

impl Intent {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "schedule" | "book" => Intent::Schedule,
            "cancel" => Intent::Cancel,
            "reschedule" | "resched" => Intent::Reschedule,
            "query_availability" | "query_avail" | "avail" => Intent::QueryAvailability,
            "affirm" | "positive_reply" | "confirm" => Intent::Affirm,
            "deny" | "negative_reply" | "decline" => Intent::Deny,
            "greet" | "greeting" => Intent::Greet,
            "goodbye" | "bye" => Intent::Goodbye,
            "inform" => Intent::Inform,
            _ => Intent::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Schedule => "schedule",
            Intent::Cancel => "cancel",
            Intent::Reschedule => "reschedule",
            Intent::QueryAvailability => "query_availability",
            Intent::Affirm => "affirm",
            Intent::Deny => "deny",
            Intent::Greet => "greet",
            Intent::Goodbye => "goodbye",
            Intent::Inform => "inform",
            Intent::None => "none",
        }
    }

    pub fn task(&self) -> Option<Task> {
        match self {
            Intent::Schedule => Some(Task::Schedule),
            Intent::Cancel => Some(Task::Cancel),
            Intent::Reschedule => Some(Task::Reschedule),
            Intent::QueryAvailability => Some(Task::QueryAvailability),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Schedule,
    Cancel,
    Reschedule,
    QueryAvailability,
    None,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Schedule => "schedule",
            Task::Cancel => "cancel",
            Task::Reschedule => "reschedule",
            Task::QueryAvailability => "query_availability",
            Task::None => "none",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NluResult {
    pub intent: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub raw_confidence: Option<f32>,
}

impl NluResult {
    pub fn new(intent: &str) -> Self {
        Self {
            intent: intent.to_string(),
            entities: vec![],
            raw_confidence: None,
        }
    }

    pub fn with_entity(mut self, slot_name: &str, value: &str) -> Self {
        self.entities.push(Entity {
            slot_name: slot_name.to_string(),
            value: value.to_string(),
            value_type: None,
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub slot_name: String,
    pub value: String,
    #[serde(default)]
    pub value_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_synonyms() {
        assert_eq!(Intent::parse("book"), Intent::Schedule);
        assert_eq!(Intent::parse("Schedule"), Intent::Schedule);
        assert_eq!(Intent::parse("resched"), Intent::Reschedule);
        assert_eq!(Intent::parse("query_avail"), Intent::QueryAvailability);
        assert_eq!(Intent::parse("positive_reply"), Intent::Affirm);
        assert_eq!(Intent::parse("negative_reply"), Intent::Deny);
        assert_eq!(Intent::parse("greeting"), Intent::Greet);
        assert_eq!(Intent::parse("bye"), Intent::Goodbye);
        assert_eq!(Intent::parse("something_else"), Intent::None);
        assert_eq!(Intent::parse(""), Intent::None);
    }

    #[test]
    fn test_only_goal_intents_start_tasks() {
        assert_eq!(Intent::Schedule.task(), Some(Task::Schedule));
        assert_eq!(Intent::QueryAvailability.task(), Some(Task::QueryAvailability));
        assert_eq!(Intent::Affirm.task(), None);
        assert_eq!(Intent::Inform.task(), None);
        assert_eq!(Intent::None.task(), None);
    }

    #[test]
    fn test_deserialize_nlu_record() {
        let json = r#"{"intent":"schedule","entities":[{"slot_name":"date","value":"2025-06-17","value_type":"date"}],"raw_confidence":0.92}"#;
        let nlu: NluResult = serde_json::from_str(json).unwrap();
        assert_eq!(Intent::parse(&nlu.intent), Intent::Schedule);
        assert_eq!(nlu.entities.len(), 1);
        assert_eq!(nlu.entities[0].value_type.as_deref(), Some("date"));
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let nlu: NluResult = serde_json::from_str(r#"{"intent":"affirm"}"#).unwrap();
        assert!(nlu.entities.is_empty());
        assert!(nlu.raw_confidence.is_none());
    }
}
