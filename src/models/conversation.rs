use std::collections::{BTreeMap, VecDeque};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::models::business::TimeWindow;
use crate::models::{
    Appointment, AppointmentDraft, AppointmentRef, Intent, SlotName, SlotValue, Task,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DialoguePhase {
    Idle,
    CollectingSlots,
    AwaitingConfirmation,
    DisambiguatingReference,
}

impl DialoguePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialoguePhase::Idle => "idle",
            DialoguePhase::CollectingSlots => "collecting_slots",
            DialoguePhase::AwaitingConfirmation => "awaiting_confirmation",
            DialoguePhase::DisambiguatingReference => "disambiguating_reference",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlotOverwritePolicy {
    #[default]
    LastMentionWins,
    FirstMentionWins,
}

impl SlotOverwritePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "last_mention_wins" | "last" => Some(SlotOverwritePolicy::LastMentionWins),
            "first_mention_wins" | "first" => Some(SlotOverwritePolicy::FirstMentionWins),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub at: NaiveDateTime,
    pub intent: Intent,
    pub slots: Vec<SlotName>,
    pub action: String,
    pub appointment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub session_id: String,
    pub phase: DialoguePhase,
    pub task: Task,
    pub slots: BTreeMap<SlotName, SlotValue>,
    pub history: VecDeque<TurnRecord>,
    pub pending: Option<AppointmentDraft>,
    pub target: Option<Appointment>,
    pub candidates: Vec<Appointment>,
    pub last_committed: Option<Appointment>,
    pub unrecognized_turns: u32,
    pub created_at: NaiveDateTime,
    pub last_activity: NaiveDateTime,
}

impl ConversationState {
    pub fn new(session_id: &str, now: NaiveDateTime) -> Self {
        Self {
            session_id: session_id.to_string(),
            phase: DialoguePhase::Idle,
            task: Task::None,
            slots: BTreeMap::new(),
            history: VecDeque::new(),
            pending: None,
            target: None,
            candidates: vec![],
            last_committed: None,
            unrecognized_turns: 0,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn pending_confirmation(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_expired(&self, now: NaiveDateTime, idle_timeout: Duration) -> bool {
        self.last_activity + idle_timeout <= now
    }

    pub fn start_task(&mut self, task: Task) {
        if self.task != Task::None {
            self.slots.clear();
        }
        self.task = task;
        self.pending = None;
        self.target = None;
        self.candidates.clear();
        self.last_committed = None;
        self.phase = DialoguePhase::CollectingSlots;
    }

    pub fn finish_task(&mut self) {
        self.task = Task::None;
        self.slots.clear();
        self.pending = None;
        self.target = None;
        self.candidates.clear();
        self.phase = DialoguePhase::Idle;
    }

    // `time` and `time_range` answer the same question, so setting one drops the other
    pub fn set(&mut self, name: SlotName, value: SlotValue, policy: SlotOverwritePolicy) -> bool {
        let rivals: &[SlotName] = match name {
            SlotName::Time => &[SlotName::TimeRange],
            SlotName::TimeRange => &[SlotName::Time],
            _ => &[],
        };

        if policy == SlotOverwritePolicy::FirstMentionWins
            && (self.slots.contains_key(&name) || rivals.iter().any(|r| self.slots.contains_key(r)))
        {
            return false;
        }

        let mut changed = false;
        for rival in rivals {
            changed |= self.slots.remove(rival).is_some();
        }
        let previous = self.slots.insert(name, value.clone());
        changed || previous.as_ref() != Some(&value)
    }

    pub fn clear(&mut self, names: &[SlotName]) {
        for name in names {
            self.slots.remove(name);
        }
    }

    pub fn is_filled(&self, name: SlotName) -> bool {
        self.slots.contains_key(&name)
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self.slots.get(&SlotName::Date) {
            Some(SlotValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn time(&self) -> Option<NaiveTime> {
        match self.slots.get(&SlotName::Time) {
            Some(SlotValue::Time(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn time_range(&self) -> Option<TimeWindow> {
        match self.slots.get(&SlotName::TimeRange) {
            Some(SlotValue::TimeRange(w)) => Some(*w),
            _ => None,
        }
    }

    pub fn duration(&self) -> Option<i64> {
        match self.slots.get(&SlotName::Duration) {
            Some(SlotValue::Duration(m)) => Some(*m),
            _ => None,
        }
    }

    pub fn subject(&self) -> Option<&str> {
        match self.slots.get(&SlotName::Subject) {
            Some(SlotValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<&AppointmentRef> {
        match self.slots.get(&SlotName::AppointmentRef) {
            Some(SlotValue::Reference(r)) => Some(r),
            _ => None,
        }
    }

    pub fn record_turn(&mut self, record: TurnRecord, max_history: usize) {
        self.history.push_back(record);
        while self.history.len() > max_history {
            self.history.pop_front();
        }
    }

    pub fn recent_appointment_id(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find_map(|turn| turn.appointment_id.as_deref())
    }
}
