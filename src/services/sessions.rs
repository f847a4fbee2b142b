use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Local, NaiveDateTime};
use tokio::task::JoinHandle;

use crate::models::{Action, ConversationState, NluResult};
use crate::services::dialogue::DialogueManager;

type SessionSlot = Arc<tokio::sync::Mutex<ConversationState>>;

pub struct SessionManager {
    dialogue: DialogueManager,
    sessions: Mutex<HashMap<String, SessionSlot>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(dialogue: DialogueManager, idle_timeout: Duration) -> Self {
        Self {
            dialogue,
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn dialogue(&self) -> &DialogueManager {
        &self.dialogue
    }

    pub async fn process_turn(&self, session_id: &str, input: &NluResult) -> Action {
        self.process_turn_at(session_id, input, Local::now().naive_local())
            .await
    }

    pub async fn process_turn_at(
        &self,
        session_id: &str,
        input: &NluResult,
        now: NaiveDateTime,
    ) -> Action {
        let (slot, mut conv) = loop {
            let slot = self.session(session_id, now);
            let conv = slot.clone().lock_owned().await;
            // Ended or swept while this turn was queued
            if self.is_current(session_id, &slot) {
                break (slot, conv);
            }
            tracing::debug!(session = %session_id, "session ended while turn was queued, reopening");
        };

        // The sweeper may not have caught it yet
        if conv.is_expired(now, self.idle_timeout) {
            tracing::info!(session = %session_id, "session expired, starting over");
            *conv = ConversationState::new(session_id, now);
        }

        let action = self.dialogue.handle_turn(&mut conv, input, now).await;

        if action.ends_session() && self.remove_if_current(session_id, &slot) {
            tracing::info!(session = %session_id, "session ended");
        }
        action
    }

    pub fn end_session(&self, session_id: &str) -> bool {
        let removed = self.lock_sessions().remove(session_id).is_some();
        if removed {
            tracing::info!(session = %session_id, "session ended");
        }
        removed
    }

    pub fn active_sessions(&self) -> usize {
        self.lock_sessions().len()
    }

    // Sessions with a turn in flight are left alone
    pub fn sweep_expired(&self, now: NaiveDateTime) -> usize {
        let mut sessions = self.lock_sessions();
        let before = sessions.len();
        sessions.retain(|_, slot| match slot.try_lock() {
            Ok(conv) => !conv.is_expired(now, self.idle_timeout),
            Err(_) => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, "expired sessions swept");
        }
        removed
    }

    fn session(&self, session_id: &str, now: NaiveDateTime) -> SessionSlot {
        self.lock_sessions()
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session = %session_id, "session started");
                Arc::new(tokio::sync::Mutex::new(ConversationState::new(session_id, now)))
            })
            .clone()
    }

    fn is_current(&self, session_id: &str, slot: &SessionSlot) -> bool {
        self.lock_sessions()
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn remove_if_current(&self, session_id: &str, slot: &SessionSlot) -> bool {
        let mut sessions = self.lock_sessions();
        match sessions.get(session_id) {
            Some(current) if Arc::ptr_eq(current, slot) => {
                sessions.remove(session_id);
                true
            }
            _ => false,
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionSlot>> {
        // The map holds no invariants a panicking holder could break
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn spawn_sweeper(sessions: Arc<SessionManager>, interval: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sessions.sweep_expired(Local::now().naive_local());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialogueConfig;
    use crate::db::SqliteCalendarStore;
    use crate::models::{BusinessConfig, DialoguePhase, Entity};
    use chrono::NaiveDate;
    use crate::services::rules::RuleEngine;

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-06-16 08:00", "%Y-%m-%d %H:%M").unwrap()
    }

    fn manager() -> SessionManager {
        let store = Arc::new(SqliteCalendarStore::open(":memory:").unwrap());
        let rules = RuleEngine::new(Arc::new(BusinessConfig::default()));
        let dialogue = DialogueManager::new(rules, store, DialogueConfig::default());
        SessionManager::new(dialogue, Duration::minutes(30))
    }

    fn schedule_on(date: &str) -> NluResult {
        NluResult {
            intent: "schedule".to_string(),
            entities: vec![Entity {
                slot_name: "date".to_string(),
                value: date.to_string(),
                value_type: None,
            }],
            raw_confidence: None,
        }
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let sessions = manager();
        sessions.process_turn_at("a", &schedule_on("2025-06-17"), now()).await;
        let action = sessions
            .process_turn_at("b", &NluResult::new("inform"), now())
            .await;

        // "b" never named a goal
        assert_eq!(action.name(), "fallback");
        assert_eq!(sessions.active_sessions(), 2);
    }

    #[tokio::test]
    async fn test_expired_session_starts_over() {
        let sessions = manager();
        sessions.process_turn_at("a", &schedule_on("2025-06-17"), now()).await;

        let later = now() + Duration::minutes(31);
        let action = sessions
            .process_turn_at("a", &NluResult::new("affirm"), later)
            .await;
        assert_eq!(action.name(), "fallback");
    }

    #[tokio::test]
    async fn test_goodbye_removes_session() {
        let sessions = manager();
        sessions.process_turn_at("a", &schedule_on("2025-06-17"), now()).await;
        let action = sessions
            .process_turn_at("a", &NluResult::new("goodbye"), now())
            .await;
        assert!(action.ends_session());
        assert_eq!(sessions.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_turn_queued_behind_ended_session_is_kept() {
        let sessions = Arc::new(manager());
        sessions.process_turn_at("a", &schedule_on("2025-06-17"), now()).await;

        // Hold the session while another turn queues up behind it
        let slot = sessions.session("a", now());
        let guard = slot.lock().await;
        let queued = {
            let sessions = sessions.clone();
            tokio::spawn(async move {
                sessions.process_turn_at("a", &schedule_on("2025-06-18"), now()).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(sessions.end_session("a"));
        drop(guard);
        let action = queued.await.unwrap();

        assert_eq!(action.name(), "request_information");
        assert_eq!(sessions.active_sessions(), 1);
        let current = sessions.session("a", now());
        assert!(!Arc::ptr_eq(&current, &slot));
        let conv = current.lock().await;
        assert_eq!(conv.date(), NaiveDate::from_ymd_opt(2025, 6, 18));
        assert_eq!(conv.history.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let sessions = manager();
        sessions.process_turn_at("old", &schedule_on("2025-06-17"), now()).await;
        sessions
            .process_turn_at("fresh", &schedule_on("2025-06-17"), now() + Duration::minutes(20))
            .await;

        let removed = sessions.sweep_expired(now() + Duration::minutes(35));
        assert_eq!(removed, 1);
        assert_eq!(sessions.active_sessions(), 1);

        let slot = sessions.session("fresh", now());
        assert_eq!(slot.lock().await.phase, DialoguePhase::CollectingSlots);
    }
}
