use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::config::DialogueConfig;
use crate::db::{retry_once, CalendarStore};
use crate::errors::{RuleViolation, StoreError};
use crate::models::{
    parse_entity, Action, Ambiguity, Appointment, AppointmentDraft, AppointmentRef,
    ConversationState, DialoguePhase, FailureReason, FallbackReason, Intent, InvalidSlotValue,
    NluResult, ReferenceHint, SlotName, SlotValue, Task, TurnRecord,
};
use crate::services::availability::{AvailabilityError, AvailabilityService};
use crate::services::rules::RuleEngine;

const REFERENCE_HINT_SLOTS: [SlotName; 4] = [
    SlotName::Date,
    SlotName::Time,
    SlotName::TimeRange,
    SlotName::Subject,
];

enum Resolution {
    Resolved(Appointment),
    Pending(Action),
}

pub struct DialogueManager {
    availability: AvailabilityService,
    store: Arc<dyn CalendarStore>,
    config: DialogueConfig,
}

impl DialogueManager {
    pub fn new(rules: RuleEngine, store: Arc<dyn CalendarStore>, config: DialogueConfig) -> Self {
        Self {
            availability: AvailabilityService::new(rules, store.clone()),
            store,
            config,
        }
    }

    pub fn rules(&self) -> &RuleEngine {
        self.availability.rules()
    }

    pub fn availability(&self) -> &AvailabilityService {
        &self.availability
    }

    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    pub async fn handle_turn(
        &self,
        conv: &mut ConversationState,
        input: &NluResult,
        now: NaiveDateTime,
    ) -> Action {
        let intent = Intent::parse(&input.intent);

        let mut values = vec![];
        let mut invalid = vec![];
        for entity in &input.entities {
            match parse_entity(entity) {
                Ok(parsed) => values.extend(parsed),
                Err(e) => {
                    tracing::info!(session = %conv.session_id, error = %e, "invalid slot value");
                    invalid.push(e);
                }
            }
        }
        let mentioned: Vec<SlotName> = values.iter().map(|(name, _)| *name).collect();

        if intent == Intent::None && values.is_empty() && invalid.is_empty() {
            conv.unrecognized_turns += 1;
        } else {
            conv.unrecognized_turns = 0;
        }

        let action = self.transition(conv, intent, values, invalid, now).await;

        tracing::info!(
            session = %conv.session_id,
            intent = intent.as_str(),
            task = conv.task.as_str(),
            phase = conv.phase.as_str(),
            action = action.name(),
            "turn handled"
        );

        conv.record_turn(
            TurnRecord {
                at: now,
                intent,
                slots: mentioned,
                action: action.name().to_string(),
                appointment_id: action.appointment_id().map(str::to_string),
            },
            self.config.max_history,
        );
        conv.last_activity = now;
        action
    }

    async fn transition(
        &self,
        conv: &mut ConversationState,
        intent: Intent,
        values: Vec<(SlotName, SlotValue)>,
        invalid: Vec<InvalidSlotValue>,
        now: NaiveDateTime,
    ) -> Action {
        if intent == Intent::None && values.is_empty() && invalid.is_empty() {
            return self.unrecognized(conv, now).await;
        }

        match intent {
            Intent::Goodbye => {
                conv.finish_task();
                return Action::Goodbye;
            }
            Intent::Greet if conv.phase == DialoguePhase::Idle && values.is_empty() => {
                return Action::Greet;
            }
            _ => {}
        }

        // A new goal abandons the unfinished one, but never a pending confirmation.
        if let Some(task) = intent.task() {
            if conv.phase != DialoguePhase::AwaitingConfirmation
                && (task != conv.task || conv.phase == DialoguePhase::Idle)
            {
                tracing::debug!(session = %conv.session_id, from = conv.task.as_str(), to = task.as_str(), "switching task");
                conv.start_task(task);
            }
        }

        match conv.phase {
            DialoguePhase::DisambiguatingReference => {
                return self.select_candidate(conv, intent, &values, now).await;
            }
            DialoguePhase::AwaitingConfirmation => {
                let reopened = self.config.confirmation_interrupt
                    && (self.merge(conv, values) || !invalid.is_empty());
                if !reopened {
                    return self.confirmation_reply(conv, intent, now).await;
                }
                tracing::debug!(session = %conv.session_id, "confirmation interrupted by new value");
                conv.pending = None;
                conv.phase = DialoguePhase::CollectingSlots;
            }
            DialoguePhase::Idle | DialoguePhase::CollectingSlots => {
                self.merge(conv, values);
            }
        }

        if conv.task == Task::None {
            if intent == Intent::Affirm {
                if let Some(appointment) = &conv.last_committed {
                    return Action::AlreadyBooked {
                        appointment: appointment.clone(),
                    };
                }
            }
            if conv.slots.is_empty() && invalid.is_empty() {
                return Action::Fallback {
                    reason: FallbackReason::NotUnderstood,
                };
            }
            return Action::Clarify {
                ambiguity: Ambiguity::MissingTask,
                candidates: vec![],
            };
        }

        if let Some(first) = invalid.into_iter().next() {
            conv.phase = DialoguePhase::CollectingSlots;
            return Action::RequestInformation {
                slot: first.slot,
                invalid_value: Some(first.value),
            };
        }

        self.advance(conv, now).await
    }

    fn merge(&self, conv: &mut ConversationState, values: Vec<(SlotName, SlotValue)>) -> bool {
        let mut changed = false;
        for (name, value) in values {
            changed |= conv.set(name, value, self.config.overwrite_policy);
        }
        changed
    }

    async fn unrecognized(&self, conv: &mut ConversationState, now: NaiveDateTime) -> Action {
        if conv.phase == DialoguePhase::Idle
            || conv.unrecognized_turns > self.config.fallback_after_turns
        {
            return Action::Fallback {
                reason: FallbackReason::NotUnderstood,
            };
        }

        // Repeat the open question
        match conv.phase {
            DialoguePhase::AwaitingConfirmation => match conv.pending.clone() {
                Some(draft) => Action::ConfirmBooking { draft },
                None => self.advance(conv, now).await,
            },
            DialoguePhase::DisambiguatingReference => Action::Clarify {
                ambiguity: Ambiguity::MultipleAppointments,
                candidates: conv.candidates.clone(),
            },
            _ => self.advance(conv, now).await,
        }
    }

    async fn confirmation_reply(
        &self,
        conv: &mut ConversationState,
        intent: Intent,
        now: NaiveDateTime,
    ) -> Action {
        match (intent, conv.pending.clone()) {
            (Intent::Affirm, Some(draft)) => self.commit(conv, draft).await,
            (Intent::Deny, _) => {
                conv.pending = None;
                conv.clear(&[SlotName::Date, SlotName::Time, SlotName::TimeRange]);
                conv.phase = DialoguePhase::CollectingSlots;
                self.advance(conv, now).await
            }
            (_, Some(draft)) => Action::ConfirmBooking { draft },
            (_, None) => {
                conv.phase = DialoguePhase::CollectingSlots;
                self.advance(conv, now).await
            }
        }
    }

    async fn advance(&self, conv: &mut ConversationState, now: NaiveDateTime) -> Action {
        match conv.task {
            Task::Schedule => self.advance_schedule(conv, now).await,
            Task::Reschedule => self.advance_reschedule(conv, now).await,
            Task::Cancel => self.advance_cancel(conv, now).await,
            Task::QueryAvailability => self.advance_query(conv, now).await,
            Task::None => {
                conv.finish_task();
                Action::Fallback {
                    reason: FallbackReason::NotUnderstood,
                }
            }
        }
    }

    // ── Schedule / reschedule ──

    async fn advance_schedule(&self, conv: &mut ConversationState, now: NaiveDateTime) -> Action {
        if let Some(action) = self.missing_booking_slot(conv) {
            return action;
        }
        self.draft_booking(conv, None, now).await
    }

    async fn advance_reschedule(&self, conv: &mut ConversationState, now: NaiveDateTime) -> Action {
        let target = match self.resolve_target(conv, now).await {
            Resolution::Resolved(target) => target,
            Resolution::Pending(action) => return action,
        };
        if let Some(action) = self.missing_booking_slot(conv) {
            return action;
        }
        self.draft_booking(conv, Some(&target), now).await
    }

    fn missing_booking_slot(&self, conv: &mut ConversationState) -> Option<Action> {
        let missing = if !conv.is_filled(SlotName::Date) {
            Some(SlotName::Date)
        } else if !conv.is_filled(SlotName::Time) && !conv.is_filled(SlotName::TimeRange) {
            Some(SlotName::Time)
        } else if self.config.require_subject && !conv.is_filled(SlotName::Subject) {
            Some(SlotName::Subject)
        } else {
            None
        };

        if let Some(slot) = missing {
            conv.phase = DialoguePhase::CollectingSlots;
            return Some(Action::RequestInformation {
                slot,
                invalid_value: None,
            });
        }

        let slot_minutes = self.rules().config().slot_duration_minutes;
        match conv.duration() {
            Some(minutes) if minutes != slot_minutes => {
                conv.clear(&[SlotName::Duration]);
                conv.phase = DialoguePhase::CollectingSlots;
                Some(Action::RequestInformation {
                    slot: SlotName::Duration,
                    invalid_value: Some(minutes.to_string()),
                })
            }
            _ => None,
        }
    }

    async fn draft_booking(
        &self,
        conv: &mut ConversationState,
        replacing: Option<&Appointment>,
        now: NaiveDateTime,
    ) -> Action {
        let Some(date) = conv.date() else {
            conv.phase = DialoguePhase::CollectingSlots;
            return Action::RequestInformation {
                slot: SlotName::Date,
                invalid_value: None,
            };
        };
        let exclude = replacing.map(|a| a.id.as_str());

        let slot = if let Some(time) = conv.time() {
            let slot = self.rules().slot_at(date, time);
            match self.availability.check_slot(&slot, now, exclude).await {
                Ok(()) => slot,
                Err(AvailabilityError::Rule(violation)) => {
                    return self.propose_alternatives(conv, violation, date, Some(time), now).await;
                }
                Err(AvailabilityError::Store(e)) => return self.store_failure(conv, e),
            }
        } else if let Some(range) = conv.time_range() {
            match self.availability.first_free_in(date, range, now, exclude).await {
                Ok(Some(slot)) => slot,
                Ok(None) => {
                    return self
                        .propose_alternatives(
                            conv,
                            RuleViolation::NoFreeSlotInRange,
                            date,
                            Some(range.start),
                            now,
                        )
                        .await;
                }
                Err(e) => return self.store_failure(conv, e),
            }
        } else {
            conv.phase = DialoguePhase::CollectingSlots;
            return Action::RequestInformation {
                slot: SlotName::Time,
                invalid_value: None,
            };
        };

        let subject = conv
            .subject()
            .map(str::to_string)
            .or_else(|| replacing.map(|a| a.subject.clone()))
            .unwrap_or_else(|| self.config.default_subject.clone());

        let mut draft = AppointmentDraft::new(subject, slot.start, slot.end);
        if let Some(previous) = replacing {
            draft = draft.replacing(previous.id.clone());
        }

        conv.pending = Some(draft.clone());
        conv.phase = DialoguePhase::AwaitingConfirmation;
        Action::ConfirmBooking { draft }
    }

    async fn propose_alternatives(
        &self,
        conv: &mut ConversationState,
        reason: RuleViolation,
        date: NaiveDate,
        preferred: Option<NaiveTime>,
        now: NaiveDateTime,
    ) -> Action {
        tracing::info!(session = %conv.session_id, %date, reason = %reason, "requested slot rejected");

        if reason.rejects_date() || self.rules().closed_day(date, now).is_some() {
            conv.clear(&[SlotName::Date]);
        } else if reason == RuleViolation::NoFreeSlotInRange {
            conv.clear(&[SlotName::TimeRange]);
        } else {
            conv.clear(&[SlotName::Time]);
        }
        conv.pending = None;
        conv.phase = DialoguePhase::CollectingSlots;

        let exclude = conv.target.as_ref().map(|a| a.id.clone());
        match self
            .availability
            .find_alternatives(date, preferred, self.config.max_alternatives, now, exclude.as_deref())
            .await
        {
            Ok(alternatives) if alternatives.is_empty() => Action::BookingFailed {
                reason: FailureReason::NoAvailability,
            },
            Ok(alternatives) => Action::ProposeAlternatives {
                reason,
                alternatives,
            },
            Err(e) => self.store_failure(conv, e),
        }
    }

    async fn commit(&self, conv: &mut ConversationState, draft: AppointmentDraft) -> Action {
        let result = match &draft.replaces {
            Some(previous) => {
                retry_once("reschedule", || self.store.reschedule(previous, &draft)).await
            }
            None => retry_once("try_insert", || self.store.try_insert(&draft)).await,
        };

        match result {
            Ok(appointment) => {
                conv.finish_task();
                conv.last_committed = Some(appointment.clone());
                Action::BookingSucceeded {
                    appointment,
                    replaced: draft.replaces,
                }
            }
            Err(StoreError::Conflict { existing }) => {
                tracing::info!(session = %conv.session_id, %existing, "lost the slot at commit");
                conv.pending = None;
                conv.clear(&[SlotName::Time, SlotName::TimeRange]);
                conv.phase = DialoguePhase::CollectingSlots;
                Action::BookingFailed {
                    reason: FailureReason::Conflict,
                }
            }
            Err(StoreError::NotFound(id)) => {
                tracing::info!(session = %conv.session_id, appointment_id = %id, "reschedule target vanished");
                conv.pending = None;
                conv.target = None;
                conv.clear(&[SlotName::AppointmentRef]);
                conv.phase = DialoguePhase::CollectingSlots;
                Action::BookingFailed {
                    reason: FailureReason::NotFound,
                }
            }
            Err(e) => self.store_failure(conv, e),
        }
    }

    // ── Cancel ──

    async fn advance_cancel(&self, conv: &mut ConversationState, now: NaiveDateTime) -> Action {
        let target = match self.resolve_target(conv, now).await {
            Resolution::Resolved(target) => target,
            Resolution::Pending(action) => return action,
        };

        match retry_once("cancel", || self.store.cancel(&target.id)).await {
            Ok(appointment) => {
                conv.finish_task();
                Action::CancelSucceeded { appointment }
            }
            Err(StoreError::NotFound(_)) => {
                conv.target = None;
                conv.clear(&[SlotName::AppointmentRef]);
                conv.phase = DialoguePhase::CollectingSlots;
                Action::Clarify {
                    ambiguity: Ambiguity::NoMatchingAppointment,
                    candidates: vec![],
                }
            }
            Err(e) => self.store_failure(conv, e),
        }
    }

    // ── Query availability ──

    async fn advance_query(&self, conv: &mut ConversationState, now: NaiveDateTime) -> Action {
        let Some(date) = conv.date() else {
            conv.phase = DialoguePhase::CollectingSlots;
            return Action::RequestInformation {
                slot: SlotName::Date,
                invalid_value: None,
            };
        };

        let slots = match self.availability.free_slots(date, now, None).await {
            Ok(slots) => slots,
            Err(e) => return self.store_failure(conv, e),
        };

        if !slots.is_empty() {
            conv.finish_task();
            return Action::Availability { date, slots };
        }

        let reason = self
            .rules()
            .closed_day(date, now)
            .unwrap_or(RuleViolation::Occupied);
        let action = self.propose_alternatives(conv, reason, date, None, now).await;
        if !matches!(action, Action::Fallback { .. }) {
            conv.finish_task();
        }
        action
    }

    // ── Appointment references ──

    async fn resolve_target(&self, conv: &mut ConversationState, now: NaiveDateTime) -> Resolution {
        if let Some(target) = &conv.target {
            return Resolution::Resolved(target.clone());
        }

        let Some((hint, used)) = self.reference_hint(conv, now) else {
            conv.phase = DialoguePhase::CollectingSlots;
            return Resolution::Pending(Action::RequestInformation {
                slot: SlotName::AppointmentRef,
                invalid_value: None,
            });
        };

        let mut candidates =
            match retry_once("find_by_fuzzy_reference", || self.store.find_by_fuzzy_reference(&hint)).await {
                Ok(candidates) => candidates,
                Err(e) => return Resolution::Pending(self.store_failure(conv, e)),
            };

        // The hint has served its purpose; later values describe the new time.
        conv.clear(&used);

        if candidates.len() == 1 {
            let target = candidates.remove(0);
            self.adopt_target(conv, target.clone());
            return Resolution::Resolved(target);
        }

        if candidates.is_empty() {
            conv.phase = DialoguePhase::CollectingSlots;
            return Resolution::Pending(Action::Clarify {
                ambiguity: Ambiguity::NoMatchingAppointment,
                candidates,
            });
        }

        tracing::info!(session = %conv.session_id, candidates = candidates.len(), "ambiguous appointment reference");
        conv.candidates = candidates.clone();
        conv.phase = DialoguePhase::DisambiguatingReference;
        Resolution::Pending(Action::Clarify {
            ambiguity: Ambiguity::MultipleAppointments,
            candidates,
        })
    }

    fn reference_hint(
        &self,
        conv: &mut ConversationState,
        now: NaiveDateTime,
    ) -> Option<(ReferenceHint, Vec<SlotName>)> {
        let mut hint = ReferenceHint {
            not_before: Some(now),
            ..ReferenceHint::default()
        };

        match conv.reference().cloned() {
            Some(AppointmentRef::Id(id)) => {
                hint.id_prefix = Some(id);
                return Some((hint, vec![SlotName::AppointmentRef]));
            }
            Some(AppointmentRef::Contextual) => {
                if let Some(id) = conv.recent_appointment_id() {
                    hint.id_prefix = Some(id.to_string());
                    return Some((hint, vec![SlotName::AppointmentRef]));
                }
                conv.clear(&[SlotName::AppointmentRef]);
            }
            // Positions only mean something against a candidate list
            Some(AppointmentRef::Nth(_)) | Some(AppointmentRef::Last) => {
                conv.clear(&[SlotName::AppointmentRef]);
            }
            None => {}
        }

        hint.date = conv.date();
        hint.time = conv.time();
        hint.subject = conv.subject().map(str::to_string);
        if hint.is_empty() {
            return None;
        }
        Some((hint, REFERENCE_HINT_SLOTS.to_vec()))
    }

    fn adopt_target(&self, conv: &mut ConversationState, target: Appointment) {
        tracing::debug!(session = %conv.session_id, appointment_id = %target.id, "appointment reference resolved");
        conv.target = Some(target);
        conv.candidates.clear();
        conv.clear(&[SlotName::AppointmentRef]);
        conv.phase = DialoguePhase::CollectingSlots;
    }

    async fn select_candidate(
        &self,
        conv: &mut ConversationState,
        intent: Intent,
        values: &[(SlotName, SlotValue)],
        now: NaiveDateTime,
    ) -> Action {
        if intent == Intent::Deny {
            conv.finish_task();
            return Action::Abandoned;
        }

        let candidates = conv.candidates.clone();
        let mut chosen = candidates.clone();
        let mut narrowed = false;

        for (name, value) in values {
            match (name, value) {
                (SlotName::AppointmentRef, SlotValue::Reference(AppointmentRef::Nth(i))) => {
                    chosen = candidates.get(*i).cloned().into_iter().collect();
                    narrowed = true;
                }
                (SlotName::AppointmentRef, SlotValue::Reference(AppointmentRef::Last)) => {
                    chosen = candidates.last().cloned().into_iter().collect();
                    narrowed = true;
                }
                (SlotName::AppointmentRef, SlotValue::Reference(AppointmentRef::Id(prefix))) => {
                    chosen.retain(|a| a.id.to_lowercase().starts_with(prefix.as_str()));
                    narrowed = true;
                }
                (SlotName::Date, SlotValue::Date(date)) => {
                    chosen.retain(|a| a.start.date() == *date);
                    narrowed = true;
                }
                (SlotName::Time, SlotValue::Time(time)) => {
                    chosen.retain(|a| a.start.time() == *time);
                    narrowed = true;
                }
                (SlotName::Subject, SlotValue::Text(subject)) => {
                    let needle = subject.to_lowercase();
                    chosen.retain(|a| a.subject.to_lowercase().contains(&needle));
                    narrowed = true;
                }
                _ => {}
            }
        }

        if !narrowed {
            return Action::Clarify {
                ambiguity: Ambiguity::MultipleAppointments,
                candidates,
            };
        }

        match chosen.len() {
            1 => {
                let target = chosen.remove(0);
                self.adopt_target(conv, target);
                self.advance(conv, now).await
            }
            n if n > 1 && n < candidates.len() => {
                conv.candidates = chosen.clone();
                Action::Clarify {
                    ambiguity: Ambiguity::MultipleAppointments,
                    candidates: chosen,
                }
            }
            _ => Action::Clarify {
                ambiguity: Ambiguity::MultipleAppointments,
                candidates,
            },
        }
    }

    // Store faults end the turn, never the session
    fn store_failure(&self, conv: &ConversationState, error: StoreError) -> Action {
        tracing::error!(session = %conv.session_id, error = %error, "calendar store failure");
        Action::Fallback {
            reason: FallbackReason::StoreUnavailable,
        }
    }
}
