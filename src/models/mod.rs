pub mod action;
pub mod appointment;
pub mod business;
pub mod conversation;
pub mod entity;
pub mod intent;
pub mod slot;

pub use action::{Action, Ambiguity, FailureReason, FallbackReason};
pub use appointment::{Appointment, AppointmentDraft, AppointmentStatus, ReferenceHint};
pub use business::{BusinessConfig, TimeWindow};
pub use conversation::{ConversationState, DialoguePhase, SlotOverwritePolicy, TurnRecord};
pub use entity::{parse_entity, AppointmentRef, InvalidSlotValue, SlotName, SlotValue};
pub use intent::{Entity, Intent, NluResult, Task};
pub use slot::Slot;
