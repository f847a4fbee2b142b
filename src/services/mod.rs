pub mod availability;
pub mod calendar;
pub mod dialogue;
pub mod rules;
pub mod sessions;
