//! Conversation core: the turn engine and the events it produces.

pub mod engine;
pub mod events;
