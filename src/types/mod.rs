//! Core type definitions shared across modules

pub mod messages;

pub use messages::{ConversationTurn, Role};
