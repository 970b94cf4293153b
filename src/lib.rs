//! ResearchBuddy - adaptive iterative research
//!
//! Answers questions over a sacred-texts corpus by classifying the
//! question, then planning, searching and reflecting in bounded
//! iterations before synthesizing a cited answer.
//!
//! # Architecture
//!
//! - **planning**: question classification and per-iteration query plans
//! - **rag**: retrieval, the evidence pool and answer synthesis
//! - **analysis**: evidence reflection and the termination policy
//! - **agent**: state machine, session record, progress events, controller
//! - **providers** / **resilience**: completion backends with retry and fallback

pub mod errors;
pub mod types;

// Re-export commonly used types
pub use errors::{ResearchError, Result};

pub mod config;
pub mod providers;
pub mod resilience;
pub mod telemetry;

pub mod analysis;
pub mod planning;
pub mod rag;

pub mod agent;
pub mod cli;
