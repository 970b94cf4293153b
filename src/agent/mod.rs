//! Research agent module
//!
//! State machine, session record, progress channel, strategies and the
//! controller that drives them.

pub mod events;
pub mod orchestrator;
pub mod session;
pub mod state;
pub mod strategy;

// Re-export commonly used types
pub use events::{EventBus, ProgressEvent};
pub use orchestrator::{ResearchController, ResearchOutcome};
pub use session::{IterationRecord, ResearchSession, Transition};
pub use state::{ResearchState, StateEvent};
pub use strategy::{
    ContemplativeResearch, IterativeResearch, ResearchStrategy, SinglePassResearch, StrategyKind,
};
