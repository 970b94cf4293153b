//! Evidence assessment and termination
//! Reflector scores sufficiency; the termination policy decides stop/continue

pub mod convergence;
pub mod reflector;
pub mod types;

pub use convergence::{PolicyConfig, TerminationPolicy};
pub use reflector::Reflector;
pub use types::{Decision, EvidenceQuality, Reflection, StopReason};
