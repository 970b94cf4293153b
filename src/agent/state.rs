//! Research session state machine
//!
//! Deterministic finite state machine driving one research session:
//! - Safety: invalid (state, event) pairs are rejected, never coerced
//! - Liveness: every path ends in Done or Failed
//! - Determinism: unique next state per (state, event), so a recorded
//!   event list replays to the same state sequence

use crate::errors::{ResearchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Research session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchState {
    /// Initial state - question being classified
    Classifying,

    /// Planner deciding what to search next
    Planning,

    /// Retrieval queries in flight
    Searching,

    /// Reflector assessing the evidence pool
    Reflecting,

    /// Writing the final answer
    Synthesizing,

    /// Answer produced (terminal)
    Done,

    /// Session cancelled (terminal)
    Failed,
}

/// Events that trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateEvent {
    /// Tier and profile chosen
    Classified,

    /// Plan carries queries to search
    PlanReady,

    /// First plan says the question needs no retrieval
    PlanAnswerable,

    /// All of the iteration's queries completed or timed out
    SearchComplete,

    /// Reflection says keep going
    Continue,

    /// Termination policy or provider degradation ends the loop
    Stop,

    /// Synthesizer produced the answer
    AnswerReady,

    /// Caller cancelled the session
    Cancel,
}

impl ResearchState {
    /// Initial state of every session
    pub const INITIAL: ResearchState = ResearchState::Classifying;

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchState::Done | ResearchState::Failed)
    }

    /// Attempt state transition with validation
    ///
    /// Valid transitions:
    /// 1.  Classifying  → Planning      (on: Classified)
    /// 2.  Planning     → Searching     (on: PlanReady)
    /// 3.  Planning     → Synthesizing  (on: PlanAnswerable | Stop)
    /// 4.  Searching    → Reflecting    (on: SearchComplete)
    /// 5.  Reflecting   → Planning      (on: Continue)
    /// 6.  Reflecting   → Synthesizing  (on: Stop)
    /// 7.  Classifying  → Synthesizing  (on: Stop)
    /// 8.  Synthesizing → Done          (on: AnswerReady)
    /// 9.  non-terminal → Failed        (on: Cancel)
    pub fn transition(&self, event: StateEvent) -> Result<ResearchState> {
        use ResearchState::*;
        use StateEvent::*;

        let next_state = match (*self, event) {
            (from, Cancel) if !from.is_terminal() => Failed,

            (Classifying, Classified) => Planning,
            (Classifying, Stop) => Synthesizing,

            (Planning, PlanReady) => Searching,
            (Planning, PlanAnswerable) => Synthesizing,
            (Planning, Stop) => Synthesizing,

            (Searching, SearchComplete) => Reflecting,

            (Reflecting, Continue) => Planning,
            (Reflecting, Stop) => Synthesizing,

            (Synthesizing, AnswerReady) => Done,

            (from, event) => {
                let reason = if from.is_terminal() {
                    format!("Session already finished in {}", from)
                } else {
                    format!("No valid transition from {} on {:?}", from, event)
                };
                return Err(ResearchError::InvalidTransition {
                    from: from.to_string(),
                    to: format!("(via {:?})", event),
                    reason,
                });
            }
        };

        Ok(next_state)
    }

    /// Get all valid events from this state
    pub fn valid_events(&self) -> Vec<StateEvent> {
        use ResearchState::*;
        use StateEvent::*;

        match self {
            Classifying => vec![Classified, Stop, Cancel],
            Planning => vec![PlanReady, PlanAnswerable, Stop, Cancel],
            Searching => vec![SearchComplete, Cancel],
            Reflecting => vec![Continue, Stop, Cancel],
            Synthesizing => vec![AnswerReady, Cancel],
            Done | Failed => vec![],
        }
    }

    /// Re-derive the state sequence of a recorded session.
    ///
    /// Returns every state visited, starting with the initial one.
    pub fn replay(events: &[StateEvent]) -> Result<Vec<ResearchState>> {
        let mut states = Vec::with_capacity(events.len() + 1);
        let mut state = Self::INITIAL;
        states.push(state);
        for event in events {
            state = state.transition(*event)?;
            states.push(state);
        }
        Ok(states)
    }

    /// Human-readable state name
    pub fn display_name(&self) -> &'static str {
        match self {
            ResearchState::Classifying => "Classifying",
            ResearchState::Planning => "Planning",
            ResearchState::Searching => "Searching",
            ResearchState::Reflecting => "Reflecting",
            ResearchState::Synthesizing => "Synthesizing",
            ResearchState::Done => "Done",
            ResearchState::Failed => "Failed",
        }
    }
}

impl fmt::Display for ResearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
