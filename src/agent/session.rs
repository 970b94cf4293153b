//! Research session record
//!
//! One session per question. The session owns the state machine, the
//! per-iteration history and the provider-failure counter; it shares
//! nothing with other sessions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::agent::state::{ResearchState, StateEvent};
use crate::analysis::types::{Reflection, StopReason};
use crate::errors::Result;
use crate::planning::types::{normalize_query, Classification, Plan};
use crate::rag::retrieval::QueryFailure;
use crate::telemetry::TelemetryCollector;

/// One recorded state-machine step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: ResearchState,
    pub event: StateEvent,
    pub to: ResearchState,
}

/// What happened in one iteration of the loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    /// 1-based
    pub index: usize,
    pub plan: Plan,
    pub failures: Vec<QueryFailure>,
    /// Keys of passages first discovered in this iteration
    pub contributed: Vec<String>,
    /// Absent when the loop stopped before reflecting
    pub reflection: Option<Reflection>,
}

/// State of one research session
#[derive(Debug, Clone, Serialize)]
pub struct ResearchSession {
    pub id: Uuid,
    pub question: String,
    pub started_at: DateTime<Utc>,
    pub classification: Option<Classification>,
    state: ResearchState,
    transitions: Vec<Transition>,
    iterations: Vec<IterationRecord>,
    issued_queries: Vec<String>,
    retrieval_calls: usize,
    consecutive_provider_failures: usize,
    stop_reason: Option<StopReason>,
    #[serde(skip)]
    telemetry: Option<TelemetryCollector>,
}

impl ResearchSession {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            started_at: Utc::now(),
            classification: None,
            state: ResearchState::INITIAL,
            transitions: Vec::new(),
            iterations: Vec::new(),
            issued_queries: Vec::new(),
            retrieval_calls: 0,
            consecutive_provider_failures: 0,
            stop_reason: None,
            telemetry: None,
        }
    }

    /// Record transitions in `telemetry` as well
    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn state(&self) -> ResearchState {
        self.state
    }

    /// Apply an event, recording the transition
    pub fn apply(&mut self, event: StateEvent) -> Result<ResearchState> {
        let from = self.state;
        let to = from.transition(event)?;
        self.transitions.push(Transition { from, event, to });
        self.state = to;

        tracing::debug!(session = %self.id, %from, ?event, %to, "State transition");
        if let Some(telemetry) = &self.telemetry {
            telemetry.state_transition(from.display_name(), to.display_name());
        }
        Ok(to)
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// The recorded event list, suitable for `ResearchState::replay`
    pub fn events(&self) -> Vec<StateEvent> {
        self.transitions.iter().map(|t| t.event).collect()
    }

    /// Every state visited, starting with the initial one
    pub fn states(&self) -> Vec<ResearchState> {
        std::iter::once(ResearchState::INITIAL)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    /// Open a new iteration with its plan; returns the 1-based index
    pub fn begin_iteration(&mut self, plan: Plan) -> usize {
        let index = self.iterations.len() + 1;
        self.iterations.push(IterationRecord {
            index,
            plan,
            failures: Vec::new(),
            contributed: Vec::new(),
            reflection: None,
        });
        index
    }

    pub fn current_iteration_mut(&mut self) -> Option<&mut IterationRecord> {
        self.iterations.last_mut()
    }

    pub fn iterations(&self) -> &[IterationRecord] {
        &self.iterations
    }

    /// Iterations started so far
    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }

    /// Remember queries so later plans do not repeat them
    pub fn record_queries(&mut self, queries: &[String]) {
        for query in queries {
            let normalized = normalize_query(query);
            if !self
                .issued_queries
                .iter()
                .any(|q| normalize_query(q) == normalized)
            {
                self.issued_queries.push(query.clone());
            }
        }
        self.retrieval_calls += queries.len();
    }

    pub fn issued_queries(&self) -> &[String] {
        &self.issued_queries
    }

    /// Retriever calls issued across all iterations
    pub fn retrieval_calls(&self) -> usize {
        self.retrieval_calls
    }

    /// Track provider health after a model call. Returns the
    /// consecutive-failure count.
    pub fn record_provider_outcome(&mut self, provider_failed: bool) -> usize {
        if provider_failed {
            self.consecutive_provider_failures += 1;
        } else {
            self.consecutive_provider_failures = 0;
        }
        self.consecutive_provider_failures
    }

    pub fn consecutive_provider_failures(&self) -> usize {
        self.consecutive_provider_failures
    }

    pub fn set_stop_reason(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Confidence of the most recent reflection, 0.0 when none
    pub fn last_confidence(&self) -> f64 {
        self.last_reflection().map(|r| r.confidence).unwrap_or(0.0)
    }

    pub fn last_reflection(&self) -> Option<&Reflection> {
        self.iterations
            .iter()
            .rev()
            .find_map(|record| record.reflection.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = ResearchSession::new("What is the Tao?");
        assert_eq!(session.state(), ResearchState::Classifying);
        assert_eq!(session.iteration_count(), 0);
        assert!(session.transitions().is_empty());
        assert_eq!(session.last_confidence(), 0.0);
    }

    #[test]
    fn test_apply_records_transitions() {
        let mut session = ResearchSession::new("q");
        session.apply(StateEvent::Classified).unwrap();
        session.apply(StateEvent::PlanReady).unwrap();

        assert_eq!(session.state(), ResearchState::Searching);
        assert_eq!(session.transitions().len(), 2);
        assert_eq!(
            session.states(),
            vec![
                ResearchState::Classifying,
                ResearchState::Planning,
                ResearchState::Searching
            ]
        );
        assert_eq!(
            ResearchState::replay(&session.events()).unwrap(),
            session.states()
        );
    }

    #[test]
    fn test_invalid_event_leaves_state_unchanged() {
        let mut session = ResearchSession::new("q");
        assert!(session.apply(StateEvent::SearchComplete).is_err());
        assert_eq!(session.state(), ResearchState::Classifying);
        assert!(session.transitions().is_empty());
    }

    #[test]
    fn test_record_queries_dedups_normalized() {
        let mut session = ResearchSession::new("q");
        session.record_queries(&["Forgiveness in Islam".to_string()]);
        session.record_queries(&["forgiveness   in islam".to_string(), "mercy".to_string()]);

        assert_eq!(session.issued_queries().len(), 2);
        assert_eq!(session.retrieval_calls(), 3);
    }

    #[test]
    fn test_provider_failures_reset_on_success() {
        let mut session = ResearchSession::new("q");
        assert_eq!(session.record_provider_outcome(true), 1);
        assert_eq!(session.record_provider_outcome(true), 2);
        assert_eq!(session.record_provider_outcome(false), 0);
    }

    #[test]
    fn test_iterations() {
        let mut session = ResearchSession::new("q");
        let index = session.begin_iteration(Plan::fallback("q"));
        assert_eq!(index, 1);

        let reflection = Reflection::fallback();
        if let Some(record) = session.current_iteration_mut() {
            record.reflection = Some(reflection.clone());
        }
        assert_eq!(session.begin_iteration(Plan::fallback("q")), 2);
        assert_eq!(session.last_reflection(), Some(&reflection));
    }
}
