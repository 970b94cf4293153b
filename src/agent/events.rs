//! Progress channel for research sessions
//!
//! An ordered, finite sequence of typed events over a bounded channel.
//! Every session ends with exactly one `Done` or `Error` event.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::analysis::types::StopReason;
use crate::planning::types::{QueryTier, TierProfile};
use crate::rag::retrieval::QueryFailure;
use crate::rag::synthesizer::ResearchAnswer;

/// Default channel capacity
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Session progress events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    ClassificationDone {
        tier: QueryTier,
        profile: TierProfile,
        antecedent_topic: Option<String>,
        fell_back: bool,
    },

    PlanReady {
        iteration: usize,
        queries: Vec<String>,
        needs_more_search: bool,
        rationale: String,
    },

    Searching {
        iteration: usize,
        queries: Vec<String>,
    },

    SearchDone {
        iteration: usize,
        new_evidence: usize,
        total_evidence: usize,
        failures: Vec<QueryFailure>,
    },

    Reflecting {
        iteration: usize,
    },

    ReflectionDone {
        iteration: usize,
        confidence: f64,
        gaps: Vec<String>,
        needs_more_search: bool,
    },

    Synthesizing {
        stop_reason: StopReason,
        evidence_count: usize,
    },

    /// Terminal: carries the answer
    Done {
        answer: ResearchAnswer,
    },

    /// Terminal
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done { .. } | ProgressEvent::Error { .. })
    }

    /// Wire name of the event
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::ClassificationDone { .. } => "classification_done",
            ProgressEvent::PlanReady { .. } => "plan_ready",
            ProgressEvent::Searching { .. } => "searching",
            ProgressEvent::SearchDone { .. } => "search_done",
            ProgressEvent::Reflecting { .. } => "reflecting",
            ProgressEvent::ReflectionDone { .. } => "reflection_done",
            ProgressEvent::Synthesizing { .. } => "synthesizing",
            ProgressEvent::Done { .. } => "done",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

/// Publisher side of the progress channel
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<ProgressEvent>,
}

impl EventBus {
    /// Create new event bus with the default bounded channel
    pub fn new() -> (Self, mpsc::Receiver<ProgressEvent>) {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (EventBus { sender }, receiver)
    }

    /// Emit an event.
    ///
    /// Waits for capacity so no event is lost; a dropped receiver just
    /// means nobody is listening.
    pub async fn emit(&self, event: ProgressEvent) {
        let kind = event.kind();
        if self.sender.send(event).await.is_err() {
            tracing::trace!(kind, "Progress receiver closed; event discarded");
        }
    }
}
