//! Analysis type definitions: reflections and termination decisions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Qualitative label for the evidence gathered so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceQuality {
    Strong,
    Adequate,
    Weak,
    Insufficient,
    Unknown,
}

impl EvidenceQuality {
    /// Lenient parse of a model-supplied label
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "strong" | "high" | "excellent" => EvidenceQuality::Strong,
            "adequate" | "moderate" | "medium" | "good" | "sufficient" => EvidenceQuality::Adequate,
            "weak" | "low" | "limited" | "partial" => EvidenceQuality::Weak,
            "insufficient" | "none" | "poor" => EvidenceQuality::Insufficient,
            _ => EvidenceQuality::Unknown,
        }
    }
}

/// The reflector's per-iteration assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    /// Sufficiency estimate in [0.0, 1.0]
    pub confidence: f64,

    pub evidence_quality: EvidenceQuality,

    /// Free-text gaps; the only input the next plan uses to target retrieval
    pub gaps: Vec<String>,

    pub needs_more_search: bool,

    pub reasoning: String,
}

impl Reflection {
    /// Conservative stand-in when no assessment could be obtained
    pub fn fallback() -> Self {
        Self {
            confidence: 0.0,
            evidence_quality: EvidenceQuality::Unknown,
            gaps: Vec::new(),
            needs_more_search: true,
            reasoning: "Evidence assessment unavailable; assuming more search is needed".to_string(),
        }
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Iteration bound reached
    CapReached,

    /// Reflection confidence met the tier threshold
    ConfidenceReached,

    /// Reflector reported no further search needed
    SelfTerminated,

    /// An iteration added no new evidence
    NoMarginalGain,

    /// First plan judged the question answerable without retrieval
    AnsweredWithoutSearch,

    /// Repeated completion-provider failure
    ProviderUnavailable,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::CapReached => "cap_reached",
            StopReason::ConfidenceReached => "confidence_reached",
            StopReason::SelfTerminated => "self_terminated",
            StopReason::NoMarginalGain => "no_marginal_gain",
            StopReason::AnsweredWithoutSearch => "answered_without_search",
            StopReason::ProviderUnavailable => "provider_unavailable",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Termination policy verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop(StopReason),
}

impl Decision {
    pub fn should_terminate(&self) -> bool {
        matches!(self, Decision::Stop(_))
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Decision::Stop(reason) => Some(*reason),
            Decision::Continue => None,
        }
    }
}
