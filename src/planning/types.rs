//! Core data structures for question classification and retrieval planning
//!
//! A question is classified once into a tier; the tier selects a
//! `TierProfile` whose numeric bounds govern the whole session. Plans are
//! produced fresh every iteration and discarded once searched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Complexity tier of an incoming question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTier {
    /// Single fact, answerable from one or two passages
    SimpleFactual,

    /// Short question that leans on the previous answer
    FollowUpClarification,

    /// Needs several passages, possibly a couple of angles
    ModerateResearch,

    /// Comparative or multi-tradition question
    DeepResearch,
}

impl QueryTier {
    /// Tier used whenever classification cannot be trusted
    pub const FALLBACK: QueryTier = QueryTier::ModerateResearch;

    pub fn all() -> [QueryTier; 4] {
        [
            QueryTier::SimpleFactual,
            QueryTier::FollowUpClarification,
            QueryTier::ModerateResearch,
            QueryTier::DeepResearch,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryTier::SimpleFactual => "simple_factual",
            QueryTier::FollowUpClarification => "follow_up_clarification",
            QueryTier::ModerateResearch => "moderate_research",
            QueryTier::DeepResearch => "deep_research",
        }
    }
}

impl fmt::Display for QueryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "simple_factual" | "simple" => Ok(QueryTier::SimpleFactual),
            "follow_up_clarification" | "follow_up" | "followup" => {
                Ok(QueryTier::FollowUpClarification)
            }
            "moderate_research" | "moderate" => Ok(QueryTier::ModerateResearch),
            "deep_research" | "deep" => Ok(QueryTier::DeepResearch),
            other => Err(format!("Unknown tier: {}", other)),
        }
    }
}

/// Numeric bounds attached to a tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierProfile {
    /// Upper bound on completed iterations
    pub max_iterations: usize,

    /// Upper bound on queries per iteration (and worker pool size)
    pub max_parallel_queries: usize,

    /// Reflection confidence at which the loop stops
    pub confidence_threshold: f64,

    /// Upper bound on distinct evidence items kept
    pub evidence_cap: usize,
}

impl TierProfile {
    pub fn new(
        max_iterations: usize,
        max_parallel_queries: usize,
        confidence_threshold: f64,
        evidence_cap: usize,
    ) -> Self {
        Self {
            max_iterations,
            max_parallel_queries,
            confidence_threshold,
            evidence_cap,
        }
    }

    pub fn validate(&self, tier: &str) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err(format!("{}: max_iterations must be greater than 0", tier));
        }
        if self.max_parallel_queries == 0 {
            return Err(format!("{}: max_parallel_queries must be greater than 0", tier));
        }
        if self.evidence_cap == 0 {
            return Err(format!("{}: evidence_cap must be greater than 0", tier));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "{}: confidence_threshold must be between 0.0 and 1.0",
                tier
            ));
        }
        Ok(())
    }
}

/// Per-tier profiles supplied by the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierProfiles {
    pub simple_factual: TierProfile,
    pub follow_up_clarification: TierProfile,
    pub moderate_research: TierProfile,
    pub deep_research: TierProfile,
}

impl Default for TierProfiles {
    fn default() -> Self {
        Self {
            simple_factual: TierProfile::new(2, 2, 0.70, 8),
            follow_up_clarification: TierProfile::new(1, 1, 0.70, 8),
            moderate_research: TierProfile::new(4, 3, 0.75, 15),
            deep_research: TierProfile::new(5, 5, 0.75, 30),
        }
    }
}

impl TierProfiles {
    pub fn get(&self, tier: QueryTier) -> TierProfile {
        match tier {
            QueryTier::SimpleFactual => self.simple_factual,
            QueryTier::FollowUpClarification => self.follow_up_clarification,
            QueryTier::ModerateResearch => self.moderate_research,
            QueryTier::DeepResearch => self.deep_research,
        }
    }

    pub fn get_mut(&mut self, tier: QueryTier) -> &mut TierProfile {
        match tier {
            QueryTier::SimpleFactual => &mut self.simple_factual,
            QueryTier::FollowUpClarification => &mut self.follow_up_clarification,
            QueryTier::ModerateResearch => &mut self.moderate_research,
            QueryTier::DeepResearch => &mut self.deep_research,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for tier in QueryTier::all() {
            self.get(tier).validate(tier.as_str())?;
        }
        Ok(())
    }
}

/// Result of classifying one question. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub tier: QueryTier,
    pub profile: TierProfile,

    /// Topic carried over from earlier conversation for follow-ups
    pub antecedent_topic: Option<String>,

    /// Heuristic complexity score in [0.0, 1.0]
    pub complexity: f64,

    pub rationale: String,

    /// True when the tier is the fallback rather than a parsed answer
    pub fell_back: bool,
}

/// Output of the planner for one iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub needs_more_search: bool,
    pub queries: Vec<String>,
    pub rationale: String,

    /// Planner's own estimate, informational only
    pub confidence: f64,
}

impl Plan {
    /// Plan used when the planner's output cannot be trusted
    pub fn fallback(question: &str) -> Self {
        Self {
            needs_more_search: true,
            queries: vec![question.to_string()],
            rationale: "Planner output unavailable; searching the original question".to_string(),
            confidence: 0.0,
        }
    }
}

/// Normalize a query for duplicate detection: lowercase, single spaces
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
