//! Termination policy for the research loop
//!
//! Rules after each reflection, in priority order:
//! 1. iteration index reached the tier's max-iterations bound → cap reached
//! 2. confidence ≥ tier threshold → confidence reached
//! 3. reflector says no more search → self-terminated
//! 4. (opt-in) an iteration after the first added no evidence → no marginal gain
//! 5. otherwise continue
//!
//! Provider degradation ranks between rules 1 and 2. A plan after the first
//! iteration with no new queries self-terminates before searching.
//!
//! Deterministic: the same inputs always yield the same decision.

use crate::analysis::types::{Decision, Reflection, StopReason};
use crate::planning::types::{Plan, QueryTier, TierProfile};

/// Termination policy configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyConfig {
    /// Stop when an iteration after the first adds no new evidence
    pub stop_on_stagnation: bool,

    /// Consecutive provider failures that end the loop early
    pub max_provider_failures: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            stop_on_stagnation: false,
            max_provider_failures: 2,
        }
    }
}

/// Stop/continue authority for one session
#[derive(Debug, Clone)]
pub struct TerminationPolicy {
    tier: QueryTier,
    profile: TierProfile,
    config: PolicyConfig,
}

impl TerminationPolicy {
    pub fn new(tier: QueryTier, profile: TierProfile) -> Self {
        Self::with_config(tier, profile, PolicyConfig::default())
    }

    pub fn with_config(tier: QueryTier, profile: TierProfile, config: PolicyConfig) -> Self {
        Self {
            tier,
            profile,
            config,
        }
    }

    /// Fast path: the first plan of a light tier may declare the question
    /// answerable without retrieval. Heavier tiers always search.
    pub fn after_plan(&self, iteration: usize, plan: &Plan) -> Decision {
        let light_tier = matches!(
            self.tier,
            QueryTier::SimpleFactual | QueryTier::FollowUpClarification
        );

        if iteration == 1 && light_tier && !plan.needs_more_search {
            Decision::Stop(StopReason::AnsweredWithoutSearch)
        } else if iteration > 1 && plan.queries.is_empty() {
            // Nothing left to search for
            Decision::Stop(StopReason::SelfTerminated)
        } else {
            Decision::Continue
        }
    }

    /// Decide after a completed iteration's reflection
    pub fn after_reflection(
        &self,
        iteration: usize,
        reflection: &Reflection,
        new_evidence: usize,
    ) -> Decision {
        if iteration >= self.profile.max_iterations {
            return Decision::Stop(StopReason::CapReached);
        }

        if reflection.confidence >= self.profile.confidence_threshold {
            return Decision::Stop(StopReason::ConfidenceReached);
        }

        if !reflection.needs_more_search {
            return Decision::Stop(StopReason::SelfTerminated);
        }

        if self.config.stop_on_stagnation && iteration > 1 && new_evidence == 0 {
            return Decision::Stop(StopReason::NoMarginalGain);
        }

        Decision::Continue
    }

    /// End-of-iteration decision. The iteration cap outranks provider
    /// degradation, which outranks the reflection rules.
    pub fn after_iteration(
        &self,
        iteration: usize,
        reflection: &Reflection,
        new_evidence: usize,
        consecutive_failures: usize,
    ) -> Decision {
        if iteration >= self.profile.max_iterations {
            return Decision::Stop(StopReason::CapReached);
        }
        match self.after_provider_failures(consecutive_failures) {
            Decision::Continue => self.after_reflection(iteration, reflection, new_evidence),
            stop => stop,
        }
    }

    /// Checked at every transition boundary
    pub fn after_provider_failures(&self, consecutive_failures: usize) -> Decision {
        if self.config.max_provider_failures > 0
            && consecutive_failures >= self.config.max_provider_failures
        {
            Decision::Stop(StopReason::ProviderUnavailable)
        } else {
            Decision::Continue
        }
    }

    pub fn profile(&self) -> &TierProfile {
        &self.profile
    }

    pub fn tier(&self) -> QueryTier {
        self.tier
    }

    /// Whether a stop left the answer short of the tier's confidence bar
    pub fn is_low_confidence(&self, confidence: f64) -> bool {
        confidence < self.profile.confidence_threshold
    }
}
