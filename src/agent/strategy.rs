//! Research strategies
//!
//! A strategy decides how a session plans, reflects and synthesizes. The
//! controller owns the loop and the termination policy; strategies only
//! supply the per-step behaviour. Variants form a closed set.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::analysis::reflector::Reflector;
use crate::analysis::types::{Reflection, StopReason};
use crate::config::ResearchConfig;
use crate::planning::planner::{Planner, PlanningContext};
use crate::planning::types::{Classification, Plan, TierProfile};
use crate::providers::{CompletionRequest, CompletionTask};
use crate::rag::context::Citation;
use crate::rag::evidence::{EvidenceItem, EvidencePool};
use crate::rag::synthesizer::{
    Caveat, ResearchAnswer, SynthesisInput, Synthesizer, SynthesizerConfig,
};
use crate::resilience::{ResilientClient, Structured};
use crate::types::messages::{ConversationTurn, Role};

/// Evidence cap used by the single-pass variant
const SINGLE_PASS_EVIDENCE_CAP: usize = 5;

/// Used when no reflective question could be generated
const FALLBACK_QUESTION: &str =
    "How might the wisdom in this passage speak to your current life situation and spiritual journey?";

const NO_PASSAGE_TEXT: &str = "I couldn't find relevant passages for contemplation on this topic. \
     Perhaps try rephrasing your question or exploring a different spiritual theme.";

/// Inputs to one reflection step
#[derive(Debug, Clone, Copy)]
pub struct ReflectInput<'a> {
    pub question: &'a str,
    pub pool: &'a EvidencePool,
    pub iteration: usize,
    pub issued_queries: &'a [String],
    /// Passages first discovered in this iteration
    pub new_evidence: usize,
}

/// Common contract for research variants
#[async_trait]
pub trait ResearchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Resource bounds for a classified question
    fn profile(&self, classification: &Classification) -> TierProfile;

    async fn plan(&self, ctx: &PlanningContext<'_>) -> Structured<Plan>;

    async fn reflect(&self, input: ReflectInput<'_>) -> Structured<Reflection>;

    async fn synthesize(&self, input: SynthesisInput<'_>) -> ResearchAnswer;
}

/// Full plan-search-reflect loop bounded by the tier profile
pub struct IterativeResearch {
    planner: Planner,
    reflector: Reflector,
    synthesizer: Synthesizer,
}

impl IterativeResearch {
    pub fn new(client: ResilientClient, config: &ResearchConfig) -> Self {
        Self {
            planner: Planner::new(client.clone()),
            reflector: Reflector::new(client.clone()),
            synthesizer: Synthesizer::new(client, synthesizer_config(config)),
        }
    }
}

#[async_trait]
impl ResearchStrategy for IterativeResearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Iterative
    }

    fn profile(&self, classification: &Classification) -> TierProfile {
        classification.profile
    }

    async fn plan(&self, ctx: &PlanningContext<'_>) -> Structured<Plan> {
        self.planner.plan(ctx).await
    }

    async fn reflect(&self, input: ReflectInput<'_>) -> Structured<Reflection> {
        self.reflector
            .reflect(
                input.question,
                input.pool,
                input.iteration,
                input.issued_queries,
                input.new_evidence,
            )
            .await
    }

    async fn synthesize(&self, input: SynthesisInput<'_>) -> ResearchAnswer {
        self.synthesizer.synthesize(input).await
    }
}

/// One search of the seed query, reduced evidence, no planning or
/// reflection calls
pub struct SinglePassResearch {
    synthesizer: Synthesizer,
}

impl SinglePassResearch {
    pub fn new(client: ResilientClient, config: &ResearchConfig) -> Self {
        Self {
            synthesizer: Synthesizer::new(client, synthesizer_config(config)),
        }
    }
}

#[async_trait]
impl ResearchStrategy for SinglePassResearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SinglePass
    }

    fn profile(&self, classification: &Classification) -> TierProfile {
        let base = classification.profile;
        TierProfile {
            max_iterations: 1,
            max_parallel_queries: 1,
            confidence_threshold: base.confidence_threshold,
            evidence_cap: base.evidence_cap.min(SINGLE_PASS_EVIDENCE_CAP),
        }
    }

    async fn plan(&self, ctx: &PlanningContext<'_>) -> Structured<Plan> {
        Structured::parsed(Plan {
            needs_more_search: true,
            queries: vec![ctx.seed_query()],
            rationale: "Single pass over the question".to_string(),
            confidence: 0.0,
        })
    }

    async fn reflect(&self, input: ReflectInput<'_>) -> Structured<Reflection> {
        Structured::parsed(Reflector::coverage_only(input.pool))
    }

    async fn synthesize(&self, input: SynthesisInput<'_>) -> ResearchAnswer {
        self.synthesizer.synthesize(input).await
    }
}

/// The single most relevant passage and an open question to sit with
pub struct ContemplativeResearch {
    client: ResilientClient,
}

impl ContemplativeResearch {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    fn build_request(passage: &EvidenceItem, history: &[ConversationTurn]) -> CompletionRequest {
        let recent: Vec<String> = history
            .iter()
            .rev()
            .take(2)
            .filter(|turn| turn.role == Role::User)
            .map(|turn| format!("Recent question: {}", turn.content))
            .collect();

        let mut prompt = format!(
            "Given this passage from sacred texts:\n{}\n\nSource: {}\n\n\
             Generate a single, profound, open-ended question that encourages deep personal \
             reflection, connects the passage to the reader's life, and opens new perspectives \
             without providing answers. The question should be contemplative, not academic. \
             Reply with the question only.",
            passage.text.trim(),
            passage.source_id
        );
        if !recent.is_empty() {
            prompt = format!(
                "{}\n\n{}\n\nConsider the conversational context when crafting your question.",
                recent.join("\n"),
                prompt
            );
        }

        CompletionRequest::new(CompletionTask::Synthesize, prompt).with_system(
            "You are a wise spiritual guide who helps people engage in contemplative practice. \
             Your questions invite personal reflection and inner exploration.",
        )
    }
}

#[async_trait]
impl ResearchStrategy for ContemplativeResearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Contemplative
    }

    fn profile(&self, classification: &Classification) -> TierProfile {
        TierProfile {
            max_iterations: 1,
            max_parallel_queries: 1,
            confidence_threshold: classification.profile.confidence_threshold,
            evidence_cap: 1,
        }
    }

    async fn plan(&self, ctx: &PlanningContext<'_>) -> Structured<Plan> {
        Structured::parsed(Plan {
            needs_more_search: true,
            queries: vec![ctx.seed_query()],
            rationale: "Find one passage for contemplation".to_string(),
            confidence: 0.0,
        })
    }

    async fn reflect(&self, input: ReflectInput<'_>) -> Structured<Reflection> {
        Structured::parsed(Reflector::coverage_only(input.pool))
    }

    async fn synthesize(&self, input: SynthesisInput<'_>) -> ResearchAnswer {
        let base = ResearchAnswer {
            text: String::new(),
            citations: Vec::new(),
            caveat: None,
            confidence: input.confidence,
            stop_reason: input.stop_reason,
            iterations: input.iterations,
            evidence_count: input.pool.len(),
        };

        let Some(passage) = input.pool.ranked().into_iter().next() else {
            let caveat = if input.stop_reason == StopReason::ProviderUnavailable {
                Caveat::ProviderDegraded
            } else {
                Caveat::InsufficientEvidence
            };
            return ResearchAnswer {
                text: NO_PASSAGE_TEXT.to_string(),
                caveat: Some(caveat),
                ..base
            };
        };

        let request = Self::build_request(passage, input.history);
        let (question, caveat) = match self.client.text(&request).await {
            Ok(text) if !text.trim().is_empty() => {
                let degraded = input.stop_reason == StopReason::ProviderUnavailable;
                (text.trim().to_string(), degraded.then_some(Caveat::ProviderDegraded))
            }
            Ok(_) => (FALLBACK_QUESTION.to_string(), Some(Caveat::ProviderDegraded)),
            Err(e) => {
                tracing::warn!(error = %e, "Reflective question unavailable; using fallback");
                (FALLBACK_QUESTION.to_string(), Some(Caveat::ProviderDegraded))
            }
        };

        let text = format!(
            "Sacred text for contemplation:\n\n\"{}\"\n\nSource: {}\n\nFor your reflection:\n\n{}",
            passage.text.trim(),
            passage.source_id,
            question
        );

        ResearchAnswer {
            text,
            citations: vec![Citation {
                index: 1,
                source_id: passage.source_id.clone(),
                score: passage.score,
            }],
            caveat,
            ..base
        }
    }
}

fn synthesizer_config(config: &ResearchConfig) -> SynthesizerConfig {
    SynthesizerConfig {
        history_turns: config.history_turns,
        max_passages_per_source: config.max_passages_per_source,
    }
}

/// Available research strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrategyKind {
    #[default]
    Iterative,
    SinglePass,
    Contemplative,
}

impl StrategyKind {
    pub fn all() -> [StrategyKind; 3] {
        [
            StrategyKind::Iterative,
            StrategyKind::SinglePass,
            StrategyKind::Contemplative,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Iterative => "deep_research",
            StrategyKind::SinglePass => "single_pass",
            StrategyKind::Contemplative => "contemplative",
        }
    }

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            StrategyKind::Iterative => &["research", "deep"],
            StrategyKind::SinglePass => &["quick", "single"],
            StrategyKind::Contemplative => &["contemplate", "reflect"],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StrategyKind::Iterative => {
                "Iterative plan, search and reflect until confident or out of budget"
            }
            StrategyKind::SinglePass => "One search of the question and a direct answer",
            StrategyKind::Contemplative => "A single passage and a question for reflection",
        }
    }

    /// Instantiate the strategy over a completion client
    pub fn build(&self, client: ResilientClient, config: &ResearchConfig) -> Box<dyn ResearchStrategy> {
        match self {
            StrategyKind::Iterative => Box::new(IterativeResearch::new(client, config)),
            StrategyKind::SinglePass => Box::new(SinglePassResearch::new(client, config)),
            StrategyKind::Contemplative => Box::new(ContemplativeResearch::new(client)),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        StrategyKind::all()
            .into_iter()
            .find(|kind| kind.name() == wanted || kind.aliases().contains(&wanted.as_str()))
            .ok_or_else(|| {
                let known: Vec<&str> = StrategyKind::all().iter().map(|k| k.name()).collect();
                format!("Unknown mode '{}'. Available: {}", s, known.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::types::QueryTier;

    fn classification(tier: QueryTier) -> Classification {
        Classification {
            tier,
            profile: TierProfile::new(5, 5, 0.75, 30),
            antecedent_topic: None,
            complexity: 0.8,
            rationale: String::new(),
            fell_back: false,
        }
    }

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!("deep_research".parse::<StrategyKind>().unwrap(), StrategyKind::Iterative);
        assert_eq!("research".parse::<StrategyKind>().unwrap(), StrategyKind::Iterative);
        assert_eq!("Deep".parse::<StrategyKind>().unwrap(), StrategyKind::Iterative);
        assert_eq!("single-pass".parse::<StrategyKind>().unwrap(), StrategyKind::SinglePass);
        assert_eq!("quick".parse::<StrategyKind>().unwrap(), StrategyKind::SinglePass);
        assert_eq!("reflect".parse::<StrategyKind>().unwrap(), StrategyKind::Contemplative);
        assert_eq!("Contemplate".parse::<StrategyKind>().unwrap(), StrategyKind::Contemplative);
        assert!("telepathy".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_all_names_round_trip() {
        for kind in StrategyKind::all() {
            assert_eq!(kind.name().parse::<StrategyKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), kind.name());
        }
    }

    #[test]
    fn test_single_pass_profile_is_reduced() {
        let client = ResilientClient::new(std::sync::Arc::new(NoProvider));
        let strategy = SinglePassResearch::new(client, &ResearchConfig::default());
        let profile = strategy.profile(&classification(QueryTier::DeepResearch));

        assert_eq!(profile.max_iterations, 1);
        assert_eq!(profile.max_parallel_queries, 1);
        assert_eq!(profile.evidence_cap, SINGLE_PASS_EVIDENCE_CAP);
        assert_eq!(profile.confidence_threshold, 0.75);
    }

    #[tokio::test]
    async fn test_single_pass_plans_seed_without_model() {
        let client = ResilientClient::new(std::sync::Arc::new(NoProvider));
        let strategy = SinglePassResearch::new(client, &ResearchConfig::default());
        let c = classification(QueryTier::DeepResearch);
        let profile = strategy.profile(&c);
        let ctx = PlanningContext {
            question: "How do traditions treat fasting?",
            classification: &c,
            profile: &profile,
            iteration: 1,
            issued_queries: &[],
            last_reflection: None,
            evidence_digest: "",
        };

        let plan = strategy.plan(&ctx).await;
        assert!(!plan.fell_back());
        assert_eq!(plan.value.queries, vec!["How do traditions treat fasting?".to_string()]);
    }

    fn fast_client(provider: impl crate::providers::CompletionProvider + 'static) -> ResilientClient {
        ResilientClient::with_config(
            std::sync::Arc::new(provider),
            crate::config::RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            crate::telemetry::TelemetryCollector::new(),
        )
    }

    fn one_passage_pool() -> EvidencePool {
        let mut pool = EvidencePool::new(1);
        pool.merge(
            vec![
                (
                    "stillness".to_string(),
                    crate::rag::retrieval::RetrievedPassage::new(
                        "Be still, and know that I am God.",
                        "Psalms",
                        0.9,
                    ),
                ),
                (
                    "stillness".to_string(),
                    crate::rag::retrieval::RetrievedPassage::new("Less relevant", "Proverbs", 0.4),
                ),
            ],
            1,
        );
        pool
    }

    fn synthesis_input<'a>(pool: &'a EvidencePool) -> SynthesisInput<'a> {
        SynthesisInput {
            question: "What is stillness?",
            history: &[],
            pool,
            confidence: 0.9,
            stop_reason: StopReason::CapReached,
            iterations: 1,
            low_confidence: false,
        }
    }

    #[test]
    fn test_contemplative_profile_keeps_one_passage() {
        let strategy = ContemplativeResearch::new(fast_client(NoProvider));
        let profile = strategy.profile(&classification(QueryTier::DeepResearch));
        assert_eq!(profile.max_iterations, 1);
        assert_eq!(profile.max_parallel_queries, 1);
        assert_eq!(profile.evidence_cap, 1);
    }

    #[tokio::test]
    async fn test_contemplative_offers_passage_and_question() {
        let strategy = ContemplativeResearch::new(fast_client(Question));
        let pool = one_passage_pool();
        let answer = strategy.synthesize(synthesis_input(&pool)).await;

        assert!(answer.text.contains("Be still, and know that I am God."));
        assert!(answer.text.contains("Psalms"));
        assert!(answer.text.contains("Where in your day is there room for silence?"));
        assert_eq!(answer.citations.len(), 1);
        assert!(answer.caveat.is_none());
    }

    #[tokio::test]
    async fn test_contemplative_falls_back_to_fixed_question() {
        let strategy = ContemplativeResearch::new(fast_client(NoProvider));
        let pool = one_passage_pool();
        let answer = strategy.synthesize(synthesis_input(&pool)).await;

        assert!(answer.text.contains(FALLBACK_QUESTION));
        assert!(answer.text.contains("Psalms"));
        assert_eq!(answer.caveat, Some(Caveat::ProviderDegraded));
    }

    #[tokio::test]
    async fn test_contemplative_without_passage() {
        let strategy = ContemplativeResearch::new(fast_client(Question));
        let pool = EvidencePool::new(1);
        let answer = strategy.synthesize(synthesis_input(&pool)).await;

        assert_eq!(answer.text, NO_PASSAGE_TEXT);
        assert_eq!(answer.caveat, Some(Caveat::InsufficientEvidence));
        assert!(answer.citations.is_empty());
    }

    struct Question;

    #[async_trait]
    impl crate::providers::CompletionProvider for Question {
        async fn complete(
            &self,
            _request: &crate::providers::CompletionRequest,
        ) -> crate::errors::Result<String> {
            Ok("  Where in your day is there room for silence?\n".to_string())
        }

        fn name(&self) -> &str {
            "question"
        }
    }

    struct NoProvider;

    #[async_trait]
    impl crate::providers::CompletionProvider for NoProvider {
        async fn complete(
            &self,
            _request: &crate::providers::CompletionRequest,
        ) -> crate::errors::Result<String> {
            Err(crate::errors::ResearchError::ProviderUnavailable(
                "not used".to_string(),
            ))
        }

        fn name(&self) -> &str {
            "none"
        }
    }
}
