//! Question complexity estimation and tier classification
//!
//! Two stages:
//! - `ComplexityEstimator`: bounded heuristic score in [0.0, 1.0] plus
//!   follow-up detection, computed locally with no model call
//! - `QuestionClassifier`: asks the model for a tier, passing the heuristic
//!   hint along; any failure degrades to `QueryTier::FALLBACK`

use crate::planning::types::{Classification, QueryTier, TierProfiles};
use crate::providers::{CompletionRequest, CompletionTask};
use crate::resilience::{ResilientClient, Structured};
use crate::types::messages::{clip, format_history, last_user_turn, recent_turns};
use crate::types::ConversationTurn;
use serde::Deserialize;

/// Words that signal a comparison across sources
const COMPARISON_MARKERS: &[&str] = &[
    "compar", "contrast", "differ", "versus", "vs", "similar", "between",
];

/// Words that signal breadth (several traditions, several angles)
const BREADTH_MARKERS: &[&str] = &[
    "tradition", "religion", "faith", "two", "three", "four", "several", "various",
    "multiple", "different", "across", "each", "world",
];

/// Words that signal analytical rather than lookup questions
const ANALYSIS_MARKERS: &[&str] = &[
    "how", "why", "explain", "analy", "interpret", "significan", "meaning",
    "relationship", "evolv", "evolution", "influence", "role",
];

/// Anaphora and back-references typical of follow-up questions
const FOLLOW_UP_MARKERS: &[&str] = &[
    "it", "its", "that", "this", "those", "these", "they", "them", "their", "he",
    "she", "his", "her", "earlier", "mentioned", "above", "previous", "previously",
    "also", "else",
];

const FOLLOW_UP_PHRASES: &[&str] = &["what about", "how about", "tell me more", "and the"];

/// Follow-ups are short; long questions stand on their own
const FOLLOW_UP_MAX_WORDS: usize = 12;

/// Longest antecedent carried into the planner
const ANTECEDENT_MAX_CHARS: usize = 160;

const CLASSIFY_SCHEMA: &str = r#"{"tier": "simple_factual" | "follow_up_clarification" | "moderate_research" | "deep_research", "antecedent_topic": string | null, "reasoning": string}"#;

/// Heuristic complexity estimator with 4-factor weighted scoring
#[derive(Debug, Clone)]
pub struct ComplexityEstimator {
    /// Weight for question length (0.20)
    weight_length: f64,

    /// Weight for comparison markers (0.30)
    weight_comparison: f64,

    /// Weight for breadth markers (0.25)
    weight_breadth: f64,

    /// Weight for analytical markers (0.25)
    weight_analysis: f64,
}

impl Default for ComplexityEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplexityEstimator {
    pub fn new() -> Self {
        Self {
            weight_length: 0.20,
            weight_comparison: 0.30,
            weight_breadth: 0.25,
            weight_analysis: 0.25,
        }
    }

    /// Estimate complexity of a question
    ///
    /// Returns: complexity score ∈ [0.0, 1.0]
    ///
    /// Formula:
    /// complexity = 0.20 × length + 0.30 × comparison
    ///            + 0.25 × breadth + 0.25 × analysis
    pub fn estimate(&self, question: &str) -> f64 {
        let tokens = tokenize(question);

        let length = (tokens.len() as f64 / 30.0).min(1.0);
        let comparison = if count_markers(&tokens, COMPARISON_MARKERS) > 0 {
            1.0
        } else {
            0.0
        };
        let breadth = (count_markers(&tokens, BREADTH_MARKERS) as f64 / 2.0).min(1.0);
        let analysis = (count_markers(&tokens, ANALYSIS_MARKERS) as f64 / 3.0).min(1.0);

        let complexity = self.weight_length * length
            + self.weight_comparison * comparison
            + self.weight_breadth * breadth
            + self.weight_analysis * analysis;

        complexity.clamp(0.0, 1.0)
    }

    /// Short, anaphoric question asked after earlier conversation
    pub fn is_follow_up(&self, question: &str, history: &[ConversationTurn]) -> bool {
        if history.is_empty() {
            return false;
        }

        let tokens = tokenize(question);
        if tokens.is_empty() || tokens.len() > FOLLOW_UP_MAX_WORDS {
            return false;
        }

        let lower = question.to_lowercase();
        FOLLOW_UP_PHRASES.iter().any(|p| lower.contains(p))
            || tokens
                .iter()
                .any(|t| FOLLOW_UP_MARKERS.contains(&t.as_str()))
    }

    /// Tier suggested by the heuristics alone
    pub fn hint(&self, complexity: f64, follow_up: bool) -> QueryTier {
        if follow_up {
            QueryTier::FollowUpClarification
        } else if complexity < 0.25 {
            QueryTier::SimpleFactual
        } else if complexity < 0.55 {
            QueryTier::ModerateResearch
        } else {
            QueryTier::DeepResearch
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Number of distinct markers with at least one token starting with them
fn count_markers(tokens: &[String], markers: &[&str]) -> usize {
    markers
        .iter()
        .filter(|m| {
            let m: &str = m;
            tokens.iter().any(|t| {
                if m.len() <= 3 {
                    t == m
                } else {
                    t.starts_with(m)
                }
            })
        })
        .count()
}

/// Raw classifier reply from the model
#[derive(Debug, Clone, Deserialize)]
struct ClassifierReply {
    tier: String,
    #[serde(default)]
    antecedent_topic: Option<String>,
    #[serde(default)]
    reasoning: String,
}

impl ClassifierReply {
    fn fallback() -> Self {
        Self {
            tier: QueryTier::FALLBACK.as_str().to_string(),
            antecedent_topic: None,
            reasoning: String::new(),
        }
    }
}

/// Maps a question plus recent conversation to a tier
#[derive(Clone)]
pub struct QuestionClassifier {
    client: ResilientClient,
    estimator: ComplexityEstimator,
    profiles: TierProfiles,
    history_turns: usize,
}

impl QuestionClassifier {
    pub fn new(client: ResilientClient, profiles: TierProfiles, history_turns: usize) -> Self {
        Self {
            client,
            estimator: ComplexityEstimator::new(),
            profiles,
            history_turns,
        }
    }

    /// Classify a question. Never fails; the returned wrapper records
    /// whether the fallback tier was substituted and why.
    pub async fn classify(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Structured<Classification> {
        let complexity = self.estimator.estimate(question);
        let follow_up = self.estimator.is_follow_up(question, history);
        let hint = self.estimator.hint(complexity, follow_up);

        let request = self.build_request(question, history, hint);
        let reply = self
            .client
            .structured(&request, ClassifierReply::fallback())
            .await;

        if let Some(cause) = reply.fallback {
            return Structured {
                value: self.fallback_classification(complexity, "classifier output unavailable"),
                fallback: Some(cause),
            };
        }

        let tier = match reply.value.tier.parse::<QueryTier>() {
            Ok(tier) => tier,
            Err(e) => {
                tracing::warn!(tier = %reply.value.tier, "Unrecognised tier, using fallback: {}", e);
                return Structured::parsed(
                    self.fallback_classification(complexity, "unrecognised tier from classifier"),
                );
            }
        };

        let antecedent_topic = if tier == QueryTier::FollowUpClarification {
            reply
                .value
                .antecedent_topic
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .or_else(|| last_user_turn(history).map(|t| t.content.trim().to_string()))
                .map(|t| clip(&t, ANTECEDENT_MAX_CHARS))
        } else {
            None
        };

        tracing::info!(%tier, %hint, complexity, "Question classified");

        Structured::parsed(Classification {
            tier,
            profile: self.profiles.get(tier),
            antecedent_topic,
            complexity,
            rationale: reply.value.reasoning,
            fell_back: false,
        })
    }

    fn fallback_classification(&self, complexity: f64, reason: &str) -> Classification {
        Classification {
            tier: QueryTier::FALLBACK,
            profile: self.profiles.get(QueryTier::FALLBACK),
            antecedent_topic: None,
            complexity,
            rationale: reason.to_string(),
            fell_back: true,
        }
    }

    fn build_request(
        &self,
        question: &str,
        history: &[ConversationTurn],
        hint: QueryTier,
    ) -> CompletionRequest {
        let recent = recent_turns(history, self.history_turns);
        let history_block = if recent.is_empty() {
            "(no earlier conversation)".to_string()
        } else {
            format_history(recent, 200)
        };

        let prompt = format!(
            "Classify the complexity of a question about religious and sacred texts.\n\n\
             Tiers:\n\
             - simple_factual: a single fact answerable from one or two passages\n\
             - follow_up_clarification: a short question that depends on the earlier conversation; \
               name the earlier topic in antecedent_topic\n\
             - moderate_research: needs several passages or a couple of angles\n\
             - deep_research: comparative, multi-tradition or analytical questions\n\n\
             Earlier conversation:\n{}\n\
             Question: {}\n\n\
             A heuristic pre-check suggests: {}",
            history_block, question, hint
        );

        CompletionRequest::new(CompletionTask::Classify, prompt)
            .with_system("You route research questions. Answer only with JSON.")
            .with_schema(CLASSIFY_SCHEMA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::errors::Result;
    use crate::providers::CompletionProvider;
    use crate::telemetry::TelemetryCollector;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Fixed(String);

    #[async_trait]
    impl CompletionProvider for Fixed {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn classifier(reply: &str) -> QuestionClassifier {
        let client = ResilientClient::with_config(
            Arc::new(Fixed(reply.to_string())),
            RetryConfig {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            TelemetryCollector::new(),
        );
        QuestionClassifier::new(client, TierProfiles::default(), 3)
    }

    fn river_history() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("Tell me about the Jordan River"),
            ConversationTurn::assistant("The Jordan River appears throughout the Hebrew Bible..."),
        ]
    }

    #[test]
    fn test_estimate_bounds() {
        let estimator = ComplexityEstimator::new();
        let simple = estimator.estimate("What is dharma?");
        let deep = estimator.estimate("Compare how three traditions treat forgiveness");
        assert!((0.0..=1.0).contains(&simple));
        assert!((0.0..=1.0).contains(&deep));
        assert!(deep > simple);
    }

    #[test]
    fn test_hint_tiers() {
        let estimator = ComplexityEstimator::new();
        let simple = estimator.estimate("What is dharma?");
        assert_eq!(estimator.hint(simple, false), QueryTier::SimpleFactual);

        let deep = estimator.estimate("Compare how three traditions treat forgiveness");
        assert_eq!(estimator.hint(deep, false), QueryTier::DeepResearch);
    }

    #[test]
    fn test_follow_up_detection() {
        let estimator = ComplexityEstimator::new();
        let question = "What is the capital relationship mentioned earlier?";
        assert!(estimator.is_follow_up(question, &river_history()));
        assert!(!estimator.is_follow_up(question, &[]));
        assert!(!estimator.is_follow_up("Who wrote the Tao Te Ching?", &river_history()));
    }

    #[test]
    fn test_marker_matching_is_token_based() {
        let tokens = tokenize("Show me the Psalms");
        assert_eq!(count_markers(&tokens, ANALYSIS_MARKERS), 0);
        let tokens = tokenize("Comparing scriptures");
        assert_eq!(count_markers(&tokens, COMPARISON_MARKERS), 1);
    }

    #[tokio::test]
    async fn test_classify_deep() {
        let c = classifier(r#"{"tier": "deep_research", "reasoning": "comparative"}"#);
        let result = c
            .classify("Compare how three traditions treat forgiveness", &[])
            .await;

        assert!(!result.fell_back());
        assert_eq!(result.value.tier, QueryTier::DeepResearch);
        assert_eq!(result.value.profile, TierProfiles::default().deep_research);
        assert!(result.value.antecedent_topic.is_none());
    }

    #[tokio::test]
    async fn test_follow_up_antecedent_from_history() {
        let c = classifier(r#"{"tier": "follow_up_clarification", "reasoning": "refers back"}"#);
        let result = c
            .classify("What is the capital relationship mentioned earlier?", &river_history())
            .await;

        assert_eq!(result.value.tier, QueryTier::FollowUpClarification);
        assert_eq!(
            result.value.antecedent_topic.as_deref(),
            Some("Tell me about the Jordan River")
        );
    }

    #[tokio::test]
    async fn test_follow_up_antecedent_from_model() {
        let c = classifier(
            r#"{"tier": "follow_up_clarification", "antecedent_topic": "the Jordan River", "reasoning": ""}"#,
        );
        let result = c.classify("What about its source?", &river_history()).await;
        assert_eq!(result.value.antecedent_topic.as_deref(), Some("the Jordan River"));
    }

    #[tokio::test]
    async fn test_malformed_output_falls_back_to_moderate() {
        let c = classifier("this is definitely a deep question");
        let result = c.classify("What is dharma?", &[]).await;

        assert!(result.fell_back());
        assert_eq!(result.value.tier, QueryTier::ModerateResearch);
        assert!(result.value.fell_back);
    }

    #[tokio::test]
    async fn test_unknown_tier_falls_back_to_moderate() {
        let c = classifier(r#"{"tier": "cosmic", "reasoning": "?"}"#);
        let result = c.classify("What is dharma?", &[]).await;

        assert_eq!(result.value.tier, QueryTier::ModerateResearch);
        assert!(result.value.fell_back);
        assert!(!result.fell_back());
    }
}
