//! Evidence sufficiency assessment
//!
//! The model reports confidence and answerability; the reflector bounds
//! that number by what the pool can actually support. A pool with no
//! sources can never look sufficient, and one source cannot look complete.

use crate::analysis::types::{EvidenceQuality, Reflection};
use crate::providers::{CompletionRequest, CompletionTask};
use crate::rag::context::ContextBuilder;
use crate::rag::evidence::EvidencePool;
use crate::resilience::{ResilientClient, Structured};
use serde::Deserialize;

/// Slack allowed between self-assessed answerability and confidence
const ANSWERABILITY_SLACK: f64 = 0.25;

const REFLECT_SCHEMA: &str = r#"{"confidence": number (0-1), "answerability": number (0-1), "coverage_assessment": string, "evidence_quality": "strong" | "adequate" | "weak" | "insufficient", "gaps": [string], "needs_more_search": boolean, "reasoning": string}"#;

/// Highest confidence a pool covering `sources` distinct sources may claim
pub fn coverage_ceiling(sources: usize) -> f64 {
    match sources {
        0 => 0.25,
        1 => 0.80,
        _ => 1.0,
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ReflectorReply {
    confidence: f64,
    #[serde(default)]
    answerability: Option<f64>,
    #[serde(default)]
    coverage_assessment: String,
    #[serde(default)]
    evidence_quality: String,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default = "default_needs_more_search")]
    needs_more_search: bool,
    #[serde(default)]
    reasoning: String,
}

fn default_needs_more_search() -> bool {
    true
}

/// Scores the current evidence against the question
#[derive(Clone)]
pub struct Reflector {
    client: ResilientClient,
    context: ContextBuilder,
}

impl Reflector {
    pub fn new(client: ResilientClient) -> Self {
        Self {
            client,
            context: ContextBuilder::new(),
        }
    }

    /// Assess the pool after `iteration`. Never fails: unusable model output
    /// yields the conservative fallback reflection.
    pub async fn reflect(
        &self,
        question: &str,
        pool: &EvidencePool,
        iteration: usize,
        issued_queries: &[String],
        new_evidence: usize,
    ) -> Structured<Reflection> {
        let request = self.build_request(question, pool, iteration, issued_queries, new_evidence);

        // Sentinel reply: replaced below when the structured call falls back
        let sentinel = ReflectorReply {
            confidence: 0.0,
            answerability: None,
            coverage_assessment: String::new(),
            evidence_quality: String::new(),
            gaps: Vec::new(),
            needs_more_search: true,
            reasoning: String::new(),
        };
        let reply = self.client.structured(&request, sentinel).await;

        if reply.fell_back() {
            return Structured {
                value: Reflection::fallback(),
                fallback: reply.fallback,
            };
        }

        let reflection = Self::bound(reply.value, pool.distinct_sources().len());
        tracing::info!(
            iteration,
            confidence = reflection.confidence,
            gaps = reflection.gaps.len(),
            needs_more_search = reflection.needs_more_search,
            "Reflection complete"
        );
        Structured::parsed(reflection)
    }

    /// Reflection derived from coverage alone, without a model call
    pub fn coverage_only(pool: &EvidencePool) -> Reflection {
        if pool.is_empty() {
            return Reflection {
                confidence: 0.0,
                evidence_quality: EvidenceQuality::Insufficient,
                gaps: vec!["no passages retrieved".to_string()],
                needs_more_search: false,
                reasoning: "Single pass found no evidence".to_string(),
            };
        }

        let ranked = pool.ranked();
        let top: Vec<f64> = ranked.iter().take(3).map(|i| i.score as f64).collect();
        let mean_top = top.iter().sum::<f64>() / top.len() as f64;
        let sources = pool.distinct_sources().len();
        let confidence = mean_top.clamp(0.0, 1.0).min(coverage_ceiling(sources));

        Reflection {
            confidence,
            evidence_quality: quality_for(confidence),
            gaps: Vec::new(),
            needs_more_search: false,
            reasoning: format!(
                "{} passages from {} sources, mean top score {:.2}",
                pool.len(),
                sources,
                mean_top
            ),
        }
    }

    /// Clamp model confidence by coverage and answerability
    fn bound(reply: ReflectorReply, sources: usize) -> Reflection {
        let mut confidence = reply.confidence.clamp(0.0, 1.0);
        confidence = confidence.min(coverage_ceiling(sources));
        if let Some(answerability) = reply.answerability {
            confidence = confidence.min((answerability.clamp(0.0, 1.0) + ANSWERABILITY_SLACK).min(1.0));
        }

        let gaps: Vec<String> = reply
            .gaps
            .into_iter()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();

        let reasoning = if reply.coverage_assessment.is_empty() {
            reply.reasoning
        } else {
            format!("{} Coverage: {}", reply.reasoning, reply.coverage_assessment)
                .trim()
                .to_string()
        };

        let evidence_quality = match EvidenceQuality::from_label(&reply.evidence_quality) {
            EvidenceQuality::Unknown => quality_for(confidence),
            quality => quality,
        };

        Reflection {
            confidence,
            evidence_quality,
            gaps,
            needs_more_search: reply.needs_more_search,
            reasoning,
        }
    }

    fn build_request(
        &self,
        question: &str,
        pool: &EvidencePool,
        iteration: usize,
        issued_queries: &[String],
        new_evidence: usize,
    ) -> CompletionRequest {
        let sources = pool.distinct_sources();
        let source_list = if sources.is_empty() {
            "none".to_string()
        } else {
            sources.join(", ")
        };

        let prompt = format!(
            "Assess whether the evidence gathered so far is sufficient to answer the question.\n\n\
             Question: {}\n\
             Iteration: {}\n\
             Queries issued so far: {}\n\n\
             Coverage: {} passages from {} distinct sources ({}); {} new this iteration.\n\n\
             Strongest evidence:\n{}\n\n\
             Base confidence on both coverage breadth (how many sources and traditions are \
             represented) and answerability (can the question actually be answered from this \
             evidence). Justify both in your reasoning. List concrete gaps that further searches \
             should target.",
            question,
            iteration,
            issued_queries.join("; "),
            pool.len(),
            sources.len(),
            source_list,
            new_evidence,
            self.context.digest(pool)
        );

        CompletionRequest::new(CompletionTask::Reflect, prompt)
            .with_system("You critically evaluate research evidence. Answer only with JSON.")
            .with_schema(REFLECT_SCHEMA)
    }
}

fn quality_for(confidence: f64) -> EvidenceQuality {
    if confidence >= 0.75 {
        EvidenceQuality::Strong
    } else if confidence >= 0.5 {
        EvidenceQuality::Adequate
    } else if confidence > 0.0 {
        EvidenceQuality::Weak
    } else {
        EvidenceQuality::Insufficient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::errors::Result;
    use crate::providers::CompletionProvider;
    use crate::rag::retrieval::RetrievedPassage;
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

    fn reflector(reply: &str) -> Reflector {
        Reflector::new(ResilientClient::with_config(
            Arc::new(Fixed(reply.to_string())),
            RetryConfig {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            TelemetryCollector::new(),
        ))
    }

    fn pool(sources: &[&str]) -> EvidencePool {
        let mut pool = EvidencePool::new(20);
        pool.merge(
            sources
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    (
                        "q".to_string(),
                        RetrievedPassage::new(format!("passage {}", i), *s, 0.7),
                    )
                })
                .collect::<Vec<_>>(),
            1,
        );
        pool
    }

    #[test]
    fn test_coverage_ceiling() {
        assert_eq!(coverage_ceiling(0), 0.25);
        assert_eq!(coverage_ceiling(1), 0.80);
        assert_eq!(coverage_ceiling(4), 1.0);
    }

    #[tokio::test]
    async fn test_confidence_passes_through_with_coverage() {
        let r = reflector(
            r#"{"confidence": 0.85, "answerability": 0.9, "evidence_quality": "strong", "gaps": [], "needs_more_search": false, "reasoning": "ok"}"#,
        );
        let result = r.reflect("q", &pool(&["bible", "quran"]), 2, &[], 2).await;

        assert!(!result.fell_back());
        assert_eq!(result.value.confidence, 0.85);
        assert_eq!(result.value.evidence_quality, EvidenceQuality::Strong);
    }

    #[tokio::test]
    async fn test_empty_pool_caps_confidence() {
        let r = reflector(r#"{"confidence": 0.95, "gaps": ["everything"], "needs_more_search": true}"#);
        let result = r.reflect("q", &EvidencePool::new(5), 1, &[], 0).await;
        assert_eq!(result.value.confidence, 0.25);
    }

    #[tokio::test]
    async fn test_answerability_caps_confidence() {
        let r = reflector(r#"{"confidence": 0.9, "answerability": 0.3, "gaps": ["x"]}"#);
        let result = r.reflect("q", &pool(&["a", "b"]), 1, &[], 2).await;
        assert!((result.value.confidence - 0.55).abs() < 1e-9);
        assert!(result.value.needs_more_search);
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_clamped() {
        let r = reflector(r#"{"confidence": 7.5, "gaps": []}"#);
        let result = r.reflect("q", &pool(&["a", "b"]), 1, &[], 2).await;
        assert_eq!(result.value.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_malformed_reply_uses_conservative_fallback() {
        let r = reflector("The evidence looks great, I am 100% confident!");
        let result = r.reflect("q", &pool(&["a", "b", "c"]), 1, &[], 3).await;

        assert!(result.fell_back());
        assert_eq!(result.value, Reflection::fallback());
    }

    #[test]
    fn test_coverage_only() {
        let empty = Reflector::coverage_only(&EvidencePool::new(5));
        assert_eq!(empty.confidence, 0.0);
        assert_eq!(empty.evidence_quality, EvidenceQuality::Insufficient);

        let one_source = Reflector::coverage_only(&pool(&["a", "a"]));
        assert!((one_source.confidence - 0.7).abs() < 1e-6);
        assert!(!one_source.needs_more_search);
    }
}
