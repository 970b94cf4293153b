//! Research controller - main coordinator
//!
//! Drives one session per question through the state machine:
//! classify, then plan/search/reflect until the termination policy stops
//! the loop, then synthesize. Cancellation and provider degradation are
//! checked at every transition boundary. Every run emits exactly one
//! terminal progress event.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::agent::events::{EventBus, ProgressEvent};
use crate::agent::session::ResearchSession;
use crate::agent::state::StateEvent;
use crate::agent::strategy::{ReflectInput, ResearchStrategy, StrategyKind};
use crate::analysis::convergence::{PolicyConfig, TerminationPolicy};
use crate::analysis::types::{Decision, StopReason};
use crate::config::{Config, ResearchConfig};
use crate::errors::{ResearchError, Result};
use crate::planning::complexity::QuestionClassifier;
use crate::planning::planner::PlanningContext;
use crate::planning::types::{Classification, TierProfile};
use crate::providers::{create_provider, CompletionProvider};
use crate::rag::context::ContextBuilder;
use crate::rag::evidence::EvidencePool;
use crate::rag::retrieval::{QdrantRetriever, RetrievalCoordinator, Retriever};
use crate::rag::synthesizer::{ResearchAnswer, SynthesisInput};
use crate::resilience::ResilientClient;
use crate::telemetry::{TelemetryCollector, TelemetryStats};
use crate::types::ConversationTurn;

/// Everything a finished session produced
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub answer: ResearchAnswer,
    pub session: ResearchSession,
    pub stats: TelemetryStats,
    pub elapsed: Duration,
}

/// Per-run components; nothing here outlives one session
struct SessionParts {
    telemetry: TelemetryCollector,
    classifier: QuestionClassifier,
    strategy: Box<dyn ResearchStrategy>,
    coordinator: RetrievalCoordinator,
    context: ContextBuilder,
}

/// Main research controller
pub struct ResearchController {
    provider: Arc<dyn CompletionProvider>,
    retriever: Arc<dyn Retriever>,
    research: ResearchConfig,
    search_k: usize,
    query_timeout: Duration,
    strategy: StrategyKind,
}

impl ResearchController {
    /// Create a controller over explicit adapters
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        retriever: Arc<dyn Retriever>,
        config: &Config,
    ) -> Self {
        Self {
            provider,
            retriever,
            research: config.research.clone(),
            search_k: config.retrieval.search_k,
            query_timeout: Duration::from_millis(config.retrieval.query_timeout_ms),
            strategy: StrategyKind::default(),
        }
    }

    /// Create a controller backed by the configured provider and Qdrant
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = create_provider(&config.provider)?;
        let retriever: Arc<dyn Retriever> = Arc::new(QdrantRetriever::from_config(config)?);
        Ok(Self::new(provider, retriever, config))
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Research one question.
    ///
    /// Only cancellation (or an internal state-machine fault) returns an
    /// error; every other failure degrades into a caveated answer.
    pub async fn run(
        &self,
        question: &str,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
        events: &EventBus,
    ) -> Result<ResearchOutcome> {
        let parts = self.session_parts();
        let mut session = ResearchSession::new(question).with_telemetry(parts.telemetry.clone());

        tracing::info!(
            session = %session.id,
            strategy = %self.strategy,
            provider = self.provider.name(),
            "Research session started"
        );

        match self.drive(&parts, &mut session, history, cancel, events).await {
            Ok(answer) => {
                let elapsed = parts.telemetry.elapsed();
                tracing::info!(
                    session = %session.id,
                    stop_reason = %answer.stop_reason,
                    iterations = answer.iterations,
                    evidence = answer.evidence_count,
                    "Research session complete"
                );
                events
                    .emit(ProgressEvent::Done {
                        answer: answer.clone(),
                    })
                    .await;
                Ok(ResearchOutcome {
                    answer,
                    stats: parts.telemetry.get_stats(),
                    session,
                    elapsed,
                })
            }
            Err(e) => {
                if matches!(e, ResearchError::Cancelled) && !session.state().is_terminal() {
                    if let Err(fault) = session.apply(StateEvent::Cancel) {
                        tracing::warn!(error = %fault, "Could not record cancellation");
                    }
                }
                tracing::warn!(session = %session.id, error = %e, "Research session ended without an answer");
                events
                    .emit(ProgressEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    fn session_parts(&self) -> SessionParts {
        let telemetry = TelemetryCollector::new();
        let client = ResilientClient::with_config(
            Arc::clone(&self.provider),
            self.research.retry,
            telemetry.clone(),
        );
        SessionParts {
            classifier: QuestionClassifier::new(
                client.clone(),
                self.research.tiers.clone(),
                self.research.history_turns,
            ),
            strategy: self.strategy.build(client, &self.research),
            coordinator: RetrievalCoordinator::new(
                Arc::clone(&self.retriever),
                self.search_k,
                self.query_timeout,
                telemetry.clone(),
            ),
            context: ContextBuilder::new(),
            telemetry,
        }
    }

    async fn drive(
        &self,
        parts: &SessionParts,
        session: &mut ResearchSession,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
        events: &EventBus,
    ) -> Result<ResearchAnswer> {
        let question = session.question.clone();
        check_cancelled(cancel)?;

        // Classifying
        let classified = parts.classifier.classify(&question, history).await;
        let failures = session.record_provider_outcome(classified.provider_failed());
        let classification = classified.value;
        let profile = parts.strategy.profile(&classification);
        let policy = TerminationPolicy::with_config(
            classification.tier,
            profile,
            PolicyConfig {
                stop_on_stagnation: self.research.stop_on_stagnation,
                max_provider_failures: self.research.max_provider_failures,
            },
        );
        session.classification = Some(classification.clone());

        events
            .emit(ProgressEvent::ClassificationDone {
                tier: classification.tier,
                profile,
                antecedent_topic: classification.antecedent_topic.clone(),
                fell_back: classification.fell_back,
            })
            .await;

        let mut pool = EvidencePool::new(profile.evidence_cap);
        check_cancelled(cancel)?;

        let stop_reason = match policy.after_provider_failures(failures) {
            Decision::Stop(reason) => {
                session.apply(StateEvent::Stop)?;
                reason
            }
            Decision::Continue => {
                session.apply(StateEvent::Classified)?;
                self.research_loop(
                    parts,
                    session,
                    &classification,
                    &profile,
                    &policy,
                    &mut pool,
                    cancel,
                    events,
                )
                .await?
            }
        };

        // Synthesizing
        session.set_stop_reason(stop_reason);
        events
            .emit(ProgressEvent::Synthesizing {
                stop_reason,
                evidence_count: pool.len(),
            })
            .await;
        check_cancelled(cancel)?;

        let confidence = match (stop_reason, session.last_reflection()) {
            (_, Some(reflection)) => reflection.confidence,
            (StopReason::AnsweredWithoutSearch, None) => session
                .iterations()
                .first()
                .map(|record| record.plan.confidence)
                .unwrap_or(0.0),
            _ => 0.0,
        };

        let answer = parts
            .strategy
            .synthesize(SynthesisInput {
                question: &question,
                history,
                pool: &pool,
                confidence,
                stop_reason,
                iterations: session.iteration_count(),
                low_confidence: policy.is_low_confidence(confidence),
            })
            .await;

        check_cancelled(cancel)?;
        session.apply(StateEvent::AnswerReady)?;
        Ok(answer)
    }

    /// Plan/search/reflect until the policy stops the loop. Returns why.
    #[allow(clippy::too_many_arguments)]
    async fn research_loop(
        &self,
        parts: &SessionParts,
        session: &mut ResearchSession,
        classification: &Classification,
        profile: &TierProfile,
        policy: &TerminationPolicy,
        pool: &mut EvidencePool,
        cancel: &CancellationToken,
        events: &EventBus,
    ) -> Result<StopReason> {
        let question = session.question.clone();

        loop {
            check_cancelled(cancel)?;
            let iteration = session.iteration_count() + 1;

            // Planning
            let digest = parts.context.digest(pool);
            let issued = session.issued_queries().to_vec();
            let last_reflection = session.last_reflection().cloned();
            let ctx = PlanningContext {
                question: &question,
                classification,
                profile,
                iteration,
                issued_queries: &issued,
                last_reflection: last_reflection.as_ref(),
                evidence_digest: &digest,
            };
            let planned = parts.strategy.plan(&ctx).await;
            let failures = session.record_provider_outcome(planned.provider_failed());
            let plan = planned.value;

            tracing::info!(
                iteration,
                queries = plan.queries.len(),
                needs_more_search = plan.needs_more_search,
                fell_back = planned.fallback.is_some(),
                "Plan ready"
            );
            events
                .emit(ProgressEvent::PlanReady {
                    iteration,
                    queries: plan.queries.clone(),
                    needs_more_search: plan.needs_more_search,
                    rationale: plan.rationale.clone(),
                })
                .await;
            session.begin_iteration(plan.clone());
            check_cancelled(cancel)?;

            if let Decision::Stop(reason) = policy.after_plan(iteration, &plan) {
                let event = if reason == StopReason::AnsweredWithoutSearch {
                    StateEvent::PlanAnswerable
                } else {
                    StateEvent::Stop
                };
                session.apply(event)?;
                return Ok(reason);
            }
            if let Decision::Stop(reason) = policy.after_provider_failures(failures) {
                tracing::warn!(iteration, failures, "Provider degraded; stopping early");
                session.apply(StateEvent::Stop)?;
                return Ok(reason);
            }

            // Searching
            session.apply(StateEvent::PlanReady)?;
            events
                .emit(ProgressEvent::Searching {
                    iteration,
                    queries: plan.queries.clone(),
                })
                .await;

            let round = parts
                .coordinator
                .search_all(&plan.queries, profile.max_parallel_queries, cancel)
                .await?;
            session.record_queries(&plan.queries);

            let report = pool.merge(round.passages, iteration);
            if report.evicted > 0 {
                parts.telemetry.evidence_evicted(report.evicted);
            }
            let contributed: Vec<String> = pool
                .contributed_in(iteration)
                .into_iter()
                .map(|item| item.key.clone())
                .collect();
            let new_evidence = contributed.len();

            events
                .emit(ProgressEvent::SearchDone {
                    iteration,
                    new_evidence,
                    total_evidence: pool.len(),
                    failures: round.failures.clone(),
                })
                .await;
            if let Some(record) = session.current_iteration_mut() {
                record.failures = round.failures;
                record.contributed = contributed;
            }
            session.apply(StateEvent::SearchComplete)?;
            check_cancelled(cancel)?;

            // Reflecting
            events.emit(ProgressEvent::Reflecting { iteration }).await;
            let issued = session.issued_queries().to_vec();
            let reflected = parts
                .strategy
                .reflect(ReflectInput {
                    question: &question,
                    pool: &*pool,
                    iteration,
                    issued_queries: &issued,
                    new_evidence,
                })
                .await;
            let failures = session.record_provider_outcome(reflected.provider_failed());
            let reflection = reflected.value;

            events
                .emit(ProgressEvent::ReflectionDone {
                    iteration,
                    confidence: reflection.confidence,
                    gaps: reflection.gaps.clone(),
                    needs_more_search: reflection.needs_more_search,
                })
                .await;

            let decision = policy.after_iteration(iteration, &reflection, new_evidence, failures);
            if let Some(record) = session.current_iteration_mut() {
                record.reflection = Some(reflection);
            }
            check_cancelled(cancel)?;

            match decision {
                Decision::Stop(reason) => {
                    tracing::info!(iteration, %reason, "Research loop stopping");
                    session.apply(StateEvent::Stop)?;
                    return Ok(reason);
                }
                Decision::Continue => {
                    session.apply(StateEvent::Continue)?;
                }
            }
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(ResearchError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::ResearchState;
    use crate::providers::CompletionRequest;
    use crate::rag::retrieval::RetrievedPassage;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl CompletionProvider for Echo {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            use crate::providers::CompletionTask::*;
            Ok(match request.task {
                Classify => r#"{"tier": "simple_factual", "reasoning": "one fact"}"#,
                Plan => r#"{"needs_more_search": true, "queries": ["who wrote the Tao Te Ching"], "rationale": "look it up", "confidence": 0.2}"#,
                Reflect => r#"{"confidence": 0.9, "answerability": 0.9, "gaps": [], "needs_more_search": false, "reasoning": "clear"}"#,
                Synthesize => "Laozi is the traditional author [1].",
            }
            .to_string())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct TwoSources;

    #[async_trait]
    impl Retriever for TwoSources {
        async fn search(&self, query: &str, _limit: usize) -> Result<Vec<RetrievedPassage>> {
            Ok(vec![
                RetrievedPassage::new(format!("{} / a", query), "tao_te_ching", 0.9),
                RetrievedPassage::new(format!("{} / b", query), "zhuangzi", 0.8),
            ])
        }
    }

    fn controller() -> ResearchController {
        let mut config = Config::default();
        config.research.retry.base_delay_ms = 1;
        config.research.retry.max_delay_ms = 1;
        ResearchController::new(Arc::new(Echo), Arc::new(TwoSources), &config)
    }

    #[tokio::test]
    async fn test_single_iteration_session() {
        let (bus, mut rx) = EventBus::new();
        let outcome = controller()
            .run("Who wrote the Tao Te Ching?", &[], &CancellationToken::new(), &bus)
            .await
            .unwrap();
        drop(bus);

        assert_eq!(outcome.answer.stop_reason, StopReason::ConfidenceReached);
        assert_eq!(outcome.answer.iterations, 1);
        assert_eq!(outcome.session.state(), ResearchState::Done);
        assert!(outcome.stats.retrieval_queries >= 1);
        assert_eq!(outcome.stats.retrieval_queries, outcome.session.retrieval_calls());

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind());
        }
        assert_eq!(kinds.first(), Some(&"classification_done"));
        assert_eq!(kinds.last(), Some(&"done"));
        assert_eq!(kinds.iter().filter(|k| **k == "done" || **k == "error").count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (bus, mut rx) = EventBus::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = controller().run("q", &[], &cancel, &bus).await;
        drop(bus);

        assert!(matches!(result, Err(ResearchError::Cancelled)));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "error");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_single_pass_strategy() {
        let (bus, _rx) = EventBus::new();
        let outcome = controller()
            .with_strategy(StrategyKind::SinglePass)
            .run("How do traditions treat fasting?", &[], &CancellationToken::new(), &bus)
            .await
            .unwrap();

        assert_eq!(outcome.answer.iterations, 1);
        assert!(outcome.answer.evidence_count <= 5);
        // classify and synthesize only
        assert_eq!(outcome.stats.completion_calls, 2);
    }

    #[tokio::test]
    async fn test_contemplative_strategy() {
        let (bus, _rx) = EventBus::new();
        let outcome = controller()
            .with_strategy(StrategyKind::Contemplative)
            .run("What is stillness?", &[], &CancellationToken::new(), &bus)
            .await
            .unwrap();

        assert_eq!(outcome.answer.iterations, 1);
        assert_eq!(outcome.answer.evidence_count, 1);
        assert_eq!(outcome.answer.citations.len(), 1);
        assert_eq!(outcome.answer.citations[0].source_id, "tao_te_ching");
        assert!(outcome.answer.text.contains("What is stillness? / a"));
        assert_eq!(outcome.stats.completion_calls, 2);
    }
}
