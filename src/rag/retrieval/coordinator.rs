// Parallel retrieval: fan out one iteration's queries, gather as they finish
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{RetrievedPassage, Retriever};
use crate::errors::{ResearchError, Result};
use crate::telemetry::{QueryOutcome, TelemetryCollector};

/// A query that contributed no evidence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFailure {
    pub query: String,
    pub reason: String,
    pub timed_out: bool,
}

/// Everything one iteration's searches produced, in query order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRound {
    /// `(originating query, passage)` pairs ready for the pool merge
    pub passages: Vec<(String, RetrievedPassage)>,
    pub failures: Vec<QueryFailure>,
    /// Number of retriever calls issued
    pub calls: usize,
}

enum Outcome {
    Found(Vec<RetrievedPassage>),
    Failed(String),
    TimedOut,
}

/// Runs queries concurrently against a retriever
#[derive(Clone)]
pub struct RetrievalCoordinator {
    retriever: Arc<dyn Retriever>,
    search_k: usize,
    query_timeout: Duration,
    telemetry: TelemetryCollector,
}

impl RetrievalCoordinator {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        search_k: usize,
        query_timeout: Duration,
        telemetry: TelemetryCollector,
    ) -> Self {
        Self {
            retriever,
            search_k,
            query_timeout,
            telemetry,
        }
    }

    /// Search every query with at most `max_parallel` in flight.
    ///
    /// Each query is bounded by its own timeout; failures are recorded and
    /// the rest still count. Results come back in query order regardless of
    /// completion order. Cancellation aborts in-flight queries and discards
    /// whatever they would have returned.
    pub async fn search_all(
        &self,
        queries: &[String],
        max_parallel: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchRound> {
        if queries.is_empty() {
            return Ok(SearchRound::default());
        }

        let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
        let mut tasks = JoinSet::new();

        for (index, query) in queries.iter().enumerate() {
            let retriever = Arc::clone(&self.retriever);
            let semaphore = Arc::clone(&semaphore);
            let query = query.clone();
            let limit = self.search_k;
            let timeout = self.query_timeout;

            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        match tokio::time::timeout(timeout, retriever.search(&query, limit)).await {
                            Ok(Ok(passages)) => Outcome::Found(passages),
                            Ok(Err(e)) => Outcome::Failed(e.to_string()),
                            Err(_) => Outcome::TimedOut,
                        }
                    }
                    Err(_) => Outcome::Failed("worker pool closed".to_string()),
                };
                (index, query, outcome, started.elapsed())
            });
        }

        let mut completed = Vec::with_capacity(queries.len());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    tracing::info!(in_flight = tasks.len(), "Retrieval cancelled");
                    return Err(ResearchError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(entry)) => completed.push(entry),
                    Some(Err(e)) => tracing::warn!("Retrieval task aborted: {}", e),
                    None => break,
                }
            }
        }

        completed.sort_by_key(|(index, ..)| *index);

        let mut round = SearchRound {
            calls: queries.len(),
            ..SearchRound::default()
        };

        for (_, query, outcome, elapsed) in completed {
            match outcome {
                Outcome::Found(passages) => {
                    tracing::debug!(%query, passages = passages.len(), "Query returned");
                    self.telemetry
                        .retrieval_query(&query, QueryOutcome::Succeeded, passages.len(), elapsed);
                    round
                        .passages
                        .extend(passages.into_iter().map(|p| (query.clone(), p)));
                }
                Outcome::Failed(reason) => {
                    tracing::warn!(%query, %reason, "Retrieval query failed");
                    self.telemetry
                        .retrieval_query(&query, QueryOutcome::Failed, 0, elapsed);
                    round.failures.push(QueryFailure {
                        query,
                        reason,
                        timed_out: false,
                    });
                }
                Outcome::TimedOut => {
                    tracing::warn!(%query, timeout_ms = self.query_timeout.as_millis() as u64, "Retrieval query timed out");
                    self.telemetry
                        .retrieval_query(&query, QueryOutcome::TimedOut, 0, elapsed);
                    round.failures.push(QueryFailure {
                        query,
                        reason: format!("timed out after {}ms", self.query_timeout.as_millis()),
                        timed_out: true,
                    });
                }
            }
        }

        Ok(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers by query text: "slow" sleeps, "fail" errors, others echo
    struct Stub {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Stub {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Retriever for Stub {
        async fn search(&self, query: &str, _limit: usize) -> Result<Vec<RetrievedPassage>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let result = match query {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(vec![])
                }
                "fail" => Err(ResearchError::StoreUnavailable("connection refused".to_string())),
                _ => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(vec![RetrievedPassage::new(format!("about {}", query), query, 0.5)])
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn coordinator(stub: Arc<Stub>, telemetry: TelemetryCollector) -> RetrievalCoordinator {
        RetrievalCoordinator::new(stub, 5, Duration::from_millis(100), telemetry)
    }

    fn queries(qs: &[&str]) -> Vec<String> {
        qs.iter().map(|q| q.to_string()).collect()
    }

    #[tokio::test]
    async fn test_partial_failures_do_not_fail_round() {
        let telemetry = TelemetryCollector::new();
        let c = coordinator(Stub::new(), telemetry.clone());
        let round = c
            .search_all(&queries(&["karma", "slow", "fail", "dharma"]), 4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(round.calls, 4);
        assert_eq!(round.passages.len(), 2);
        assert_eq!(round.passages[0].0, "karma");
        assert_eq!(round.passages[1].0, "dharma");
        assert_eq!(round.failures.len(), 2);
        assert!(round.failures.iter().any(|f| f.query == "slow" && f.timed_out));
        assert!(round.failures.iter().any(|f| f.query == "fail" && !f.timed_out));

        let stats = telemetry.get_stats();
        assert_eq!(stats.retrieval_timeouts, 1);
        assert_eq!(stats.retrieval_failed, 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let stub = Stub::new();
        let c = coordinator(stub.clone(), TelemetryCollector::new());
        c.search_all(&queries(&["a", "b", "c", "d", "e"]), 2, &CancellationToken::new())
            .await
            .unwrap();

        assert!(stub.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_query_list_is_noop() {
        let stub = Stub::new();
        let c = coordinator(stub.clone(), TelemetryCollector::new());
        let round = c.search_all(&[], 3, &CancellationToken::new()).await.unwrap();
        assert_eq!(round, SearchRound::default());
        assert_eq!(stub.peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_discards_in_flight() {
        let c = RetrievalCoordinator::new(
            Stub::new(),
            5,
            Duration::from_secs(30),
            TelemetryCollector::new(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = c.search_all(&queries(&["slow", "slow"]), 2, &cancel).await;
        assert!(matches!(result, Err(ResearchError::Cancelled)));
    }
}
