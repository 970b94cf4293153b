//! Telemetry for research sessions
//!
//! Collects state transitions, retrieval queries, completion calls,
//! retries and fallbacks. A collector is cheap to clone; all clones share
//! the same event log.

use crate::providers::CompletionTask;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// How a single retrieval query ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

/// Telemetry event types
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    StateTransition {
        from: String,
        to: String,
        timestamp: Instant,
    },
    RetrievalQuery {
        query: String,
        outcome: QueryOutcome,
        passages: usize,
        duration_ms: u64,
        timestamp: Instant,
    },
    CompletionCall {
        task: CompletionTask,
        duration_ms: u64,
        success: bool,
        timestamp: Instant,
    },
    RetryAttempt {
        task: CompletionTask,
        attempt: u32,
        timestamp: Instant,
    },
    Fallback {
        task: CompletionTask,
        cause: String,
        timestamp: Instant,
    },
    EvidenceEvicted {
        count: usize,
        timestamp: Instant,
    },
}

/// Aggregated counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryStats {
    pub state_transitions: usize,
    pub retrieval_queries: usize,
    pub retrieval_succeeded: usize,
    pub retrieval_failed: usize,
    pub retrieval_timeouts: usize,
    pub completion_calls: usize,
    pub completion_failures: usize,
    pub retry_attempts: usize,
    pub fallbacks: usize,
    pub evicted_passages: usize,
}

/// Telemetry collector
#[derive(Clone)]
pub struct TelemetryCollector {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
    stats: Arc<Mutex<TelemetryStats>>,
    start_time: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(Mutex::new(TelemetryStats::default())),
            start_time: Instant::now(),
        }
    }

    /// Record an event
    pub fn record(&self, event: TelemetryEvent) {
        {
            let mut stats = lock(&self.stats);
            match &event {
                TelemetryEvent::StateTransition { .. } => stats.state_transitions += 1,
                TelemetryEvent::RetrievalQuery { outcome, .. } => {
                    stats.retrieval_queries += 1;
                    match outcome {
                        QueryOutcome::Succeeded => stats.retrieval_succeeded += 1,
                        QueryOutcome::Failed => stats.retrieval_failed += 1,
                        QueryOutcome::TimedOut => stats.retrieval_timeouts += 1,
                    }
                }
                TelemetryEvent::CompletionCall { success, .. } => {
                    stats.completion_calls += 1;
                    if !success {
                        stats.completion_failures += 1;
                    }
                }
                TelemetryEvent::RetryAttempt { .. } => stats.retry_attempts += 1,
                TelemetryEvent::Fallback { .. } => stats.fallbacks += 1,
                TelemetryEvent::EvidenceEvicted { count, .. } => stats.evicted_passages += count,
            }
        }

        lock(&self.events).push(event);
    }

    pub fn state_transition(&self, from: impl Into<String>, to: impl Into<String>) {
        self.record(TelemetryEvent::StateTransition {
            from: from.into(),
            to: to.into(),
            timestamp: Instant::now(),
        });
    }

    pub fn retrieval_query(&self, query: &str, outcome: QueryOutcome, passages: usize, elapsed: Duration) {
        self.record(TelemetryEvent::RetrievalQuery {
            query: query.to_string(),
            outcome,
            passages,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Instant::now(),
        });
    }

    pub fn completion_call(&self, task: CompletionTask, elapsed: Duration, success: bool) {
        self.record(TelemetryEvent::CompletionCall {
            task,
            duration_ms: elapsed.as_millis() as u64,
            success,
            timestamp: Instant::now(),
        });
    }

    pub fn retry_attempt(&self, task: CompletionTask, attempt: u32) {
        self.record(TelemetryEvent::RetryAttempt {
            task,
            attempt,
            timestamp: Instant::now(),
        });
    }

    pub fn fallback(&self, task: CompletionTask, cause: impl Into<String>) {
        self.record(TelemetryEvent::Fallback {
            task,
            cause: cause.into(),
            timestamp: Instant::now(),
        });
    }

    pub fn evidence_evicted(&self, count: usize) {
        if count > 0 {
            self.record(TelemetryEvent::EvidenceEvicted {
                count,
                timestamp: Instant::now(),
            });
        }
    }

    /// Get current statistics
    pub fn get_stats(&self) -> TelemetryStats {
        lock(&self.stats).clone()
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn event_count(&self) -> usize {
        lock(&self.events).len()
    }

    /// Get recent events (last n)
    pub fn recent_events(&self, n: usize) -> Vec<TelemetryEvent> {
        let events = lock(&self.events);
        let start = events.len().saturating_sub(n);
        events[start..].to_vec()
    }

    /// Share of retrieval queries that returned results
    pub fn retrieval_success_rate(&self) -> f64 {
        let stats = lock(&self.stats);
        if stats.retrieval_queries == 0 {
            1.0
        } else {
            stats.retrieval_succeeded as f64 / stats.retrieval_queries as f64
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TelemetryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCollector")
            .field("events", &self.event_count())
            .finish()
    }
}

impl TelemetryStats {
    /// Multi-line summary for verbose terminal output
    pub fn summary(&self, elapsed: Duration) -> String {
        format!(
            "Duration:            {:.1?}\n\
             State transitions:   {}\n\
             Retrieval queries:   {} ({} ok, {} failed, {} timed out)\n\
             Completion calls:    {} ({} failed)\n\
             Retries:             {}\n\
             Fallbacks:           {}\n\
             Evicted passages:    {}",
            elapsed,
            self.state_transitions,
            self.retrieval_queries,
            self.retrieval_succeeded,
            self.retrieval_failed,
            self.retrieval_timeouts,
            self.completion_calls,
            self.completion_failures,
            self.retry_attempts,
            self.fallbacks,
            self.evicted_passages,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_creation() {
        let collector = TelemetryCollector::new();
        assert_eq!(collector.event_count(), 0);
        assert_eq!(collector.get_stats(), TelemetryStats::default());
    }

    #[test]
    fn test_retrieval_counters() {
        let collector = TelemetryCollector::new();
        collector.retrieval_query("a", QueryOutcome::Succeeded, 3, Duration::from_millis(5));
        collector.retrieval_query("b", QueryOutcome::Failed, 0, Duration::from_millis(5));
        collector.retrieval_query("c", QueryOutcome::TimedOut, 0, Duration::from_millis(5));

        let stats = collector.get_stats();
        assert_eq!(stats.retrieval_queries, 3);
        assert_eq!(stats.retrieval_succeeded, 1);
        assert_eq!(stats.retrieval_failed, 1);
        assert_eq!(stats.retrieval_timeouts, 1);
        assert!((collector.retrieval_success_rate() - 0.333).abs() < 0.01);
    }

    #[test]
    fn test_clones_share_state() {
        let collector = TelemetryCollector::new();
        let clone = collector.clone();
        clone.retry_attempt(CompletionTask::Plan, 1);
        clone.fallback(CompletionTask::Plan, "malformed");
        collector.completion_call(CompletionTask::Plan, Duration::ZERO, false);

        let stats = collector.get_stats();
        assert_eq!(stats.retry_attempts, 1);
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.completion_failures, 1);
        assert_eq!(collector.event_count(), 3);
    }

    #[test]
    fn test_eviction_ignores_zero() {
        let collector = TelemetryCollector::new();
        collector.evidence_evicted(0);
        collector.evidence_evicted(4);
        assert_eq!(collector.event_count(), 1);
        assert_eq!(collector.get_stats().evicted_passages, 4);
    }

    #[test]
    fn test_recent_events() {
        let collector = TelemetryCollector::new();
        for i in 0..10 {
            collector.state_transition(format!("s{}", i), format!("s{}", i + 1));
        }
        assert_eq!(collector.recent_events(3).len(), 3);
    }

    #[test]
    fn test_summary_mentions_counters() {
        let stats = TelemetryStats {
            retrieval_queries: 7,
            ..TelemetryStats::default()
        };
        assert!(stats.summary(Duration::from_secs(1)).contains("Retrieval queries:   7"));
    }
}
