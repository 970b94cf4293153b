//! Resilience layer around completion calls
//!
//! Every structured call goes through [`ResilientClient::structured`], which
//! parses, retries with backoff, and finally substitutes the caller's
//! conservative fallback. It never returns an error. Free-text calls go
//! through [`ResilientClient::text`], which retries but reports failure so
//! the caller can pick its own degraded answer.

pub mod parser;
pub mod retry;

use crate::config::RetryConfig;
use crate::errors::{ResearchError, Result};
use crate::providers::{CompletionProvider, CompletionRequest};
use crate::telemetry::TelemetryCollector;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;

pub use parser::{extract_json, parse_structured, strip_think_blocks};
pub use retry::RetryManager;

/// Why a fallback value was substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackCause {
    /// Endpoint answered but the output never matched the schema
    Malformed(String),
    /// Endpoint failed (unreachable, timeout, rate limit, API error)
    Provider(String),
}

impl FallbackCause {
    pub fn is_provider(&self) -> bool {
        matches!(self, FallbackCause::Provider(_))
    }

    fn from_error(err: &ResearchError) -> Self {
        if err.is_provider_failure() {
            FallbackCause::Provider(err.to_string())
        } else {
            FallbackCause::Malformed(err.to_string())
        }
    }
}

/// Parsed value, or the fallback together with its cause
#[derive(Debug, Clone, PartialEq)]
pub struct Structured<T> {
    pub value: T,
    pub fallback: Option<FallbackCause>,
}

impl<T> Structured<T> {
    pub fn parsed(value: T) -> Self {
        Self {
            value,
            fallback: None,
        }
    }

    pub fn fell_back(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn provider_failed(&self) -> bool {
        self.fallback.as_ref().is_some_and(FallbackCause::is_provider)
    }
}

/// Completion provider wrapped with parsing, retry and fallback
#[derive(Clone)]
pub struct ResilientClient {
    provider: Arc<dyn CompletionProvider>,
    retry: RetryManager,
    telemetry: TelemetryCollector,
}

impl ResilientClient {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self::with_config(provider, RetryConfig::default(), TelemetryCollector::new())
    }

    pub fn with_config(
        provider: Arc<dyn CompletionProvider>,
        retry: RetryConfig,
        telemetry: TelemetryCollector,
    ) -> Self {
        Self {
            provider,
            retry: RetryManager::with_config(retry),
            telemetry,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    /// One timed call to the provider
    async fn call(&self, request: &CompletionRequest) -> Result<String> {
        let started = Instant::now();
        let result = self.provider.complete(request).await;
        self.telemetry
            .completion_call(request.task, started.elapsed(), result.is_ok());
        result
    }

    /// Request a structured response, substituting `fallback` when the
    /// output cannot be parsed or the provider keeps failing.
    pub async fn structured<T: DeserializeOwned>(
        &self,
        request: &CompletionRequest,
        fallback: T,
    ) -> Structured<T> {
        let task = request.task;
        let result = self
            .retry
            .execute_with_retry(
                || async move {
                    let raw = self.call(request).await?;
                    parse_structured::<T>(&raw)
                },
                |attempt, err| {
                    tracing::debug!(task = task.as_str(), attempt, error = %err, "Completion attempt failed");
                    self.telemetry.retry_attempt(task, attempt);
                },
            )
            .await;

        match result {
            Ok(value) => Structured::parsed(value),
            Err(err) => {
                let cause = FallbackCause::from_error(&err);
                tracing::warn!(
                    task = task.as_str(),
                    provider = self.provider.name(),
                    error = %err,
                    "Using fallback after retries"
                );
                self.telemetry.fallback(task, err.to_string());
                Structured {
                    value: fallback,
                    fallback: Some(cause),
                }
            }
        }
    }

    /// Request free text with retry
    pub async fn text(&self, request: &CompletionRequest) -> Result<String> {
        let task = request.task;
        self.retry
            .execute_with_retry(
                || self.call(request),
                |attempt, err| {
                    tracing::debug!(task = task.as_str(), attempt, error = %err, "Completion attempt failed");
                    self.telemetry.retry_attempt(task, attempt);
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CompletionTask;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies from a fixed script, repeating the last entry
    struct Scripted {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                match replies.front().unwrap() {
                    Ok(text) => Ok(text.clone()),
                    Err(e) => Err(ResearchError::ProviderUnavailable(e.to_string())),
                }
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        ok: bool,
    }

    fn client(provider: Arc<Scripted>) -> ResilientClient {
        ResilientClient::with_config(
            provider,
            RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            TelemetryCollector::new(),
        )
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(CompletionTask::Reflect, "judge").with_schema("{\"ok\": bool}")
    }

    #[tokio::test]
    async fn test_structured_parses_first_try() {
        let provider = Scripted::new(vec![Ok("{\"ok\": true}".to_string())]);
        let result = client(provider.clone())
            .structured(&request(), Verdict { ok: false })
            .await;

        assert_eq!(result.value, Verdict { ok: true });
        assert!(!result.fell_back());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_structured_retries_malformed_then_succeeds() {
        let provider = Scripted::new(vec![
            Ok("not json".to_string()),
            Ok("{\"ok\": true}".to_string()),
        ]);
        let c = client(provider.clone());
        let result = c.structured(&request(), Verdict { ok: false }).await;

        assert_eq!(result.value, Verdict { ok: true });
        assert_eq!(provider.calls(), 2);
        assert_eq!(c.telemetry().get_stats().retry_attempts, 1);
    }

    #[tokio::test]
    async fn test_structured_falls_back_on_persistent_garbage() {
        let provider = Scripted::new(vec![Ok("I refuse to answer in JSON".to_string())]);
        let c = client(provider.clone());
        let result = c.structured(&request(), Verdict { ok: false }).await;

        assert_eq!(result.value, Verdict { ok: false });
        assert!(matches!(result.fallback, Some(FallbackCause::Malformed(_))));
        assert!(!result.provider_failed());
        assert_eq!(provider.calls(), 3);
        assert_eq!(c.telemetry().get_stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_structured_provider_failure_is_classified() {
        let provider = Scripted::new(vec![Err(ResearchError::ProviderUnavailable(
            "connection refused".to_string(),
        ))]);
        let result = client(provider)
            .structured(&request(), Verdict { ok: false })
            .await;

        assert!(result.provider_failed());
    }

    #[tokio::test]
    async fn test_text_returns_error_after_retries() {
        let provider = Scripted::new(vec![Err(ResearchError::RateLimited("429".to_string()))]);
        let result = client(provider.clone())
            .text(&CompletionRequest::new(CompletionTask::Synthesize, "answer"))
            .await;

        assert!(result.is_err());
        assert_eq!(provider.calls(), 3);
    }
}
