//! Retry manager with exponential backoff
//!
//! Bounded retry strategy for completion calls:
//! - Attempts: `max_attempts` total (first call included)
//! - Strategy: binary exponential backoff capped at `max_delay_ms`
//! - Jitter: ±25% random variation
//! - Exhaustion returns the last error so callers can classify it

use crate::config::RetryConfig;
use crate::errors::{ResearchError, Result};
use std::time::Duration;
use tokio::time::sleep;

/// Retry manager with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryManager {
    /// Maximum attempts, including the first
    max_attempts: u32,

    /// Base delay in milliseconds
    base_delay_ms: u64,

    /// Maximum delay cap in milliseconds
    max_delay_ms: u64,

    /// Enable jitter
    enable_jitter: bool,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryManager {
    /// Create new retry manager with default settings
    pub fn new() -> Self {
        Self::with_config(RetryConfig::default())
    }

    /// Create retry manager from configuration
    pub fn with_config(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms.max(config.base_delay_ms),
            enable_jitter: true,
        }
    }

    /// Execute operation with retry logic.
    ///
    /// `on_retry` is invoked with the attempt number and error before each
    /// backoff sleep.
    pub async fn execute_with_retry<F, Fut, T, R>(&self, mut operation: F, mut on_retry: R) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
        R: FnMut(u32, &ResearchError),
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !Self::is_retryable(&e) {
                        return Err(e);
                    }

                    attempt += 1;
                    if attempt >= self.max_attempts {
                        tracing::debug!(attempts = attempt, error = %e, "Retries exhausted");
                        return Err(e);
                    }

                    on_retry(attempt, &e);
                    let delay = self.calculate_delay(attempt - 1);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                    sleep(delay).await;
                }
            }
        }
    }

    /// Calculate delay for given retry number (0-based)
    fn calculate_delay(&self, retry: u32) -> Duration {
        // Binary exponential backoff: base * 2^retry
        let exponential_delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry));

        let delay_ms = exponential_delay.min(self.max_delay_ms);

        // ±25% jitter
        let final_delay = if self.enable_jitter {
            let jitter = (delay_ms / 4) as i64;
            let random_jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter as f64;
            ((delay_ms as i64) + random_jitter as i64).max(0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    /// Upper bound on total backoff time, ignoring jitter
    pub fn max_total_wait_time(&self) -> Duration {
        let total_ms: u64 = (0..self.max_attempts.saturating_sub(1))
            .map(|retry| {
                self.base_delay_ms
                    .saturating_mul(2u64.saturating_pow(retry))
                    .min(self.max_delay_ms)
            })
            .sum();

        Duration::from_millis(total_ms)
    }

    /// Provider failures and malformed output are transient; everything
    /// else is permanent.
    pub fn is_retryable(error: &ResearchError) -> bool {
        match error {
            e if e.is_provider_failure() => true,
            ResearchError::StructuredOutput(_) => true,
            ResearchError::SerializationError(_) => true,
            ResearchError::Generic(_) => true,
            ResearchError::Cancelled => false,
            ResearchError::ConfigError(_) => false,
            _ => false,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
