//! Error types for ResearchBuddy
//!
//! One error enum for the whole crate. Most variants never escape a research
//! session: the resilience layer and the controller turn them into fallbacks
//! and caveats. Only configuration problems and cancellation reach callers.

use thiserror::Error;

/// Main error type for the research system
#[derive(Error, Debug)]
pub enum ResearchError {
    /// State machine transition errors
    #[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// Completion endpoint could not be reached
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Completion endpoint rejected the call for rate limiting
    #[error("Provider rate limited: {0}")]
    RateLimited(String),

    /// Completion endpoint answered with a non-success status
    #[error("Provider API error: {0}")]
    ProviderApi(String),

    /// Model output did not match the requested shape
    #[error("Structured output error: {0}")]
    StructuredOutput(String),

    /// A single retrieval query failed
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Vector store could not be reached
    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    /// Timeout errors
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Session cancelled by its caller
    #[error("Research session cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic errors with context
    #[error("Research error: {0}")]
    Generic(String),
}

/// Result type alias for research operations
pub type Result<T> = std::result::Result<T, ResearchError>;

impl ResearchError {
    /// True for failures of the completion endpoint itself, as opposed to
    /// malformed output from a reachable endpoint.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            ResearchError::ProviderUnavailable(_)
                | ResearchError::RateLimited(_)
                | ResearchError::ProviderApi(_)
                | ResearchError::Timeout { .. }
                | ResearchError::HttpError(_)
        )
    }
}

/// Convert anyhow errors to ResearchError
impl From<anyhow::Error> for ResearchError {
    fn from(err: anyhow::Error) -> Self {
        ResearchError::Generic(err.to_string())
    }
}
