//! Completion providers
//!
//! A provider turns a prompt into text. It makes no promise that the text
//! is well formed; parsing and recovery live in `crate::resilience`.

pub mod ollama;
pub mod openrouter;

use crate::config::{ProviderConfig, ProviderKind};
use crate::errors::{ResearchError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use ollama::OllamaProvider;
pub use openrouter::OpenRouterProvider;

/// Which step of the research loop issued a completion call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionTask {
    Classify,
    Plan,
    Reflect,
    Synthesize,
}

impl CompletionTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionTask::Classify => "classify",
            CompletionTask::Plan => "plan",
            CompletionTask::Reflect => "reflect",
            CompletionTask::Synthesize => "synthesize",
        }
    }
}

/// A single completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub task: CompletionTask,
    pub system: Option<String>,
    pub prompt: String,
    /// Description of the expected JSON shape; `None` for free text
    pub schema: Option<String>,
}

impl CompletionRequest {
    pub fn new(task: CompletionTask, prompt: impl Into<String>) -> Self {
        Self {
            task,
            system: None,
            prompt: prompt.into(),
            schema: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Prompt text with the schema instructions appended
    pub fn full_prompt(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}\n\nRespond with a single JSON object matching this schema and nothing else:\n{}",
                self.prompt, schema
            ),
            None => self.prompt.clone(),
        }
    }
}

/// Text-completion endpoint
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate text for a request. Output may be malformed.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// Build the configured provider
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.kind {
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::with_config(config)?)),
        ProviderKind::OpenRouter => Ok(Arc::new(OpenRouterProvider::with_config(config)?)),
    }
}

/// Map a transport error onto the provider taxonomy
pub(crate) fn map_transport_error(err: reqwest::Error, timeout_ms: u64) -> ResearchError {
    if err.is_timeout() {
        ResearchError::Timeout {
            duration_ms: timeout_ms,
        }
    } else if err.is_connect() {
        ResearchError::ProviderUnavailable(err.to_string())
    } else {
        ResearchError::HttpError(err)
    }
}

/// Map a non-success HTTP status onto the provider taxonomy
pub(crate) fn map_status_error(status: reqwest::StatusCode, body: &str) -> ResearchError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ResearchError::RateLimited(format!("HTTP {}: {}", status, body))
    } else if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        ResearchError::ProviderUnavailable(format!("HTTP {}: {}", status, body))
    } else {
        ResearchError::ProviderApi(format!("HTTP {}: {}", status, body))
    }
}
