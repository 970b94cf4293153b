//! Configuration management for ResearchBuddy
//!
//! Provides TOML-based configuration with defaults, environment overrides
//! and validation.
//! Location: ~/.researchbuddy/config.toml

use crate::errors::{ResearchError, Result};
use crate::planning::types::{QueryTier, TierProfiles};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for per-tier environment overrides
const TIER_ENV_PREFIX: &str = "RESEARCHBUDDY_";

/// Complete configuration for ResearchBuddy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub research: ResearchConfig,
}

/// Which completion backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    OpenRouter,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "openrouter" | "open_router" => Ok(ProviderKind::OpenRouter),
            other => Err(format!(
                "Unknown provider: {} (available: ollama, openrouter)",
                other
            )),
        }
    }
}

/// Completion endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub ollama_url: String,
    pub ollama_model: String,
    pub openrouter_url: String,
    pub openrouter_model: String,
    pub openrouter_api_key: Option<String>,
    pub temperature: f64,
    pub request_timeout_secs: u64,
}

/// Vector store and embedding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub qdrant_url: String,
    pub collection: String,
    pub embedding_model: String,
    /// Embedding endpoint; the Ollama URL when unset
    pub embedding_url: Option<String>,
    pub search_k: usize,
    pub query_timeout_ms: u64,
    pub score_threshold: Option<f32>,
}

/// Retry bounds for completion calls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Research loop tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub tiers: TierProfiles,
    /// Conversation turns shown to the synthesizer
    pub history_turns: usize,
    /// Passages per source admitted into the final prompt
    pub max_passages_per_source: usize,
    /// Consecutive provider failures before finishing early
    pub max_provider_failures: usize,
    /// Stop when an iteration adds no new evidence
    pub stop_on_stagnation: bool,
    pub retry: RetryConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Ollama,
            ollama_url: "http://127.0.0.1:11434".to_string(),
            ollama_model: "qwen3:30b-a3b".to_string(),
            openrouter_url: "https://openrouter.ai/api/v1".to_string(),
            openrouter_model: "anthropic/claude-3.5-sonnet".to_string(),
            openrouter_api_key: None,
            temperature: 0.7,
            request_timeout_secs: 120,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            qdrant_url: "http://localhost:6334".to_string(),
            collection: "sacred_texts".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_url: None,
            search_k: 5,
            query_timeout_ms: 10_000,
            score_threshold: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            tiers: TierProfiles::default(),
            history_turns: 3,
            max_passages_per_source: 3,
            max_provider_failures: 2,
            stop_on_stagnation: false,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(config_path) = path {
            Self::load_from_file(&config_path)?
        } else {
            Self::load_default()?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ResearchError::ConfigError(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ResearchError::ConfigError(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Config::default())
    }

    /// Standard configuration location
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".researchbuddy").join("config.toml"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ResearchError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ResearchError::ConfigError(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| ResearchError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.research
            .tiers
            .validate()
            .map_err(ResearchError::ConfigError)?;

        if self.retrieval.search_k == 0 {
            return Err(ResearchError::ConfigError(
                "search_k must be greater than 0".to_string(),
            ));
        }

        if self.retrieval.query_timeout_ms == 0 {
            return Err(ResearchError::ConfigError(
                "query_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.research.retry.max_attempts == 0 {
            return Err(ResearchError::ConfigError(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.research.max_passages_per_source == 0 {
            return Err(ResearchError::ConfigError(
                "max_passages_per_source must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Err(e) = self.set_value_from_env(&key, &value) {
                tracing::warn!("Failed to apply env override {}: {}", key, e);
            }
        }
    }

    /// Apply one environment variable. Unknown keys are ignored.
    pub fn set_value_from_env(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "LLM_PROVIDER" => {
                self.provider.kind = value.parse().map_err(ResearchError::ConfigError)?;
            }
            "OLLAMA_BASE_URL" => self.provider.ollama_url = value.to_string(),
            "OLLAMA_CHAT_MODEL" => self.provider.ollama_model = value.to_string(),
            "OPENROUTER_API_KEY" => {
                if !value.is_empty() {
                    self.provider.openrouter_api_key = Some(value.to_string());
                }
            }
            "OPENROUTER_BASE_URL" => self.provider.openrouter_url = value.to_string(),
            "OPENROUTER_CHAT_MODEL" => self.provider.openrouter_model = value.to_string(),
            "EMBEDDING_MODEL" => self.retrieval.embedding_model = value.to_string(),
            "COLLECTION_NAME" => self.retrieval.collection = value.to_string(),
            "DEFAULT_SEARCH_K" => self.retrieval.search_k = parse_value(key, value)?,
            _ => {
                if let Some(path) = key.strip_prefix(TIER_ENV_PREFIX) {
                    self.set_tier_value(path, value)?;
                }
            }
        }
        Ok(())
    }

    /// `<TIER>__<KNOB>`, e.g. `DEEP_RESEARCH__MAX_ITERATIONS`
    fn set_tier_value(&mut self, path: &str, value: &str) -> Result<()> {
        let Some((tier, knob)) = path.split_once("__") else {
            tracing::debug!("Unknown env config key: {}", path);
            return Ok(());
        };
        let tier: QueryTier = match tier.parse() {
            Ok(tier) => tier,
            Err(_) => {
                tracing::debug!("Unknown tier in env config key: {}", path);
                return Ok(());
            }
        };

        let profile = self.research.tiers.get_mut(tier);
        match knob {
            "MAX_ITERATIONS" => profile.max_iterations = parse_value(path, value)?,
            "MAX_PARALLEL_QUERIES" => profile.max_parallel_queries = parse_value(path, value)?,
            "CONFIDENCE_THRESHOLD" => profile.confidence_threshold = parse_value(path, value)?,
            "EVIDENCE_CAP" => profile.evidence_cap = parse_value(path, value)?,
            _ => tracing::debug!("Unknown tier knob in env config key: {}", path),
        }
        Ok(())
    }

    /// Model name for the selected provider
    pub fn chat_model(&self) -> &str {
        match self.provider.kind {
            ProviderKind::Ollama => &self.provider.ollama_model,
            ProviderKind::OpenRouter => &self.provider.openrouter_model,
        }
    }

    /// Embedding endpoint, defaulting to the Ollama URL
    pub fn embedding_url(&self) -> &str {
        self.retrieval
            .embedding_url
            .as_deref()
            .unwrap_or(&self.provider.ollama_url)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ResearchError::ConfigError(format!("Cannot parse '{}' for {}", value, key))
    })
}
