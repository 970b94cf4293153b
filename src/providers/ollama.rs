//! Ollama chat client
//!
//! Non-streaming `POST /api/chat`. When a schema is requested the call sets
//! `format: "json"`; reasoning-model `<think>` blocks are stripped from the
//! reply either way.

use super::{map_status_error, map_transport_error, CompletionProvider, CompletionRequest};
use crate::config::ProviderConfig;
use crate::errors::{ResearchError, Result};
use crate::resilience::parser::strip_think_blocks;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ollama completion provider
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f64,
    timeout_ms: u64,
}

impl OllamaProvider {
    /// Create provider from configuration
    pub fn with_config(config: &ProviderConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ResearchError::HttpError)?;

        Ok(Self {
            client,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
            temperature: config.temperature,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.full_prompt(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            format: request.schema.as_ref().map(|_| "json".to_string()),
            options: ChatOptions {
                temperature: self.temperature,
            },
        }
    }

    /// Check if Ollama is reachable
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/version", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request(request);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_ms))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_status_error(status, &error_text));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ResearchError::ProviderApi(format!("Failed to parse response: {}", e)))?;

        let content = strip_think_blocks(&chat.message.content);
        if content.is_empty() {
            return Err(ResearchError::ProviderApi("Empty completion".to_string()));
        }
        Ok(content)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: ChatOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}
