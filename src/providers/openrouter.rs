//! OpenRouter client (OpenAI-compatible chat completions)

use super::{map_status_error, map_transport_error, CompletionProvider, CompletionRequest};
use crate::config::ProviderConfig;
use crate::errors::{ResearchError, Result};
use crate::resilience::parser::strip_think_blocks;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_TOKENS: u32 = 8000;

/// OpenRouter completion provider
#[derive(Debug, Clone)]
pub struct OpenRouterProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
    timeout_ms: u64,
}

impl OpenRouterProvider {
    pub fn with_config(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .openrouter_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ResearchError::ConfigError(
                    "OpenRouter selected but no API key configured (set OPENROUTER_API_KEY)"
                        .to_string(),
                )
            })?;

        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ResearchError::HttpError)?;

        Ok(Self {
            client,
            base_url: config.openrouter_url.trim_end_matches('/').to_string(),
            model: config.openrouter_model.clone(),
            api_key,
            temperature: config.temperature,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(Message {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: request.full_prompt(),
        });

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: MAX_TOKENS,
            response_format: request.schema.as_ref().map(|_| ResponseFormat {
                kind: "json_object".to_string(),
            }),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenRouterProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.build_request(request))
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

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ResearchError::ProviderApi(format!("Failed to parse response: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| strip_think_blocks(&c.message.content))
            .unwrap_or_default();

        if content.is_empty() {
            return Err(ResearchError::ProviderApi("Empty completion".to_string()));
        }
        Ok(content)
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}
