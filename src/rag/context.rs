// Context assembly for prompts: short digests for planning and reflection,
// numbered passages for the final answer
use serde::{Deserialize, Serialize};

use crate::rag::evidence::{EvidenceItem, EvidencePool};
use crate::types::messages::clip;

/// Context assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum tokens for numbered passages
    pub max_context_tokens: usize,
    /// Passages listed in a digest
    pub digest_items: usize,
    /// Characters kept per digest line
    pub digest_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 6000,
            digest_items: 8,
            digest_chars: 160,
        }
    }
}

/// A numbered passage the answer may cite as `[index]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub index: usize,
    pub source_id: String,
    pub score: f32,
}

/// Assembled context for prompt augmentation
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    /// The formatted context text
    pub text: String,
    /// One entry per included passage, in numbering order
    pub citations: Vec<Citation>,
    /// Estimated token count
    pub estimated_tokens: usize,
}

/// Context builder for research prompts
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Compact summary of the strongest evidence. Upstream components see
    /// this instead of the full pool.
    pub fn digest(&self, pool: &EvidencePool) -> String {
        if pool.is_empty() {
            return "(no evidence gathered yet)".to_string();
        }

        let ranked = pool.ranked();
        let mut lines: Vec<String> = ranked
            .iter()
            .take(self.config.digest_items)
            .map(|item| {
                format!(
                    "- ({}, {:.2}) {}",
                    item.source_id,
                    item.score,
                    clip(&one_line(&item.text), self.config.digest_chars)
                )
            })
            .collect();

        if ranked.len() > self.config.digest_items {
            lines.push(format!(
                "... and {} more passages",
                ranked.len() - self.config.digest_items
            ));
        }
        lines.join("\n")
    }

    /// Numbered passages `[n] (source) text`, stopping at the token budget.
    /// The first passage is always included.
    pub fn numbered(&self, items: &[&EvidenceItem]) -> AssembledContext {
        let mut parts = Vec::new();
        let mut citations = Vec::new();
        let mut total_tokens = 0;

        for item in items {
            // Rough estimate: ~4 chars per token
            let item_tokens = item.text.len() / 4;
            if !citations.is_empty() && total_tokens + item_tokens > self.config.max_context_tokens {
                break;
            }

            let index = citations.len() + 1;
            parts.push(format!("[{}] ({}) {}", index, item.source_id, item.text.trim()));
            citations.push(Citation {
                index,
                source_id: item.source_id.clone(),
                score: item.score,
            });
            total_tokens += item_tokens;
        }

        AssembledContext {
            text: parts.join("\n\n"),
            citations,
            estimated_tokens: total_tokens,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
