// Final answer synthesis: the only step that sees the whole evidence set
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::analysis::types::StopReason;
use crate::providers::{CompletionRequest, CompletionTask};
use crate::rag::context::{Citation, ContextBuilder};
use crate::rag::evidence::EvidencePool;
use crate::resilience::ResilientClient;
use crate::types::messages::{clip, format_history, recent_turns};
use crate::types::ConversationTurn;

/// Assistant turns are clipped to this many characters in the prompt
const HISTORY_CLIP_CHARS: usize = 200;

/// Passages listed in an extractive fallback answer
const EXTRACTIVE_PASSAGES: usize = 3;

/// Qualification attached to an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Caveat {
    /// No evidence was retrieved at all
    InsufficientEvidence,
    /// Research stopped short of the confidence threshold
    LowConfidence,
    /// The completion provider failed during research or synthesis
    ProviderDegraded,
}

impl Caveat {
    pub fn message(&self) -> &'static str {
        match self {
            Caveat::InsufficientEvidence => {
                "Insufficient evidence: no relevant passages could be retrieved from the corpus, \
                 so this question cannot be answered from the sources."
            }
            Caveat::LowConfidence => {
                "Low confidence: research ended before the evidence was judged sufficient. \
                 Treat this answer as provisional."
            }
            Caveat::ProviderDegraded => {
                "The language model was unavailable during research. This answer was assembled \
                 from the best evidence gathered so far."
            }
        }
    }
}

/// Final result of a research session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchAnswer {
    /// Answer text, with any caveat appended
    pub text: String,
    pub citations: Vec<Citation>,
    pub caveat: Option<Caveat>,
    pub confidence: f64,
    pub stop_reason: StopReason,
    pub iterations: usize,
    pub evidence_count: usize,
}

impl ResearchAnswer {
    /// Distinct sources among the citations
    pub fn cited_sources(&self) -> BTreeSet<&str> {
        self.citations.iter().map(|c| c.source_id.as_str()).collect()
    }
}

/// What the synthesizer needs from the finished session
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub question: &'a str,
    pub history: &'a [ConversationTurn],
    pub pool: &'a EvidencePool,
    pub confidence: f64,
    pub stop_reason: StopReason,
    pub iterations: usize,
    /// Confidence below the tier threshold
    pub low_confidence: bool,
}

/// Synthesizer configuration
#[derive(Debug, Clone, Copy)]
pub struct SynthesizerConfig {
    pub history_turns: usize,
    pub max_passages_per_source: usize,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            history_turns: 3,
            max_passages_per_source: 3,
        }
    }
}

/// Produces the final answer
#[derive(Clone)]
pub struct Synthesizer {
    client: ResilientClient,
    context: ContextBuilder,
    config: SynthesizerConfig,
}

impl Synthesizer {
    pub fn new(client: ResilientClient, config: SynthesizerConfig) -> Self {
        Self {
            client,
            context: ContextBuilder::new(),
            config,
        }
    }

    /// Write the answer. Never fails: an empty pool yields an explicit
    /// caveat and a failed model call yields an extractive answer.
    pub async fn synthesize(&self, input: SynthesisInput<'_>) -> ResearchAnswer {
        let base = ResearchAnswer {
            text: String::new(),
            citations: Vec::new(),
            caveat: None,
            confidence: input.confidence,
            stop_reason: input.stop_reason,
            iterations: input.iterations,
            evidence_count: input.pool.len(),
        };

        let answered_without_search = input.stop_reason == StopReason::AnsweredWithoutSearch;

        if input.pool.is_empty() && !answered_without_search {
            let caveat = if input.stop_reason == StopReason::ProviderUnavailable {
                Caveat::ProviderDegraded
            } else {
                Caveat::InsufficientEvidence
            };
            tracing::warn!(?caveat, "Evidence pool empty; answering with caveat only");
            return ResearchAnswer {
                text: caveat.message().to_string(),
                caveat: Some(caveat),
                ..base
            };
        }

        let items = input.pool.for_synthesis(self.config.max_passages_per_source);
        let assembled = self.context.numbered(&items);
        let request = self.build_request(&input, &assembled.text);

        let (body, citations, mut caveat) = match self.client.text(&request).await {
            Ok(text) => {
                let citations = referenced(&text, &assembled.citations);
                (text, citations, None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Synthesis failed; using extractive answer");
                if input.pool.is_empty() {
                    return ResearchAnswer {
                        text: Caveat::ProviderDegraded.message().to_string(),
                        caveat: Some(Caveat::ProviderDegraded),
                        ..base
                    };
                }
                let shown: Vec<Citation> = assembled
                    .citations
                    .iter()
                    .take(EXTRACTIVE_PASSAGES)
                    .cloned()
                    .collect();
                (
                    extractive_answer(&items, shown.len()),
                    shown,
                    Some(Caveat::ProviderDegraded),
                )
            }
        };

        if caveat.is_none() {
            caveat = if input.stop_reason == StopReason::ProviderUnavailable {
                Some(Caveat::ProviderDegraded)
            } else if input.low_confidence && !answered_without_search {
                Some(Caveat::LowConfidence)
            } else {
                None
            };
        }

        let text = match caveat {
            Some(c) => format!("{}\n\nNote: {}", body.trim(), c.message()),
            None => body.trim().to_string(),
        };

        ResearchAnswer {
            text,
            citations,
            caveat,
            ..base
        }
    }

    fn build_request(&self, input: &SynthesisInput<'_>, passages: &str) -> CompletionRequest {
        let history = recent_turns(input.history, self.config.history_turns);
        let history_block = if history.is_empty() {
            String::new()
        } else {
            format!(
                "Recent conversation:\n{}\n",
                format_history(history, HISTORY_CLIP_CHARS)
            )
        };

        let prompt = if passages.is_empty() {
            format!(
                "{}Question: {}\n\nAnswer concisely and accurately.",
                history_block, input.question
            )
        } else {
            format!(
                "{}Question: {}\n\n\
                 Retrieved passages:\n{}\n\n\
                 Write a well-organised answer grounded in these passages. Attribute every claim \
                 to its passage with citation markers like [1] or [2]. Where traditions differ, \
                 say so. If the passages do not support part of the question, state that plainly \
                 instead of guessing.",
                history_block, input.question, passages
            )
        };

        CompletionRequest::new(CompletionTask::Synthesize, prompt).with_system(
            "You are a careful scholar of religious and sacred texts. You answer from the \
             evidence provided and cite it.",
        )
    }
}

/// Citations whose `[n]` marker appears in `text`; all of them when the
/// model cited nothing explicitly.
fn referenced(text: &str, citations: &[Citation]) -> Vec<Citation> {
    let cited: Vec<Citation> = citations
        .iter()
        .filter(|c| text.contains(&format!("[{}]", c.index)))
        .cloned()
        .collect();
    if cited.is_empty() {
        citations.to_vec()
    } else {
        cited
    }
}

fn extractive_answer(items: &[&crate::rag::evidence::EvidenceItem], count: usize) -> String {
    let mut lines = vec!["The most relevant passages found were:".to_string()];
    for (i, item) in items.iter().take(count).enumerate() {
        lines.push(format!("[{}] ({}) {}", i + 1, item.source_id, clip(item.text.trim(), 400)));
    }
    lines.join("\n\n")
}
