//! Shared stubs for integration tests: a completion provider scripted per
//! task and an in-memory retriever.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use researchbuddy::agent::{EventBus, ProgressEvent, ResearchController};
use researchbuddy::config::Config;
use researchbuddy::errors::{ResearchError, Result};
use researchbuddy::providers::{CompletionProvider, CompletionRequest, CompletionTask};
use researchbuddy::rag::retrieval::{RetrievedPassage, Retriever};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Unavailable,
}

pub fn text(s: &str) -> Reply {
    Reply::Text(s.to_string())
}

/// Replies per task in order; the last reply for a task repeats
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<CompletionTask, VecDeque<Reply>>>,
    calls: Mutex<Vec<CompletionTask>>,
    always_unavailable: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the endpoint were down
    pub fn unavailable() -> Self {
        Self {
            always_unavailable: true,
            ..Self::default()
        }
    }

    pub fn on(self, task: CompletionTask, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(task, replies.into_iter().collect());
        self
    }

    pub fn calls(&self, task: CompletionTask) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| **t == task).count()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.task);
        if self.always_unavailable {
            return Err(ResearchError::ProviderUnavailable(
                "connection refused".to_string(),
            ));
        }

        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(&request.task);
        let reply = match queue {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };

        match reply {
            Some(Reply::Text(s)) => Ok(s),
            Some(Reply::Unavailable) => Err(ResearchError::ProviderUnavailable(
                "connection refused".to_string(),
            )),
            None => Err(ResearchError::ProviderApi(format!(
                "no script for {}",
                request.task.as_str()
            ))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// How the stub retriever answers
#[derive(Debug, Clone, Copy)]
pub enum Corpus {
    /// One passage per query; the source is picked from keywords in it
    ByKeyword,
    /// Never answers within any reasonable timeout
    Hang,
}

pub struct StubRetriever {
    corpus: Corpus,
    queries: Mutex<Vec<String>>,
}

impl StubRetriever {
    pub fn new(corpus: Corpus) -> Self {
        Self {
            corpus,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

/// Source id for a query under `Corpus::ByKeyword`
pub fn source_for(query: &str) -> &'static str {
    let q = query.to_lowercase();
    if q.contains("gospel") {
        "bible"
    } else if q.contains("quran") {
        "quran"
    } else if q.contains("dhammapada") {
        "dhammapada"
    } else {
        "general"
    }
}

#[async_trait]
impl Retriever for StubRetriever {
    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<RetrievedPassage>> {
        self.queries.lock().unwrap().push(query.to_string());
        match self.corpus {
            Corpus::ByKeyword => Ok(vec![RetrievedPassage::new(
                format!("Passage answering: {}", query),
                source_for(query),
                0.8,
            )]),
            Corpus::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Defaults with fast retries and the given per-query timeout
pub fn test_config(query_timeout_ms: u64) -> Config {
    let mut config = Config::default();
    config.research.retry.base_delay_ms = 1;
    config.research.retry.max_delay_ms = 2;
    config.retrieval.query_timeout_ms = query_timeout_ms;
    config
}

pub fn controller(
    provider: &Arc<ScriptedProvider>,
    retriever: &Arc<StubRetriever>,
    config: &Config,
) -> ResearchController {
    ResearchController::new(provider.clone(), retriever.clone(), config)
}

/// Drain everything already emitted on a closed bus
pub async fn drain(bus: EventBus, mut receiver: tokio::sync::mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    drop(bus);
    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    events
}

pub const CLASSIFY_SIMPLE: &str = r#"{"tier": "simple_factual", "reasoning": "a single fact"}"#;
pub const CLASSIFY_MODERATE: &str = r#"{"tier": "moderate_research", "reasoning": "needs a few passages"}"#;
pub const CLASSIFY_DEEP: &str = r#"{"tier": "deep_research", "reasoning": "compares traditions"}"#;

pub fn reflection(confidence: f64, needs_more_search: bool, gaps: &[&str]) -> Reply {
    Reply::Text(
        serde_json::json!({
            "confidence": confidence,
            "evidence_quality": "adequate",
            "gaps": gaps,
            "needs_more_search": needs_more_search,
            "reasoning": "scripted"
        })
        .to_string(),
    )
}

pub fn plan(queries: &[&str]) -> Reply {
    Reply::Text(
        serde_json::json!({
            "needs_more_search": true,
            "queries": queries,
            "rationale": "scripted plan",
            "confidence": 0.3
        })
        .to_string(),
    )
}
