// Retrieval: the vector-store adapter and the parallel query coordinator
pub mod coordinator;
pub mod embedding;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use coordinator::{QueryFailure, RetrievalCoordinator, SearchRound};
pub use embedding::OllamaEmbedder;
pub use qdrant::QdrantRetriever;

/// One passage returned by a similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub source_id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RetrievedPassage {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            score,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Similarity search over the corpus.
///
/// Implementations must fail rather than hang when the store is down; the
/// coordinator additionally bounds every call with a timeout.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedPassage>>;
}
