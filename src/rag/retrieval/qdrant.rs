// Qdrant-backed retriever: embed the query, then similarity search
use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        point_id::PointIdOptions, value::Kind, with_payload_selector::SelectorOptions, PointId,
        SearchPoints, Value as QdrantValue, WithPayloadSelector,
    },
    Qdrant,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;

use super::{OllamaEmbedder, RetrievedPassage, Retriever};
use crate::config::Config;
use crate::errors::{ResearchError, Result};

/// Payload field holding the passage text
const TEXT_FIELD: &str = "document";

/// Payload fields tried, in order, for the source identifier
const SOURCE_FIELDS: &[&str] = &["source", "source_id", "title", "book"];

/// Retriever over one Qdrant collection
pub struct QdrantRetriever {
    client: Qdrant,
    embedder: OllamaEmbedder,
    collection: String,
    score_threshold: Option<f32>,
}

impl QdrantRetriever {
    /// Build from configuration. Connection is lazy; an unreachable store
    /// surfaces as a per-query failure.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = Duration::from_millis(config.retrieval.query_timeout_ms);

        let client = Qdrant::from_url(&config.retrieval.qdrant_url)
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ResearchError::ConfigError(format!("Failed to create Qdrant client: {}", e)))?;

        let embedder =
            OllamaEmbedder::with_config(config.embedding_url(), &config.retrieval.embedding_model, timeout)?;

        Ok(Self {
            client,
            embedder,
            collection: config.retrieval.collection.clone(),
            score_threshold: config.retrieval.score_threshold,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl Retriever for QdrantRetriever {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedPassage>> {
        let vector = self.embedder.embed(query).await?;

        let search_result = self
            .client
            .search_points(SearchPoints {
                collection_name: self.collection.clone(),
                vector,
                limit: limit as u64,
                with_payload: Some(WithPayloadSelector {
                    selector_options: Some(SelectorOptions::Enable(true)),
                }),
                score_threshold: self.score_threshold,
                ..Default::default()
            })
            .await
            .map_err(|e| ResearchError::StoreUnavailable(format!("Qdrant search failed: {}", e)))?;

        Ok(search_result
            .result
            .into_iter()
            .filter_map(|point| to_passage(&point.id, point.score, point.payload))
            .collect())
    }
}

/// Convert a scored point; points without text are skipped
fn to_passage(
    id: &Option<PointId>,
    score: f32,
    payload: HashMap<String, QdrantValue>,
) -> Option<RetrievedPassage> {
    let text = payload.get(TEXT_FIELD).and_then(qdrant_value_to_string)?;
    let point_id = point_id_to_string(id);

    let source_id = SOURCE_FIELDS
        .iter()
        .find_map(|field| payload.get(*field).and_then(qdrant_value_to_string))
        .unwrap_or_else(|| point_id.clone());

    let mut metadata: serde_json::Map<String, JsonValue> = payload
        .iter()
        .filter(|(key, _)| key.as_str() != TEXT_FIELD)
        .filter_map(|(key, value)| qdrant_to_json_value(value).map(|v| (key.clone(), v)))
        .collect();
    metadata.insert("point_id".to_string(), JsonValue::String(point_id));

    Some(RetrievedPassage {
        text,
        source_id,
        score,
        metadata,
    })
}

fn qdrant_to_json_value(value: &QdrantValue) -> Option<JsonValue> {
    value.kind.as_ref().and_then(|kind| match kind {
        Kind::StringValue(s) => Some(JsonValue::String(s.clone())),
        Kind::IntegerValue(i) => Some(JsonValue::Number((*i).into())),
        Kind::DoubleValue(f) => serde_json::Number::from_f64(*f).map(JsonValue::Number),
        Kind::BoolValue(b) => Some(JsonValue::Bool(*b)),
        _ => None,
    })
}

fn qdrant_value_to_string(value: &QdrantValue) -> Option<String> {
    value.kind.as_ref().and_then(|kind| match kind {
        Kind::StringValue(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    })
}

fn point_id_to_string(point_id: &Option<PointId>) -> String {
    point_id
        .as_ref()
        .and_then(|id| match &id.point_id_options {
            Some(PointIdOptions::Num(n)) => Some(n.to_string()),
            Some(PointIdOptions::Uuid(u)) => Some(u.clone()),
            None => None,
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_value(s: &str) -> QdrantValue {
        QdrantValue {
            kind: Some(Kind::StringValue(s.to_string())),
        }
    }

    fn int_value(i: i64) -> QdrantValue {
        QdrantValue {
            kind: Some(Kind::IntegerValue(i)),
        }
    }

    fn point_id(n: u64) -> Option<PointId> {
        Some(PointId {
            point_id_options: Some(PointIdOptions::Num(n)),
        })
    }

    #[test]
    fn test_to_passage_maps_payload() {
        let mut payload = HashMap::new();
        payload.insert("document".to_string(), string_value("Blessed are the merciful"));
        payload.insert("source".to_string(), string_value("Gospel of Matthew"));
        payload.insert("chunk_index".to_string(), int_value(42));

        let passage = to_passage(&point_id(7), 0.81, payload).unwrap();
        assert_eq!(passage.text, "Blessed are the merciful");
        assert_eq!(passage.source_id, "Gospel of Matthew");
        assert_eq!(passage.score, 0.81);
        assert_eq!(passage.metadata["chunk_index"], 42);
        assert_eq!(passage.metadata["point_id"], "7");
        assert!(!passage.metadata.contains_key("document"));
    }

    #[test]
    fn test_source_falls_back_to_point_id() {
        let mut payload = HashMap::new();
        payload.insert("document".to_string(), string_value("text"));
        let passage = to_passage(&point_id(3), 0.5, payload).unwrap();
        assert_eq!(passage.source_id, "3");
    }

    #[test]
    fn test_point_without_text_is_skipped() {
        let mut payload = HashMap::new();
        payload.insert("source".to_string(), string_value("Quran"));
        assert!(to_passage(&point_id(1), 0.9, payload).is_none());
    }

    #[tokio::test]
    async fn test_from_config_connects_lazily() {
        let mut config = Config::default();
        config.retrieval.qdrant_url = "http://127.0.0.1:1".to_string();
        config.retrieval.collection = "psalms".to_string();

        let retriever = QdrantRetriever::from_config(&config).unwrap();
        assert_eq!(retriever.collection(), "psalms");
    }

    #[test]
    fn test_point_id_to_string() {
        let uuid = Some(PointId {
            point_id_options: Some(PointIdOptions::Uuid("abc-123".to_string())),
        });
        assert_eq!(point_id_to_string(&uuid), "abc-123");
        assert_eq!(point_id_to_string(&None), "unknown");
    }
}
