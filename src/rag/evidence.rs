// Evidence pool: deduplicated, capped passages gathered during one session
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::rag::retrieval::RetrievedPassage;

/// Hex chars of the content hash used in fallback keys
const HASH_KEY_LEN: usize = 16;

/// A passage held by the pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    /// Stable passage key
    pub key: String,
    pub text: String,
    pub source_id: String,
    pub score: f32,
    /// Query that first surfaced this passage
    pub query: String,
    /// Iteration (1-based) that first surfaced this passage
    pub iteration: usize,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Insertion sequence, for stable ordering
    #[serde(skip)]
    seq: u64,
}

/// Outcome of merging one batch of passages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// New keys still present after eviction
    pub added: usize,
    /// Existing keys whose entry changed
    pub updated: usize,
    /// Entries dropped to respect the cap
    pub evicted: usize,
}

/// Stable key: `<source>#<offset>` when the store provides a position,
/// otherwise `<source>#<content hash>`
pub fn stable_key(passage: &RetrievedPassage) -> String {
    let position = ["offset", "chunk_index"]
        .iter()
        .find_map(|field| passage.metadata.get(*field))
        .and_then(|value| match value {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        });

    match position {
        Some(pos) => format!("{}#{}", passage.source_id, pos),
        None => {
            let hash = blake3::hash(passage.text.as_bytes());
            format!("{}#{}", passage.source_id, &hash.to_hex().as_str()[..HASH_KEY_LEN])
        }
    }
}

/// Deduplicated passage collection with score-based eviction
#[derive(Debug, Clone)]
pub struct EvidencePool {
    items: HashMap<String, EvidenceItem>,
    cap: usize,
    next_seq: u64,
}

impl EvidencePool {
    pub fn new(cap: usize) -> Self {
        Self {
            items: HashMap::new(),
            cap: cap.max(1),
            next_seq: 0,
        }
    }

    /// Merge a batch of `(query, passage)` pairs gathered in `iteration`.
    ///
    /// On key collision the higher score wins, while provenance (iteration
    /// and query) stays with the earliest discovery. The cap is enforced
    /// once, after the whole batch is merged.
    pub fn merge<I>(&mut self, batch: I, iteration: usize) -> MergeReport
    where
        I: IntoIterator<Item = (String, RetrievedPassage)>,
    {
        let mut report = MergeReport::default();
        let mut inserted: HashSet<String> = HashSet::new();
        let mut updated: HashSet<String> = HashSet::new();

        for (query, passage) in batch {
            let key = stable_key(&passage);

            if let Some(existing) = self.items.get_mut(&key) {
                let mut changed = false;
                if passage.score > existing.score {
                    existing.score = passage.score;
                    existing.text = passage.text;
                    existing.metadata = passage.metadata;
                    changed = true;
                }
                if iteration < existing.iteration {
                    existing.iteration = iteration;
                    existing.query = query;
                    changed = true;
                }
                if changed && !inserted.contains(&key) {
                    updated.insert(key);
                }
                continue;
            }

            let seq = self.next_seq;
            self.next_seq += 1;
            inserted.insert(key.clone());
            self.items.insert(
                key.clone(),
                EvidenceItem {
                    key,
                    text: passage.text,
                    source_id: passage.source_id,
                    score: passage.score,
                    query,
                    iteration,
                    metadata: passage.metadata,
                    seq,
                },
            );
        }

        report.evicted = self.enforce_cap();
        report.added = inserted.iter().filter(|k| self.items.contains_key(*k)).count();
        report.updated = updated.iter().filter(|k| self.items.contains_key(*k)).count();
        report
    }

    /// Drop globally lowest-scored entries beyond the cap. Among equal
    /// scores the most recently inserted goes first.
    fn enforce_cap(&mut self) -> usize {
        if self.items.len() <= self.cap {
            return 0;
        }

        let mut order: Vec<(f32, u64, String)> = self
            .items
            .values()
            .map(|item| (item.score, item.seq, item.key.clone()))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)));

        let excess = self.items.len() - self.cap;
        for (_, _, key) in order.into_iter().take(excess) {
            self.items.remove(&key);
        }
        excess
    }

    /// All items, score descending, insertion order on ties
    pub fn ranked(&self) -> Vec<&EvidenceItem> {
        let mut items: Vec<&EvidenceItem> = self.items.values().collect();
        items.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.seq.cmp(&b.seq)));
        items
    }

    /// Ranked items with at most `max_per_source` passages per source
    pub fn for_synthesis(&self, max_per_source: usize) -> Vec<&EvidenceItem> {
        let mut per_source: HashMap<&str, usize> = HashMap::new();
        self.ranked()
            .into_iter()
            .filter(|item| {
                let count = per_source.entry(item.source_id.as_str()).or_insert(0);
                *count += 1;
                *count <= max_per_source
            })
            .collect()
    }

    /// Distinct source identifiers, sorted
    pub fn distinct_sources(&self) -> Vec<String> {
        self.items
            .values()
            .map(|item| item.source_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Items first discovered in `iteration`, ranked
    pub fn contributed_in(&self, iteration: usize) -> Vec<&EvidenceItem> {
        self.ranked()
            .into_iter()
            .filter(|item| item.iteration == iteration)
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&EvidenceItem> {
        self.items.get(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.items.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn passage(text: &str, source: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage::new(text, source, score)
    }

    fn q(p: RetrievedPassage) -> (String, RetrievedPassage) {
        ("query".to_string(), p)
    }

    #[test]
    fn test_stable_key_prefers_offset() {
        let p = passage("text", "gita", 0.5).with_metadata("chunk_index", json!(12));
        assert_eq!(stable_key(&p), "gita#12");

        let p = passage("text", "gita", 0.5).with_metadata("offset", json!("4096"));
        assert_eq!(stable_key(&p), "gita#4096");
    }

    #[test]
    fn test_stable_key_content_hash() {
        let a = stable_key(&passage("same text", "quran", 0.5));
        let b = stable_key(&passage("same text", "quran", 0.9));
        let c = stable_key(&passage("other text", "quran", 0.5));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), "quran#".len() + HASH_KEY_LEN);
    }

    #[test]
    fn test_merge_dedups_and_keeps_earliest_provenance() {
        let mut pool = EvidencePool::new(10);
        pool.merge(vec![("first".to_string(), passage("love your neighbour", "bible", 0.6))], 1);

        let report = pool.merge(
            vec![("second".to_string(), passage("love your neighbour", "bible", 0.9))],
            2,
        );

        assert_eq!(pool.len(), 1);
        assert_eq!(report.added, 0);
        assert_eq!(report.updated, 1);
        let item = pool.ranked()[0];
        assert_eq!(item.score, 0.9);
        assert_eq!(item.iteration, 1);
        assert_eq!(item.query, "first");
    }

    #[test]
    fn test_merge_lower_score_keeps_existing() {
        let mut pool = EvidencePool::new(10);
        pool.merge(vec![q(passage("a", "s", 0.8))], 1);
        let report = pool.merge(vec![q(passage("a", "s", 0.3))], 2);
        assert_eq!(report, MergeReport::default());
        assert_eq!(pool.ranked()[0].score, 0.8);
    }

    #[test]
    fn test_cap_evicts_lowest_score() {
        let mut pool = EvidencePool::new(2);
        let report = pool.merge(
            vec![
                q(passage("a", "s1", 0.9)),
                q(passage("b", "s2", 0.1)),
                q(passage("c", "s3", 0.5)),
            ],
            1,
        );

        assert_eq!(pool.len(), 2);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.added, 2);
        let scores: Vec<f32> = pool.ranked().iter().map(|i| i.score).collect();
        assert_eq!(scores, vec![0.9, 0.5]);
    }

    #[test]
    fn test_cap_eviction_is_score_based_not_recency() {
        let mut pool = EvidencePool::new(2);
        pool.merge(vec![q(passage("old low", "s1", 0.2)), q(passage("old high", "s2", 0.9))], 1);
        pool.merge(vec![q(passage("new mid", "s3", 0.5))], 2);

        let texts: Vec<&str> = pool.ranked().iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["old high", "new mid"]);
    }

    #[test]
    fn test_cap_tie_evicts_most_recent() {
        let mut pool = EvidencePool::new(1);
        pool.merge(vec![q(passage("first", "s1", 0.5))], 1);
        pool.merge(vec![q(passage("second", "s2", 0.5))], 2);
        assert_eq!(pool.ranked()[0].text, "first");
    }

    #[test]
    fn test_for_synthesis_limits_per_source() {
        let mut pool = EvidencePool::new(10);
        pool.merge(
            vec![
                q(passage("a", "gita", 0.9)),
                q(passage("b", "gita", 0.8)),
                q(passage("c", "gita", 0.7)),
                q(passage("d", "dhammapada", 0.6)),
            ],
            1,
        );

        let picked: Vec<&str> = pool.for_synthesis(2).iter().map(|i| i.text.as_str()).collect();
        assert_eq!(picked, vec!["a", "b", "d"]);
        assert_eq!(pool.distinct_sources(), vec!["dhammapada".to_string(), "gita".to_string()]);
    }

    #[test]
    fn test_contributed_in() {
        let mut pool = EvidencePool::new(10);
        pool.merge(vec![q(passage("a", "s", 0.5))], 1);
        pool.merge(vec![q(passage("b", "s", 0.5)), q(passage("a", "s", 0.7))], 2);

        assert_eq!(pool.contributed_in(1).len(), 1);
        assert_eq!(pool.contributed_in(2).len(), 1);
        assert_eq!(pool.contributed_in(2)[0].text, "b");
    }
}
