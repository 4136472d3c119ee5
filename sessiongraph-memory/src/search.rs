//! Hybrid memory search
//!
//! BM25 over memory content, tags and source, blended with the decay score so that
//! stale memories sink even when their text matches well.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::clock::Timestamp;
use crate::decay::{filter_by_decay_threshold, DecayScored};
use crate::entities::Memory;
use crate::error::Result;
use crate::id::EntityId;
use crate::versioned::VersionedStore;

/// Search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum results to return
    pub limit: usize,
    /// Weight of the normalized BM25 score
    pub text_weight: f64,
    /// Weight of the decay score
    pub decay_weight: f64,
    /// Memories scoring below this are never returned
    pub min_decay_score: f64,
    /// Only memories carrying at least one of these tags
    pub tags: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            text_weight: 0.7,
            decay_weight: 0.3,
            min_decay_score: 0.1,
            tags: vec![],
        }
    }
}

/// Why a memory matched the search
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchReason {
    TextMatch { score: f64 },
    Relevance { decay_score: f64 },
}

/// Search result with scores
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub memory: Memory,
    /// Combined score
    pub score: f64,
    pub match_reasons: Vec<MatchReason>,
}

/// Words too common in session notes to say anything about a memory
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "are", "was", "its", "has",
    "have", "not", "but", "all", "any", "can", "uses", "used",
];

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Lowercased alphanumeric terms of three or more characters, minus stopwords
pub(crate) fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

/// BM25 index over the content, tags and source of a fixed set of memories
pub struct MemoryIndex {
    postings: HashMap<String, Vec<(EntityId, u32)>>,
    lengths: HashMap<EntityId, usize>,
    avg_length: f64,
}

impl MemoryIndex {
    pub fn build(memories: &[Memory]) -> Self {
        let mut postings: HashMap<String, Vec<(EntityId, u32)>> = HashMap::new();
        let mut lengths = HashMap::with_capacity(memories.len());

        for memory in memories {
            let fields = std::iter::once(memory.content.as_str())
                .chain(memory.tags.iter().map(String::as_str))
                .chain(memory.source.as_deref());
            let mut counts: HashMap<String, u32> = HashMap::new();
            let mut length = 0;
            for term in fields.flat_map(terms) {
                *counts.entry(term).or_default() += 1;
                length += 1;
            }
            lengths.insert(memory.id, length);
            for (term, tf) in counts {
                postings.entry(term).or_default().push((memory.id, tf));
            }
        }

        let avg_length = if lengths.is_empty() {
            0.0
        } else {
            lengths.values().sum::<usize>() as f64 / lengths.len() as f64
        };
        Self {
            postings,
            lengths,
            avg_length,
        }
    }

    /// Raw BM25 score of every memory matching at least one query term.
    /// A term repeated in the query counts once.
    pub fn score(&self, query: &str) -> HashMap<EntityId, f64> {
        let n = self.lengths.len() as f64;
        let avg = if self.avg_length > 0.0 { self.avg_length } else { 1.0 };
        let query: BTreeSet<String> = terms(query).collect();

        let mut scores = HashMap::new();
        for term in &query {
            let Some(matches) = self.postings.get(term) else {
                continue;
            };
            let df = matches.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (id, tf) in matches {
                let tf = f64::from(*tf);
                let length = self.lengths.get(id).copied().unwrap_or_default() as f64;
                let norm = K1 * (1.0 - B + B * length / avg);
                *scores.entry(*id).or_insert(0.0) += idf * tf * (K1 + 1.0) / (tf + norm);
            }
        }
        scores
    }
}

/// Search over the active memories of a project
pub struct MemorySearch {
    memories: VersionedStore<Memory>,
}

impl MemorySearch {
    pub fn new(memories: VersionedStore<Memory>) -> Self {
        Self { memories }
    }

    /// Rank active memories of `project` against `query` as of `now`
    pub async fn search(
        &self,
        project: &str,
        query: &str,
        config: &SearchConfig,
        now: Timestamp,
    ) -> Result<Vec<SearchResult>> {
        let mut candidates = self.memories.find_by_project(project).await?;
        if !config.tags.is_empty() {
            candidates.retain(|m| config.tags.iter().any(|t| m.tags.contains(t)));
        }

        let text_scores = MemoryIndex::build(&candidates).score(query);
        let max_text = text_scores.values().copied().fold(0.0_f64, f64::max);

        let fresh = filter_by_decay_threshold(candidates, config.min_decay_score, now);
        let mut results: Vec<SearchResult> = fresh
            .into_iter()
            .filter_map(|DecayScored { item, decay_score }| {
                let raw = text_scores.get(&item.id).copied()?;
                let text = if max_text > 0.0 { raw / max_text } else { 0.0 };
                Some(SearchResult {
                    score: text * config.text_weight + decay_score * config.decay_weight,
                    match_reasons: vec![
                        MatchReason::TextMatch { score: text },
                        MatchReason::Relevance { decay_score },
                    ],
                    memory: item,
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(config.limit);
        log::debug!(
            "Search {:?} in {}: {} results",
            query,
            project,
            results.len()
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MS_PER_DAY};
    use crate::entities::{MemoryDraft, MemoryType};
    use crate::versioned::VersionedEntity;
    use crate::graph::InMemoryGraph;
    use std::sync::Arc;

    #[test]
    fn test_terms_drop_short_words_and_stopwords() {
        let found: Vec<String> = terms("Use sqlx::query! in db/mod.rs, not an ORM.").collect();
        assert_eq!(found, ["use", "sqlx", "query", "mod", "orm"]);
        assert_eq!(terms("the and with").count(), 0);
    }

    #[tokio::test]
    async fn test_tags_and_source_are_indexed() {
        let clock = Arc::new(ManualClock::new(Timestamp(0)));
        let store: VersionedStore<Memory> =
            VersionedStore::new(Arc::new(InMemoryGraph::new()), clock);
        let tagged = store
            .create(
                MemoryDraft::new("p", "Run migrations before rollout", MemoryType::Insight)
                    .tag("deploy"),
                None,
            )
            .await
            .unwrap();
        let sourced = store
            .create(
                MemoryDraft::new("p", "Flaky on CI only", MemoryType::Fact)
                    .with_source("tests/integration_auth.rs"),
                None,
            )
            .await
            .unwrap();

        let index = MemoryIndex::build(&[tagged.clone(), sourced.clone()]);
        assert_eq!(index.score("deploy").keys().collect::<Vec<_>>(), [&tagged.id]);
        assert_eq!(index.score("integration").keys().collect::<Vec<_>>(), [&sourced.id]);
        assert!(index.score("kubernetes").is_empty());
        // stopwords never match
        assert!(index.score("the not").is_empty());
    }

    #[test]
    fn test_repeated_query_terms_count_once() {
        let memory = Memory::from_draft(
            EntityId::new(),
            crate::temporal::Bitemporal::open(Timestamp(0), Timestamp(0)),
            MemoryDraft::new("p", "cache invalidation rules", MemoryType::Fact),
        );
        let index = MemoryIndex::build(&[memory.clone()]);
        assert_eq!(index.score("cache"), index.score("cache cache CACHE"));
    }

    #[test]
    fn test_search_config_partial_json() {
        let config: SearchConfig = serde_json::from_str(r#"{"limit": 3}"#).unwrap();
        assert_eq!(config.limit, 3);
        assert_eq!(config.min_decay_score, 0.1);
    }

    async fn seeded() -> (MemorySearch, Timestamp) {
        let clock = Arc::new(ManualClock::new(Timestamp(0)));
        let store: VersionedStore<Memory> =
            VersionedStore::new(Arc::new(InMemoryGraph::new()), clock);
        let day = |n: i64| Some(Timestamp(n * MS_PER_DAY));

        store
            .create(
                MemoryDraft::new("p", "Postgres connection pool size is 20", MemoryType::Fact),
                day(190),
            )
            .await
            .unwrap();
        store
            .create(
                MemoryDraft::new("p", "Chose Postgres for JSONB", MemoryType::Decision),
                day(200),
            )
            .await
            .unwrap();
        store
            .create(
                MemoryDraft::new("p", "Postgres mentioned in an old chat", MemoryType::Turn),
                day(0),
            )
            .await
            .unwrap();
        store
            .create(
                MemoryDraft::new("p", "Prefer small commits", MemoryType::Preference).tag("git"),
                day(200),
            )
            .await
            .unwrap();

        (MemorySearch::new(store), Timestamp(200 * MS_PER_DAY))
    }

    #[tokio::test]
    async fn test_search_ranks_text_and_decay() {
        let (search, now) = seeded().await;
        let results = search
            .search("p", "postgres", &SearchConfig::default(), now)
            .await
            .unwrap();

        // the 200-day-old turn decays below the floor
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.memory_type, MemoryType::Decision);
        assert!(results[0].score >= results[1].score);
        assert!(results
            .iter()
            .all(|r| r.memory.content.to_lowercase().contains("postgres")));
    }

    #[tokio::test]
    async fn test_search_tag_filter_and_limit() {
        let (search, now) = seeded().await;
        let config = SearchConfig {
            tags: vec!["git".into()],
            ..Default::default()
        };
        let results = search.search("p", "commits", &config, now).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.tags, vec!["git".to_string()]);

        let config = SearchConfig {
            limit: 1,
            ..Default::default()
        };
        assert_eq!(search.search("p", "postgres", &config, now).await.unwrap().len(), 1);
        assert!(search
            .search("other", "postgres", &SearchConfig::default(), now)
            .await
            .unwrap()
            .is_empty());
    }
}
