//! Community naming and summaries
//!
//! Summaries usually come from a language model, so every one is checked
//! structurally before it is stored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::entities::Entity;
use crate::error::{MemoryError, Result};
use crate::search::terms;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunitySummary {
    pub name: String,
    pub summary: String,
    pub keywords: Vec<String>,
}

/// Sentences ending in `.`, `!` or `?` followed by whitespace or the end
fn sentence_count(text: &str) -> usize {
    let chars: Vec<char> = text.trim().chars().collect();
    let mut count = 0;
    for (i, c) in chars.iter().enumerate() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.get(i + 1).map_or(true, |next| next.is_whitespace());
            if at_boundary && i > 0 {
                count += 1;
            }
        }
    }
    count
}

impl CommunitySummary {
    /// Name of 2 to 4 words, a summary of 2 to 3 sentences, 3 to 5 keywords
    pub fn validate(&self) -> Result<()> {
        let words = self.name.split_whitespace().count();
        if !(2..=4).contains(&words) {
            return Err(MemoryError::validation(format!(
                "community name must have 2-4 words, got {} ({:?})",
                words, self.name
            )));
        }

        let sentences = sentence_count(&self.summary);
        if !(2..=3).contains(&sentences) {
            return Err(MemoryError::validation(format!(
                "community summary must have 2-3 sentences, got {}",
                sentences
            )));
        }

        let keywords = self.keywords.iter().filter(|k| !k.trim().is_empty()).count();
        if keywords != self.keywords.len() {
            return Err(MemoryError::validation("community keywords must not be blank"));
        }
        if !(3..=5).contains(&keywords) {
            return Err(MemoryError::validation(format!(
                "community needs 3-5 keywords, got {}",
                keywords
            )));
        }
        Ok(())
    }
}

/// Produces a name, summary and keywords for a group of entities
#[async_trait]
pub trait CommunitySummarizer: Send + Sync {
    async fn summarize(&self, members: &[Entity]) -> Result<CommunitySummary>;
}

/// Deterministic summarizer built from entity names, kinds and descriptions
#[derive(Debug, Clone, Default)]
pub struct KeywordSummarizer;

impl KeywordSummarizer {
    pub fn new() -> Self {
        Self
    }

    fn keywords(members: &[Entity]) -> Vec<String> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for entity in members {
            // each entity votes once per token
            let mut seen = HashSet::new();
            for token in terms(&entity.name)
                .chain(terms(&entity.kind))
                .chain(terms(&entity.description))
            {
                if seen.insert(token.clone()) {
                    *counts.entry(token).or_default() += 1;
                }
            }
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().take(5).map(|(token, _)| token).collect()
    }

    fn title(word: &str) -> String {
        let mut chars = word.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

#[async_trait]
impl CommunitySummarizer for KeywordSummarizer {
    async fn summarize(&self, members: &[Entity]) -> Result<CommunitySummary> {
        let keywords = Self::keywords(members);

        let name = match keywords.as_slice() {
            [] => "Unnamed Cluster".to_string(),
            [only] => format!("{} Cluster", Self::title(only)),
            [first, second, ..] => format!("{} {} Cluster", Self::title(first), Self::title(second)),
        };

        let mut names: Vec<&str> = members.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        let shown = names.iter().take(3).copied().collect::<Vec<_>>().join(", ");
        let more = names.len().saturating_sub(3);
        let listed = if more > 0 {
            format!("{} and {} more", shown, more)
        } else {
            shown
        };

        let summary = format!(
            "Groups {} related entities: {}. Common themes are {}.",
            members.len(),
            listed,
            if keywords.is_empty() {
                "not yet known".to_string()
            } else {
                keywords.join(", ")
            }
        );

        Ok(CommunitySummary {
            name,
            summary,
            keywords,
        })
    }
}
