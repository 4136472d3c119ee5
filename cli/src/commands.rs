//! Command implementations
//!
//! Each command reads its inputs, runs one library operation and returns the
//! JSON to print, so they can be tested without a process boundary.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use sessiongraph_memory::community::{Adjacency, Communities};
use sessiongraph_memory::decay::Decayable;
use sessiongraph_memory::{
    detect_communities, filter_by_decay_threshold, merge_communities, DecayInput, DetectOptions,
    EntityId, MemoryType, SessionGraph, Timestamp,
};

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Label propagation over an adjacency file (`{"node": ["neighbor", ...]}`)
pub fn detect(graph: &Path, options: &DetectOptions) -> Result<Value> {
    let adjacency: Adjacency = read_json(graph)?;
    let communities = detect_communities(&adjacency, options);
    tracing::info!(
        "Detected {} communities over {} nodes",
        communities.len(),
        adjacency.len()
    );
    Ok(serde_json::to_value(communities)?)
}

pub fn merge(existing: &Path, detected: &Path, threshold: f64) -> Result<Value> {
    if !(0.0..=1.0).contains(&threshold) {
        bail!("threshold must be within [0, 1], got {}", threshold);
    }
    let existing: Communities = read_json(existing)?;
    let detected: Communities = read_json(detected)?;
    Ok(serde_json::to_value(merge_communities(&existing, &detected, threshold))?)
}

/// One scorer input row; `id` is echoed back
#[derive(Debug, Deserialize)]
pub struct ScoreItem {
    pub id: String,
    #[serde(flatten)]
    pub input: DecayInput,
}

impl Decayable for ScoreItem {
    fn memory_type(&self) -> &MemoryType {
        &self.input.memory_type
    }

    fn created_at(&self) -> Timestamp {
        self.input.created_at
    }

    fn access_count(&self) -> u64 {
        self.input.access_count
    }

    fn pinned(&self) -> bool {
        self.input.pinned
    }
}

#[derive(Debug, Serialize)]
struct Scored {
    id: String,
    decay_score: f64,
}

/// Decay scores at `now`, highest first, dropping those under `threshold`
pub fn score(items: &Path, now: Timestamp, threshold: f64) -> Result<Value> {
    let items: Vec<ScoreItem> = read_json(items)?;
    let scored: Vec<Scored> = filter_by_decay_threshold(items, threshold, now)
        .into_iter()
        .map(|s| Scored {
            id: s.item.id,
            decay_score: s.decay_score,
        })
        .collect();
    Ok(serde_json::to_value(scored)?)
}

pub async fn refresh(graph: &SessionGraph, project: &str, reason: &str) -> Result<Value> {
    let report = graph.community_service().refresh(project, reason).await?;
    graph.activity.reset(project).await?;
    Ok(serde_json::to_value(report)?)
}

/// Stored node kinds with version history
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Kind {
    Memory,
    Entity,
    Community,
    Turn,
}

pub async fn history(graph: &SessionGraph, kind: Kind, id: &str) -> Result<Value> {
    let id: EntityId = id.parse().with_context(|| format!("invalid id {:?}", id))?;
    let versions = match kind {
        Kind::Memory => serde_json::to_value(graph.memories.history(&id).await?)?,
        Kind::Entity => serde_json::to_value(graph.entities.history(&id).await?)?,
        Kind::Community => serde_json::to_value(graph.communities.history(&id).await?)?,
        Kind::Turn => serde_json::to_value(graph.turns.history(&id).await?)?,
    };
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessiongraph_memory::clock::MS_PER_DAY;
    use sessiongraph_memory::{EntityDraft, MemoryConfig, MemoryDraft, MemoryPatch};
    use serde_json::json;
    use std::io::Write;

    fn json_file(value: Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", value).unwrap();
        file
    }

    #[test]
    fn test_detect_triangle_and_pair() {
        let graph = json_file(json!({
            "a": ["b", "c"],
            "b": ["c"],
            "x": ["y"],
        }));
        let out = detect(graph.path(), &DetectOptions::default()).unwrap();
        let communities: Communities = serde_json::from_value(out).unwrap();
        assert_eq!(communities.len(), 1);
        let members = communities.values().next().unwrap();
        assert_eq!(members, &vec!["a".to_string(), "b".into(), "c".into()]);
    }

    #[test]
    fn test_merge_files() {
        let existing = json_file(json!({"g": ["a", "b", "c"]}));
        let detected = json_file(json!({"n": ["b", "c", "d"]}));
        let out = merge(existing.path(), detected.path(), 0.5).unwrap();
        assert_eq!(out, json!({"g": ["a", "b", "c", "d"]}));

        assert!(merge(existing.path(), detected.path(), 2.0).is_err());
    }

    #[test]
    fn test_score_filters_and_orders() {
        let now = Timestamp(1_000 * MS_PER_DAY);
        let items = json_file(json!([
            {"id": "old-turn", "memory_type": "turn", "created_at": 0},
            {"id": "fresh", "memory_type": "decision", "created_at": now.0},
            {"id": "pinned", "memory_type": "turn", "created_at": 0, "pinned": true},
        ]));
        let out = score(items.path(), now, 0.1).unwrap();
        let ids: Vec<&str> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["fresh", "pinned"]);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = detect(Path::new("/nonexistent/graph.json"), &DetectOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("reading"));
    }

    #[tokio::test]
    async fn test_refresh_and_history() {
        let graph = SessionGraph::in_memory(MemoryConfig::default());
        let mut ids = Vec::new();
        for name in ["parser", "lexer", "tokens"] {
            let e = graph
                .entities
                .create(
                    EntityDraft::new("p", name, "module").with_description("source text scanning"),
                    None,
                )
                .await
                .unwrap();
            ids.push(e.id);
        }
        graph.entities.relate(&ids[0], &ids[1], "uses").await.unwrap();
        graph.entities.relate(&ids[1], &ids[2], "uses").await.unwrap();
        graph.entities.relate(&ids[2], &ids[0], "uses").await.unwrap();
        graph.activity.record("p").await.unwrap();

        let report = refresh(&graph, "p", "cli").await.unwrap();
        assert_eq!(report["created"].as_array().unwrap().len(), 1);
        assert_eq!(graph.activity.get("p").await.unwrap(), 0);

        let memory = graph
            .memories
            .create(MemoryDraft::new("p", "lexer is hand written", MemoryType::Fact), None)
            .await
            .unwrap();
        let next = graph
            .memories
            .update(
                &memory.id,
                &MemoryPatch {
                    content: Some("lexer is generated".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let versions = history(&graph, Kind::Memory, &next.id.to_string()).await.unwrap();
        let versions = versions.as_array().unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0]["content"], "lexer is generated");
        assert_eq!(versions[1]["content"], "lexer is hand written");

        assert!(history(&graph, Kind::Memory, "not-a-uuid").await.is_err());
    }
}
