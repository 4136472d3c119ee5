//! RocksDB graph backend
//!
//! Layout:
//! - `node:{label}:{id}` -> MessagePack property row
//! - `edge:{type}:{uuid}` -> MessagePack [`EdgeRecord`]
//! - `_db_version` -> little-endian u32 (see [`crate::migration`])
//!
//! Reads go straight to RocksDB. Writes that must observe a row first
//! (conditional SET, edge creation, node insertion) run under a writer lock
//! so the check and the write cannot interleave with another writer.

use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::{matches_all, row_id, EdgePattern, EdgeRecord, GraphExecutor, NodeRef, Predicate, Properties};
use crate::error::{MemoryError, Result};
use crate::migration;

/// RocksDB-based graph store
pub struct RocksGraph {
    db: Arc<DB>,
    write_lock: Mutex<()>,
}

pub(crate) fn node_key(label: &str, id: &str) -> String {
    format!("node:{}:{}", label, id)
}

fn node_prefix(label: &str) -> String {
    format!("node:{}:", label)
}

fn edge_prefix(edge_type: &str) -> String {
    format!("edge:{}:", edge_type)
}

impl RocksGraph {
    /// Open (or create) a graph at `path`, migrating older layouts first
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        migration::migrate_if_needed(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(2);
        opts.set_bytes_per_sync(1048576); // 1MB
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        migration::stamp_current_version(&db)?;

        log::info!("RocksGraph opened at: {}", path.display());

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Decoded values under a key prefix. Undecodable entries are skipped.
    fn scan<T: serde::de::DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(Vec<u8>, T)>> {
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            match rmp_serde::from_slice::<T>(&value) {
                Ok(decoded) => out.push((key.to_vec(), decoded)),
                Err(e) => {
                    log::warn!(
                        "Failed to decode {}: {}. Skipping.",
                        String::from_utf8_lossy(&key),
                        e
                    );
                }
            }
        }
        Ok(out)
    }

    fn find_rows(&self, label: &str, predicates: &[Predicate]) -> Result<Vec<Properties>> {
        // Point lookup when the id is pinned by an equality predicate
        let pinned_id = predicates.iter().find_map(|p| match p {
            Predicate::Eq(field, value) if field == "id" => value.as_str(),
            _ => None,
        });
        if let Some(id) = pinned_id {
            let Some(bytes) = self.db.get(node_key(label, id).as_bytes())? else {
                return Ok(Vec::new());
            };
            let row: Properties = rmp_serde::from_slice(&bytes)?;
            return Ok(if matches_all(predicates, &row) {
                vec![row]
            } else {
                Vec::new()
            });
        }

        Ok(self
            .scan::<Properties>(&node_prefix(label))?
            .into_iter()
            .map(|(_, row)| row)
            .filter(|row| matches_all(predicates, row))
            .collect())
    }

    fn contains(&self, node: &NodeRef) -> Result<bool> {
        Ok(self
            .db
            .get_pinned(node_key(&node.label, &node.id).as_bytes())?
            .is_some())
    }
}

#[async_trait]
impl GraphExecutor for RocksGraph {
    async fn create_node(&self, label: &str, properties: Properties) -> Result<()> {
        let id = row_id(&properties)
            .ok_or_else(|| MemoryError::storage(format!("{} node without id", label)))?
            .to_string();
        let key = node_key(label, &id);

        let _guard = self.write_lock.lock();
        if self.db.get_pinned(key.as_bytes())?.is_some() {
            return Err(MemoryError::storage(format!("duplicate {} id {}", label, id)));
        }
        self.db
            .put(key.as_bytes(), rmp_serde::to_vec_named(&properties)?)?;
        Ok(())
    }

    async fn match_nodes(&self, label: &str, predicates: &[Predicate]) -> Result<Vec<Properties>> {
        self.find_rows(label, predicates)
    }

    async fn set_properties(
        &self,
        label: &str,
        predicates: &[Predicate],
        set: Properties,
    ) -> Result<u64> {
        let _guard = self.write_lock.lock();
        let rows = self.find_rows(label, predicates)?;
        let mut batch = WriteBatch::default();
        let mut affected = 0;
        for mut row in rows {
            let Some(id) = row_id(&row).map(str::to_string) else {
                continue;
            };
            for (key, value) in &set {
                row.insert(key.clone(), value.clone());
            }
            batch.put(node_key(label, &id).as_bytes(), rmp_serde::to_vec_named(&row)?);
            affected += 1;
        }
        if affected > 0 {
            self.db.write(batch)?;
        }
        Ok(affected)
    }

    async fn create_edge(&self, edge: EdgeRecord) -> Result<bool> {
        let _guard = self.write_lock.lock();
        if !self.contains(&edge.from)? || !self.contains(&edge.to)? {
            return Ok(false);
        }
        let key = format!("{}{}", edge_prefix(&edge.edge_type), Uuid::now_v7());
        self.db.put(key.as_bytes(), rmp_serde::to_vec_named(&edge)?)?;
        Ok(true)
    }

    async fn match_edges(&self, pattern: &EdgePattern) -> Result<Vec<EdgeRecord>> {
        Ok(self
            .scan::<EdgeRecord>(&edge_prefix(&pattern.edge_type))?
            .into_iter()
            .map(|(_, edge)| edge)
            .filter(|edge| pattern.matches(edge))
            .collect())
    }

    async fn delete_edges(&self, pattern: &EdgePattern) -> Result<u64> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for (key, edge) in self.scan::<EdgeRecord>(&edge_prefix(&pattern.edge_type))? {
            if pattern.matches(&edge) {
                batch.delete(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            self.db.write(batch)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{to_properties, REPLACES};
    use serde_json::json;
    use tempfile::TempDir;

    fn node(id: &str, tt_end: i64) -> Properties {
        to_properties(&json!({"id": id, "tt_end": tt_end, "tags": ["a", "b"]})).unwrap()
    }

    #[tokio::test]
    async fn test_nodes_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let graph = RocksGraph::open(dir.path()).unwrap();
            graph.create_node("Memory", node("m1", 7)).await.unwrap();
            graph.create_node("Memory", node("m2", 7)).await.unwrap();
            graph.create_node("Entity", node("e1", 7)).await.unwrap();
        }
        let graph = RocksGraph::open(dir.path()).unwrap();
        let rows = graph.match_nodes("Memory", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["tags"], json!(["a", "b"]));

        let one = graph
            .match_nodes("Memory", &[Predicate::eq("id", "m2")])
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn test_conditional_set() {
        let dir = TempDir::new().unwrap();
        let graph = RocksGraph::open(dir.path()).unwrap();
        graph.create_node("Memory", node("m1", 7)).await.unwrap();

        let guard = [Predicate::eq("id", "m1"), Predicate::eq("tt_end", 7)];
        let set = to_properties(&json!({"tt_end": 3})).unwrap();
        assert_eq!(graph.set_properties("Memory", &guard, set.clone()).await.unwrap(), 1);
        assert_eq!(graph.set_properties("Memory", &guard, set).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_edges() {
        let dir = TempDir::new().unwrap();
        let graph = RocksGraph::open(dir.path()).unwrap();
        graph.create_node("Memory", node("new", 7)).await.unwrap();
        graph.create_node("Memory", node("old", 3)).await.unwrap();

        let edge = EdgeRecord::new(REPLACES, NodeRef::new("Memory", "new"), NodeRef::new("Memory", "old"));
        assert!(graph.create_edge(edge).await.unwrap());
        let missing = EdgeRecord::new(REPLACES, NodeRef::new("Memory", "new"), NodeRef::new("Memory", "gone"));
        assert!(!graph.create_edge(missing).await.unwrap());

        let found = graph
            .match_edges(&EdgePattern::of_type(REPLACES).to_id("old"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].from.id, "new");

        let removed = graph
            .delete_edges(&EdgePattern::of_type(REPLACES))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
