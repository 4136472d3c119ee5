//! In-process graph backend
//!
//! Every query runs under a single `RwLock`, so the conditional write in
//! `set_properties` is atomic with respect to other writers.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{matches_all, row_id, EdgePattern, EdgeRecord, GraphExecutor, NodeRef, Predicate, Properties};
use crate::error::{MemoryError, Result};

#[derive(Default)]
struct GraphState {
    /// label -> rows in insertion order
    nodes: HashMap<String, Vec<Properties>>,
    edges: Vec<EdgeRecord>,
}

impl GraphState {
    fn contains(&self, node: &NodeRef) -> bool {
        self.nodes
            .get(&node.label)
            .is_some_and(|rows| rows.iter().any(|r| row_id(r) == Some(node.id.as_str())))
    }
}

/// Graph store held entirely in memory
#[derive(Default)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows under `label`, open or closed
    pub fn node_count(&self, label: &str) -> usize {
        self.state.read().nodes.get(label).map_or(0, Vec::len)
    }

    pub fn edge_count(&self, edge_type: &str) -> usize {
        self.state
            .read()
            .edges
            .iter()
            .filter(|e| e.edge_type == edge_type)
            .count()
    }
}

#[async_trait]
impl GraphExecutor for InMemoryGraph {
    async fn create_node(&self, label: &str, properties: Properties) -> Result<()> {
        let id = row_id(&properties)
            .ok_or_else(|| MemoryError::storage(format!("{} node without id", label)))?
            .to_string();
        let mut state = self.state.write();
        if state.contains(&NodeRef::new(label, id.as_str())) {
            return Err(MemoryError::storage(format!("duplicate {} id {}", label, id)));
        }
        state
            .nodes
            .entry(label.to_string())
            .or_default()
            .push(properties);
        Ok(())
    }

    async fn match_nodes(&self, label: &str, predicates: &[Predicate]) -> Result<Vec<Properties>> {
        let state = self.state.read();
        Ok(state
            .nodes
            .get(label)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(predicates, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_properties(
        &self,
        label: &str,
        predicates: &[Predicate],
        set: Properties,
    ) -> Result<u64> {
        let mut state = self.state.write();
        let Some(rows) = state.nodes.get_mut(label) else {
            return Ok(0);
        };
        let mut affected = 0;
        for row in rows.iter_mut().filter(|row| matches_all(predicates, row)) {
            for (key, value) in &set {
                row.insert(key.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn create_edge(&self, edge: EdgeRecord) -> Result<bool> {
        let mut state = self.state.write();
        if !state.contains(&edge.from) || !state.contains(&edge.to) {
            return Ok(false);
        }
        state.edges.push(edge);
        Ok(true)
    }

    async fn match_edges(&self, pattern: &EdgePattern) -> Result<Vec<EdgeRecord>> {
        let state = self.state.read();
        Ok(state
            .edges
            .iter()
            .filter(|e| pattern.matches(e))
            .cloned()
            .collect())
    }

    async fn delete_edges(&self, pattern: &EdgePattern) -> Result<u64> {
        let mut state = self.state.write();
        let before = state.edges.len();
        state.edges.retain(|e| !pattern.matches(e));
        Ok((before - state.edges.len()) as u64)
    }
}
