//! Graph query executor seam
//!
//! The versioning protocol talks to the backing graph store only through
//! [`GraphExecutor`]. A backend must offer label-scoped node matching with
//! property predicates, edge creation between two existing nodes, and a
//! conditional property write that applies only to rows still matching its
//! predicates. That conditional write is what optimistic concurrency rests on.

mod memory;
#[cfg(feature = "rocksdb")]
mod rocks;

pub use memory::InMemoryGraph;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksGraph;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{MemoryError, Result};

/// Row shape exchanged with the executor
pub type Properties = serde_json::Map<String, Value>;

/// Edge from a new version to the version it supersedes
pub const REPLACES: &str = "REPLACES";
/// Entity to Community membership
pub const MEMBER_OF: &str = "MEMBER_OF";
/// Entity to Entity relationship, source of the detection snapshot
pub const RELATES_TO: &str = "RELATES_TO";
/// Memory to Entity reference
pub const ABOUT: &str = "ABOUT";

/// Property predicate evaluated against a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Eq(String, Value),
    Lte(String, Value),
    Gt(String, Value),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    /// Missing properties compare as `null`
    pub fn matches(&self, row: &Properties) -> bool {
        let lookup = |field: &str| row.get(field).unwrap_or(&Value::Null);
        match self {
            Self::Eq(field, expected) => lookup(field) == expected,
            Self::Lte(field, bound) => {
                matches!(compare(lookup(field), bound), Some(Ordering::Less | Ordering::Equal))
            }
            Self::Gt(field, bound) => matches!(compare(lookup(field), bound), Some(Ordering::Greater)),
        }
    }
}

/// Every predicate must hold
pub fn matches_all(predicates: &[Predicate], row: &Properties) -> bool {
    predicates.iter().all(|p| p.matches(row))
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Endpoint of an edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub label: String,
    pub id: String,
}

impl NodeRef {
    pub fn new(label: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: id.into(),
        }
    }
}

/// A directed, typed edge with its own properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub edge_type: String,
    pub from: NodeRef,
    pub to: NodeRef,
    #[serde(default)]
    pub properties: Properties,
}

impl EdgeRecord {
    pub fn new(edge_type: impl Into<String>, from: NodeRef, to: NodeRef) -> Self {
        Self {
            edge_type: edge_type.into(),
            from,
            to,
            properties: Properties::new(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

/// Edge match pattern; unset parts match anything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgePattern {
    pub edge_type: String,
    pub from_label: Option<String>,
    pub from_id: Option<String>,
    pub to_label: Option<String>,
    pub to_id: Option<String>,
    pub predicates: Vec<Predicate>,
}

impl EdgePattern {
    pub fn of_type(edge_type: impl Into<String>) -> Self {
        Self {
            edge_type: edge_type.into(),
            ..Default::default()
        }
    }

    pub fn from_label(mut self, label: impl Into<String>) -> Self {
        self.from_label = Some(label.into());
        self
    }

    pub fn from_id(mut self, id: impl Into<String>) -> Self {
        self.from_id = Some(id.into());
        self
    }

    pub fn to_label(mut self, label: impl Into<String>) -> Self {
        self.to_label = Some(label.into());
        self
    }

    pub fn to_id(mut self, id: impl Into<String>) -> Self {
        self.to_id = Some(id.into());
        self
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn matches(&self, edge: &EdgeRecord) -> bool {
        fn opt(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().map_or(true, |e| e == actual)
        }
        self.edge_type == edge.edge_type
            && opt(&self.from_label, &edge.from.label)
            && opt(&self.from_id, &edge.from.id)
            && opt(&self.to_label, &edge.to.label)
            && opt(&self.to_id, &edge.to.id)
            && matches_all(&self.predicates, &edge.properties)
    }
}

/// Parameterized access to the backing graph store
#[async_trait]
pub trait GraphExecutor: Send + Sync {
    /// Insert a node; `properties` must carry an `id`
    async fn create_node(&self, label: &str, properties: Properties) -> Result<()>;

    /// All rows under `label` satisfying every predicate
    async fn match_nodes(&self, label: &str, predicates: &[Predicate]) -> Result<Vec<Properties>>;

    /// Conditional SET: merge `set` into every row under `label` that still
    /// satisfies `predicates` at write time. Returns the affected row count.
    async fn set_properties(
        &self,
        label: &str,
        predicates: &[Predicate],
        set: Properties,
    ) -> Result<u64>;

    /// Create an edge between two existing nodes. Returns `false` without
    /// writing when either endpoint does not match.
    async fn create_edge(&self, edge: EdgeRecord) -> Result<bool>;

    async fn match_edges(&self, pattern: &EdgePattern) -> Result<Vec<EdgeRecord>>;

    /// Returns the number of edges removed
    async fn delete_edges(&self, pattern: &EdgePattern) -> Result<u64>;
}

/// Serialize a node struct into a property row
pub fn to_properties<T: Serialize>(value: &T) -> Result<Properties> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(MemoryError::other(format!(
            "expected an object row, got {}",
            other
        ))),
    }
}

/// Deserialize a property row into a node struct
pub fn from_properties<T: DeserializeOwned>(row: Properties) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

pub(crate) fn row_id(row: &Properties) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}
