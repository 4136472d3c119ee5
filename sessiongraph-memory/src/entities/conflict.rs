//! Reports of contradicting memories awaiting review
//!
//! Reports are not versioned. Resolution is a single in-place write guarded
//! on the report still being `pending_review`, so a report resolves once.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::clock::{Clock, Timestamp};
use crate::error::{MemoryError, Result};
use crate::graph::{from_properties, to_properties, GraphExecutor, Predicate, Properties};
use crate::id::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    PendingReview,
    Confirmed,
    Dismissed,
    AutoResolved,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::Confirmed => "confirmed",
            Self::Dismissed => "dismissed",
            Self::AutoResolved => "auto_resolved",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PendingReview)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub id: EntityId,
    pub memory_a: String,
    pub memory_b: String,
    /// How the two memories disagree, e.g. `contradicts`, `supersedes`
    pub relation: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    pub status: ConflictStatus,
    pub created_at: Timestamp,
    #[serde(default)]
    pub reviewed_at: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct ConflictDraft {
    pub memory_a: EntityId,
    pub memory_b: EntityId,
    pub relation: String,
    pub confidence: f64,
    pub reasoning: String,
}

impl ConflictDraft {
    pub fn new(memory_a: EntityId, memory_b: EntityId, relation: impl Into<String>) -> Self {
        Self {
            memory_a,
            memory_b,
            relation: relation.into(),
            confidence: 1.0,
            reasoning: String::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

/// Repository for [`ConflictReport`] nodes
#[derive(Clone)]
pub struct ConflictStore {
    executor: Arc<dyn GraphExecutor>,
    clock: Arc<dyn Clock>,
}

impl ConflictStore {
    pub const LABEL: &'static str = "Conflict";

    pub fn new(executor: Arc<dyn GraphExecutor>, clock: Arc<dyn Clock>) -> Self {
        Self { executor, clock }
    }

    fn decode(rows: Vec<Properties>) -> Vec<ConflictReport> {
        rows.into_iter()
            .filter_map(|row| match from_properties(row) {
                Ok(report) => Some(report),
                Err(e) => {
                    log::warn!("Failed to decode conflict report: {}. Skipping.", e);
                    None
                }
            })
            .collect()
    }

    pub async fn open(&self, draft: ConflictDraft) -> Result<ConflictReport> {
        let report = ConflictReport {
            id: EntityId::new(),
            memory_a: draft.memory_a.to_string(),
            memory_b: draft.memory_b.to_string(),
            relation: draft.relation,
            confidence: draft.confidence,
            reasoning: draft.reasoning,
            status: ConflictStatus::PendingReview,
            created_at: self.clock.now(),
            reviewed_at: None,
        };
        self.executor
            .create_node(Self::LABEL, to_properties(&report)?)
            .await?;
        log::info!(
            "Opened conflict {} between {} and {}",
            report.id,
            report.memory_a,
            report.memory_b
        );
        Ok(report)
    }

    pub async fn find_by_id(&self, id: &EntityId) -> Result<Option<ConflictReport>> {
        let rows = self
            .executor
            .match_nodes(Self::LABEL, &[Predicate::eq("id", id.to_string())])
            .await?;
        Ok(Self::decode(rows).into_iter().next())
    }

    /// Reports awaiting review, oldest first
    pub async fn find_pending(&self) -> Result<Vec<ConflictReport>> {
        let rows = self
            .executor
            .match_nodes(
                Self::LABEL,
                &[Predicate::eq("status", ConflictStatus::PendingReview.as_str())],
            )
            .await?;
        let mut reports = Self::decode(rows);
        reports.sort_by_key(|r| r.created_at);
        Ok(reports)
    }

    /// Move a pending report into a terminal status
    pub async fn resolve(&self, id: &EntityId, status: ConflictStatus) -> Result<ConflictReport> {
        if !status.is_terminal() {
            return Err(MemoryError::InvalidTransition {
                id: id.to_string(),
                from: ConflictStatus::PendingReview.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        let reviewed_at = self.clock.now();
        let affected = self
            .executor
            .set_properties(
                Self::LABEL,
                &[
                    Predicate::eq("id", id.to_string()),
                    Predicate::eq("status", ConflictStatus::PendingReview.as_str()),
                ],
                to_properties(&json!({
                    "status": status,
                    "reviewed_at": reviewed_at,
                }))?,
            )
            .await?;

        let current = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| MemoryError::not_found(format!("{} {}", Self::LABEL, id)))?;
        if affected == 0 {
            return Err(MemoryError::InvalidTransition {
                id: id.to_string(),
                from: current.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        log::info!("Conflict {} resolved as {}", id, status.as_str());
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::graph::InMemoryGraph;

    fn store() -> ConflictStore {
        ConflictStore::new(
            Arc::new(InMemoryGraph::new()),
            Arc::new(ManualClock::new(Timestamp(100))),
        )
    }

    #[tokio::test]
    async fn test_resolve_once() {
        let store = store();
        let report = store
            .open(
                ConflictDraft::new(EntityId::new(), EntityId::new(), "contradicts")
                    .with_confidence(0.8)
                    .with_reasoning("one says tabs, the other spaces"),
            )
            .await
            .unwrap();
        assert_eq!(store.find_pending().await.unwrap().len(), 1);

        let resolved = store
            .resolve(&report.id, ConflictStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(resolved.status, ConflictStatus::Confirmed);
        assert!(resolved.reviewed_at.unwrap() > report.created_at);
        assert!(store.find_pending().await.unwrap().is_empty());

        match store.resolve(&report.id, ConflictStatus::Dismissed).await {
            Err(MemoryError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, "confirmed");
                assert_eq!(to, "dismissed");
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.status)),
        }
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let store = store();
        assert!(matches!(
            store.resolve(&EntityId::new(), ConflictStatus::Dismissed).await,
            Err(MemoryError::NotFound(_))
        ));

        let report = store
            .open(ConflictDraft::new(EntityId::new(), EntityId::new(), "duplicates"))
            .await
            .unwrap();
        assert!(matches!(
            store.resolve(&report.id, ConflictStatus::PendingReview).await,
            Err(MemoryError::InvalidTransition { .. })
        ));
    }
}
