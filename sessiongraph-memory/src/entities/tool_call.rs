//! Tool invocations made during a turn

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::graph::Predicate;
use crate::id::EntityId;
use crate::temporal::Bitemporal;
use crate::versioned::{VersionedEntity, VersionedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    #[default]
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: EntityId,
    #[serde(flatten)]
    pub temporal: Bitemporal,
    pub session_id: String,
    pub turn_id: String,
    pub tool_name: String,
    /// Arguments as serialized JSON
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub status: ToolStatus,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl ToolCall {
    /// Decoded arguments; `None` when absent or malformed
    pub fn input_json(&self) -> Option<Value> {
        super::lenient_json(&self.id.to_string(), "input", self.input.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct ToolCallDraft {
    pub session_id: String,
    pub turn_id: String,
    pub tool_name: String,
    pub input: Option<Value>,
}

impl ToolCallDraft {
    pub fn new(session_id: impl Into<String>, turn_id: &EntityId, tool_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_id: turn_id.to_string(),
            tool_name: tool_name.into(),
            input: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }
}

/// Completion of a call
#[derive(Debug, Clone, Default)]
pub struct ToolCallPatch {
    pub output: Option<String>,
    pub status: Option<ToolStatus>,
    pub duration_ms: Option<u64>,
}

impl ToolCallPatch {
    pub fn finished(status: ToolStatus, output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            output: Some(output.into()),
            status: Some(status),
            duration_ms: Some(duration_ms),
        }
    }
}

impl VersionedEntity for ToolCall {
    const LABEL: &'static str = "ToolCall";
    type Draft = ToolCallDraft;
    type Patch = ToolCallPatch;

    fn from_draft(id: EntityId, temporal: Bitemporal, draft: ToolCallDraft) -> Self {
        Self {
            id,
            temporal,
            session_id: draft.session_id,
            turn_id: draft.turn_id,
            tool_name: draft.tool_name,
            input: draft.input.map(|v| v.to_string()),
            output: None,
            status: ToolStatus::Pending,
            duration_ms: None,
        }
    }

    super::versioned_accessors!();

    fn apply(&mut self, patch: &ToolCallPatch) {
        if let Some(output) = &patch.output {
            self.output = Some(output.clone());
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(ms) = patch.duration_ms {
            self.duration_ms = Some(ms);
        }
    }
}

impl VersionedStore<ToolCall> {
    pub async fn find_by_turn(&self, turn_id: &EntityId) -> Result<Vec<ToolCall>> {
        let mut calls = self
            .find_active(&[Predicate::eq("turn_id", turn_id.to_string())])
            .await?;
        calls.sort_by_key(|c| c.temporal.vt_start);
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::graph::{to_properties, GraphExecutor, InMemoryGraph};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_call_lifecycle() {
        let store: VersionedStore<ToolCall> =
            VersionedStore::new(Arc::new(InMemoryGraph::new()), Arc::new(SystemClock::new()));
        let turn = EntityId::new();

        let call = store
            .create(
                ToolCallDraft::new("s1", &turn, "grep").with_input(json!({"pattern": "TODO"})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(call.status, ToolStatus::Pending);
        assert_eq!(call.input_json().unwrap()["pattern"], "TODO");

        let done = store
            .update(&call.id, &ToolCallPatch::finished(ToolStatus::Success, "3 matches", 12))
            .await
            .unwrap();
        assert_eq!(done.status, ToolStatus::Success);
        assert_eq!(done.tool_name, "grep");

        let calls = store.find_by_turn(&turn).await.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].duration_ms, Some(12));
    }

    #[tokio::test]
    async fn test_malformed_input_reads_as_none() {
        let graph = Arc::new(InMemoryGraph::new());
        let store: VersionedStore<ToolCall> =
            VersionedStore::new(graph.clone(), Arc::new(SystemClock::new()));
        let call = store
            .create(ToolCallDraft::new("s1", &EntityId::new(), "bash"), None)
            .await
            .unwrap();

        let mut row = to_properties(&call).unwrap();
        let id = EntityId::new();
        row.insert("id".into(), json!(id.to_string()));
        row.insert("input".into(), json!("{truncated"));
        graph.create_node(ToolCall::LABEL, row).await.unwrap();

        let stored = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.input.as_deref(), Some("{truncated"));
        assert!(stored.input_json().is_none());
    }
}
