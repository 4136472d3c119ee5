//! Reasoning traces attached to turns

use serde::{Deserialize, Serialize};

use super::Turn;
use crate::error::{MemoryError, Result};
use crate::graph::Predicate;
use crate::id::EntityId;
use crate::temporal::Bitemporal;
use crate::versioned::{VersionedEntity, VersionedStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub id: EntityId,
    #[serde(flatten)]
    pub temporal: Bitemporal,
    pub session_id: String,
    pub turn_id: String,
    pub content: String,
    pub step_index: u32,
}

#[derive(Debug, Clone)]
pub struct ReasoningDraft {
    pub session_id: String,
    pub turn_id: String,
    pub content: String,
    pub step_index: u32,
}

impl ReasoningDraft {
    pub fn new(session_id: impl Into<String>, turn_id: &EntityId, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_id: turn_id.to_string(),
            content: content.into(),
            step_index: 0,
        }
    }

    pub fn step(mut self, index: u32) -> Self {
        self.step_index = index;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReasoningPatch {
    pub content: Option<String>,
}

impl VersionedEntity for ReasoningTrace {
    const LABEL: &'static str = "Reasoning";
    type Draft = ReasoningDraft;
    type Patch = ReasoningPatch;

    fn from_draft(id: EntityId, temporal: Bitemporal, draft: ReasoningDraft) -> Self {
        Self {
            id,
            temporal,
            session_id: draft.session_id,
            turn_id: draft.turn_id,
            content: draft.content,
            step_index: draft.step_index,
        }
    }

    super::versioned_accessors!();

    fn apply(&mut self, patch: &ReasoningPatch) {
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
    }
}

impl VersionedStore<ReasoningTrace> {
    /// Steps recorded for any version of a turn, in order
    pub async fn find_by_turn(&self, turn_id: &EntityId) -> Result<Vec<ReasoningTrace>> {
        let turns = self.sibling::<Turn>();
        let head = turns.find_current(turn_id).await?.map_or(*turn_id, |t| t.id);
        let versions = match turns.history(&head).await {
            Ok(chain) => chain.into_iter().map(|t| t.id).collect(),
            Err(MemoryError::NotFound(_)) => vec![*turn_id],
            Err(e) => return Err(e),
        };

        let mut steps = Vec::new();
        for version in versions {
            steps.extend(
                self.find_active(&[Predicate::eq("turn_id", version.to_string())])
                    .await?,
            );
        }
        steps.sort_by_key(|s| s.step_index);
        Ok(steps)
    }
}
