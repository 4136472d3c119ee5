//! Conversation turns

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::Predicate;
use crate::id::EntityId;
use crate::temporal::Bitemporal;
use crate::versioned::{VersionedEntity, VersionedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One message of an agent session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: EntityId,
    #[serde(flatten)]
    pub temporal: Bitemporal,
    pub session_id: String,
    pub project: String,
    pub role: Role,
    pub content: String,
    /// Position within the session
    pub sequence: u32,
}

#[derive(Debug, Clone)]
pub struct TurnDraft {
    pub session_id: String,
    pub project: String,
    pub role: Role,
    pub content: String,
    pub sequence: u32,
}

impl TurnDraft {
    pub fn new(
        session_id: impl Into<String>,
        project: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project: project.into(),
            role,
            content: content.into(),
            sequence: 0,
        }
    }

    pub fn at(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TurnPatch {
    pub role: Option<Role>,
    pub content: Option<String>,
}

impl VersionedEntity for Turn {
    const LABEL: &'static str = "Turn";
    type Draft = TurnDraft;
    type Patch = TurnPatch;

    fn from_draft(id: EntityId, temporal: Bitemporal, draft: TurnDraft) -> Self {
        Self {
            id,
            temporal,
            session_id: draft.session_id,
            project: draft.project,
            role: draft.role,
            content: draft.content,
            sequence: draft.sequence,
        }
    }

    super::versioned_accessors!();

    fn apply(&mut self, patch: &TurnPatch) {
        if let Some(role) = patch.role {
            self.role = role;
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
    }
}

impl VersionedStore<Turn> {
    /// Active turns of a session in sequence order
    pub async fn find_by_session(&self, session_id: &str) -> Result<Vec<Turn>> {
        let mut turns = self
            .find_active(&[Predicate::eq("session_id", session_id)])
            .await?;
        turns.sort_by_key(|t| (t.sequence, t.temporal.tt_start));
        Ok(turns)
    }
}
