//! Long-lived memories distilled from sessions
//!
//! Content and classification are versioned like every other node. Decay
//! metadata (`last_accessed`, `access_count`, `decay_score`) changes on every
//! read and is written in place on the active version instead.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::Entity;
use crate::clock::Timestamp;
use crate::decay::{decay_score, Decayable};
use crate::error::{MemoryError, Result};
use crate::graph::{to_properties, EdgeRecord, NodeRef, Predicate, ABOUT, REPLACES};
use crate::id::EntityId;
use crate::temporal::Bitemporal;
use crate::versioned::{id_is, open_tt, VersionedEntity, VersionedStore};

/// Memory classification. Unrecognised stored values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemoryType {
    Decision,
    Preference,
    Insight,
    Fact,
    Context,
    Turn,
    Unknown(String),
}

impl MemoryType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Decision => "decision",
            Self::Preference => "preference",
            Self::Insight => "insight",
            Self::Fact => "fact",
            Self::Context => "context",
            Self::Turn => "turn",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for MemoryType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "decision" => Self::Decision,
            "preference" => Self::Preference,
            "insight" => Self::Insight,
            "fact" => Self::Fact,
            "context" => Self::Context,
            "turn" => Self::Turn,
            _ => Self::Unknown(value),
        }
    }
}

impl From<&str> for MemoryType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<MemoryType> for String {
    fn from(value: MemoryType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SHA-256 of the content, lowercase hex
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn fresh_score() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: EntityId,
    #[serde(flatten)]
    pub temporal: Bitemporal,
    pub project: String,
    pub content: String,
    pub content_hash: String,
    pub memory_type: MemoryType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Free-form JSON, stored serialized
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub last_accessed: Option<Timestamp>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default = "fresh_score")]
    pub decay_score: f64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub replaced_by_id: Option<String>,
}

impl Memory {
    /// Decoded metadata; `None` when absent or malformed
    pub fn metadata_json(&self) -> Option<Value> {
        super::lenient_json(&self.id.to_string(), "metadata", self.metadata.as_deref())
    }
}

impl Decayable for Memory {
    fn memory_type(&self) -> &MemoryType {
        &self.memory_type
    }

    fn created_at(&self) -> Timestamp {
        self.temporal.vt_start
    }

    fn access_count(&self) -> u64 {
        self.access_count
    }

    fn pinned(&self) -> bool {
        self.pinned
    }
}

/// Builder for a new memory
#[derive(Debug, Clone)]
pub struct MemoryDraft {
    pub project: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<Value>,
    pub pinned: bool,
}

impl MemoryDraft {
    pub fn new(project: impl Into<String>, content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            project: project.into(),
            content: content.into(),
            memory_type,
            tags: Vec::new(),
            source: None,
            embedding: None,
            metadata: None,
            pinned: false,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub tags: Option<Vec<String>>,
    pub source: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<Value>,
    pub pinned: Option<bool>,
}

impl VersionedEntity for Memory {
    const LABEL: &'static str = "Memory";
    type Draft = MemoryDraft;
    type Patch = MemoryPatch;

    fn from_draft(id: EntityId, temporal: Bitemporal, draft: MemoryDraft) -> Self {
        Self {
            id,
            temporal,
            content_hash: content_hash(&draft.content),
            project: draft.project,
            content: draft.content,
            memory_type: draft.memory_type,
            tags: draft.tags,
            source: draft.source,
            embedding: draft.embedding,
            metadata: draft.metadata.map(|v| v.to_string()),
            last_accessed: None,
            access_count: 0,
            decay_score: 1.0,
            pinned: draft.pinned,
            replaced_by_id: None,
        }
    }

    super::versioned_accessors!();

    fn apply(&mut self, patch: &MemoryPatch) {
        if let Some(content) = &patch.content {
            self.content_hash = content_hash(content);
            self.content = content.clone();
        }
        if let Some(memory_type) = &patch.memory_type {
            self.memory_type = memory_type.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(source) = &patch.source {
            self.source = Some(source.clone());
        }
        if let Some(embedding) = &patch.embedding {
            self.embedding = Some(embedding.clone());
        }
        if let Some(metadata) = &patch.metadata {
            self.metadata = Some(metadata.to_string());
        }
        if let Some(pinned) = patch.pinned {
            self.pinned = pinned;
        }
    }
}

impl VersionedStore<Memory> {
    pub async fn find_by_project(&self, project: &str) -> Result<Vec<Memory>> {
        self.find_active(&[Predicate::eq("project", project)]).await
    }

    pub async fn find_by_tag(&self, project: &str, tag: &str) -> Result<Vec<Memory>> {
        let mut memories = self.find_by_project(project).await?;
        memories.retain(|m| m.tags.iter().any(|t| t == tag));
        Ok(memories)
    }

    pub async fn find_by_content_hash(&self, project: &str, hash: &str) -> Result<Option<Memory>> {
        let mut found = self
            .find_active(&[
                Predicate::eq("project", project),
                Predicate::eq("content_hash", hash),
            ])
            .await?;
        found.sort_by_key(|m| m.temporal.tt_start);
        Ok(found.pop())
    }

    /// Store `draft` unless the project already holds an active memory with
    /// identical content. Returns the memory and whether it was created.
    pub async fn remember(&self, draft: MemoryDraft) -> Result<(Memory, bool)> {
        let hash = content_hash(&draft.content);
        if let Some(existing) = self.find_by_content_hash(&draft.project, &hash).await? {
            log::debug!("Memory {} already holds this content", existing.id);
            return Ok((existing, false));
        }
        Ok((self.create(draft, None).await?, true))
    }

    /// Close both windows of `id` in place, optionally recording the active
    /// memory that replaces it.
    ///
    /// Only an open version is closed: if a concurrent update closed `id`
    /// first, this reports `NotFound` for the superseded version.
    pub async fn invalidate(&self, id: &EntityId, replaced_by: Option<&EntityId>) -> Result<()> {
        let current = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| MemoryError::not_found(format!("Memory {}", id)))?;
        let replacement = match replaced_by {
            Some(rid) => Some(
                self.find_by_id(rid)
                    .await?
                    .ok_or_else(|| MemoryError::not_found(format!("replacement Memory {}", rid)))?,
            ),
            None => None,
        };

        let now = self.now();
        // a memory recorded ahead of its valid time still ends no earlier
        // than it starts
        let valid_until = now.max(current.temporal.vt_start);
        let closed = self
            .executor()
            .set_properties(
                Memory::LABEL,
                &[id_is(id), open_tt()],
                to_properties(&json!({
                    "vt_end": valid_until,
                    "tt_end": now,
                    "replaced_by_id": replacement.as_ref().map(|r| r.id.to_string()),
                }))?,
            )
            .await?;
        if closed == 0 {
            return Err(MemoryError::not_found(format!("Memory {}", id)));
        }

        if let Some(replacement) = replacement {
            let edge = EdgeRecord::new(
                REPLACES,
                NodeRef::new(Memory::LABEL, replacement.id.to_string()),
                NodeRef::new(Memory::LABEL, id.to_string()),
            )
            .with_properties(to_properties(&replacement.temporal.edge_stamp())?);
            self.executor().create_edge(edge).await?;
            log::info!("Memory {} invalidated, replaced by {}", id, replacement.id);
        } else {
            log::info!("Memory {} invalidated", id);
        }
        Ok(())
    }

    /// Count a read of `id`. Written in place; no new version.
    pub async fn record_access(&self, id: &EntityId, now: Timestamp) -> Result<Memory> {
        let mut memory = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| MemoryError::not_found(format!("Memory {}", id)))?;
        memory.access_count += 1;
        memory.last_accessed = Some(now);

        let written = self
            .set_in_place(
                id,
                to_properties(&json!({
                    "access_count": memory.access_count,
                    "last_accessed": now,
                }))?,
            )
            .await?;
        if !written {
            return Err(MemoryError::not_found(format!("Memory {}", id)));
        }
        Ok(memory)
    }

    /// Persist the current decay score of every active memory in `project`.
    /// Returns how many rows changed.
    pub async fn refresh_decay_scores(&self, project: &str, now: Timestamp) -> Result<usize> {
        let mut changed = 0;
        for memory in self.find_by_project(project).await? {
            let score = decay_score(&memory, now);
            if (score - memory.decay_score).abs() < f64::EPSILON {
                continue;
            }
            if self
                .set_in_place(&memory.id, to_properties(&json!({ "decay_score": score }))?)
                .await?
            {
                changed += 1;
            }
        }
        log::debug!("Refreshed {} decay scores in {}", changed, project);
        Ok(changed)
    }

    /// Record that `memory` is about `entity` (an `ABOUT` edge)
    pub async fn link_entity(&self, memory: &EntityId, entity: &EntityId) -> Result<bool> {
        let edge = EdgeRecord::new(
            ABOUT,
            NodeRef::new(Memory::LABEL, memory.to_string()),
            NodeRef::new(Entity::LABEL, entity.to_string()),
        )
        .with_properties(to_properties(&json!({ "created_at": self.now() }))?);
        self.executor().create_edge(edge).await
    }

    /// Memories invalidated or versioned away that are still recorded
    pub async fn find_closed(&self, project: &str) -> Result<Vec<Memory>> {
        let all = self
            .executor()
            .match_nodes(Memory::LABEL, &[Predicate::eq("project", project)])
            .await?;
        let active = open_tt();
        Ok(all
            .into_iter()
            .filter(|row| !active.matches(row))
            .filter_map(|row| crate::graph::from_properties(row).ok())
            .collect())
    }
}
