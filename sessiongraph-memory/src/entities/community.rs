//! Detected communities of related entities

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

use super::{Entity, Memory};
use crate::error::{MemoryError, Result};
use crate::graph::{to_properties, EdgePattern, EdgeRecord, NodeRef, Predicate, ABOUT, MEMBER_OF};
use crate::id::EntityId;
use crate::temporal::Bitemporal;
use crate::versioned::{VersionedEntity, VersionedStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: EntityId,
    #[serde(flatten)]
    pub temporal: Bitemporal,
    pub project: String,
    /// Detection key, stable across versions (`community-<member>`)
    pub key: String,
    pub name: String,
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub memory_count: u32,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct CommunityDraft {
    pub project: String,
    pub key: String,
    pub name: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub member_count: u32,
    pub memory_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CommunityPatch {
    pub name: Option<String>,
    pub summary: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub member_count: Option<u32>,
    pub memory_count: Option<u32>,
    pub embedding: Option<Vec<f32>>,
}

impl VersionedEntity for Community {
    const LABEL: &'static str = "Community";
    type Draft = CommunityDraft;
    type Patch = CommunityPatch;

    fn from_draft(id: EntityId, temporal: Bitemporal, draft: CommunityDraft) -> Self {
        Self {
            id,
            temporal,
            project: draft.project,
            key: draft.key,
            name: draft.name,
            summary: draft.summary,
            keywords: draft.keywords,
            member_count: draft.member_count,
            memory_count: draft.memory_count,
            embedding: None,
        }
    }

    super::versioned_accessors!();

    fn apply(&mut self, patch: &CommunityPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(summary) = &patch.summary {
            self.summary = summary.clone();
        }
        if let Some(keywords) = &patch.keywords {
            self.keywords = keywords.clone();
        }
        if let Some(n) = patch.member_count {
            self.member_count = n;
        }
        if let Some(n) = patch.memory_count {
            self.memory_count = n;
        }
        if let Some(embedding) = &patch.embedding {
            self.embedding = Some(embedding.clone());
        }
    }
}

impl VersionedStore<Community> {
    pub async fn find_by_project(&self, project: &str) -> Result<Vec<Community>> {
        let mut found = self.find_active(&[Predicate::eq("project", project)]).await?;
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    /// Ids of the active entities with a `MEMBER_OF` edge into `community`.
    /// A member updated since linking is reported by its active version.
    pub async fn members(&self, community: &EntityId) -> Result<Vec<String>> {
        let entities = self.sibling::<Entity>();
        let pattern = EdgePattern::of_type(MEMBER_OF)
            .from_label(Entity::LABEL)
            .to_label(Community::LABEL)
            .to_id(community.to_string());
        let mut seen = HashMap::new();
        let mut members = Vec::new();
        for edge in self.executor().match_edges(&pattern).await? {
            if let Some(current) = entities.current_id(&edge.from.id, &mut seen).await? {
                members.push(current);
            }
        }
        members.sort();
        members.dedup();
        Ok(members)
    }

    /// Replace every `MEMBER_OF` edge into `from` and `to` with edges from
    /// `members` into `to`. Returns how many links were written.
    pub async fn relink_members(
        &self,
        from: Option<&EntityId>,
        to: &EntityId,
        members: &[String],
    ) -> Result<usize> {
        for target in from.into_iter().chain(std::iter::once(to)) {
            let pattern = EdgePattern::of_type(MEMBER_OF)
                .to_label(Community::LABEL)
                .to_id(target.to_string());
            self.executor().delete_edges(&pattern).await?;
        }

        let linked_at = self.now();
        let mut linked = 0;
        for member in members {
            let edge = EdgeRecord::new(
                MEMBER_OF,
                NodeRef::new(Entity::LABEL, member.as_str()),
                NodeRef::new(Community::LABEL, to.to_string()),
            )
            .with_properties(to_properties(&json!({ "linked_at": linked_at }))?);
            if self.executor().create_edge(edge).await? {
                linked += 1;
            } else {
                log::warn!("Entity {} vanished before linking to community {}", member, to);
            }
        }
        Ok(linked)
    }

    /// Distinct active memories with an `ABOUT` edge to any version of any
    /// of `members`
    pub async fn count_memories(&self, members: &[String]) -> Result<u32> {
        let entities = self.sibling::<Entity>();
        let mut targets = BTreeSet::new();
        for member in members {
            let Ok(id) = member.parse::<EntityId>() else {
                log::debug!("Skipping malformed member id {}", member);
                continue;
            };
            let versions = match entities.history(&id).await {
                Err(MemoryError::NotFound(_)) => continue,
                other => other?,
            };
            targets.extend(versions.into_iter().map(|v| v.id.to_string()));
        }

        let mut linked = BTreeSet::new();
        for target in &targets {
            let pattern = EdgePattern::of_type(ABOUT)
                .from_label(Memory::LABEL)
                .to_label(Entity::LABEL)
                .to_id(target.as_str());
            for edge in self.executor().match_edges(&pattern).await? {
                linked.insert(edge.from.id);
            }
        }

        let memories = self.sibling::<Memory>();
        let mut seen = HashMap::new();
        let mut active = BTreeSet::new();
        for id in &linked {
            if let Some(current) = memories.current_id(id, &mut seen).await? {
                active.insert(current);
            }
        }
        Ok(active.len() as u32)
    }
}
