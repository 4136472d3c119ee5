//! Named code or domain entities and the relations between them

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::Result;
use crate::graph::{to_properties, EdgePattern, EdgeRecord, NodeRef, Predicate, RELATES_TO};
use crate::id::EntityId;
use crate::temporal::Bitemporal;
use crate::versioned::{VersionedEntity, VersionedStore};

/// A thing sessions talk about: a module, a service, a library, a person
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(flatten)]
    pub temporal: Bitemporal,
    pub project: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct EntityDraft {
    pub project: String,
    pub name: String,
    pub kind: String,
    pub description: String,
}

impl EntityDraft {
    pub fn new(project: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            kind: kind.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
}

impl VersionedEntity for Entity {
    const LABEL: &'static str = "Entity";
    type Draft = EntityDraft;
    type Patch = EntityPatch;

    fn from_draft(id: EntityId, temporal: Bitemporal, draft: EntityDraft) -> Self {
        Self {
            id,
            temporal,
            project: draft.project,
            name: draft.name,
            kind: draft.kind,
            description: draft.description,
        }
    }

    super::versioned_accessors!();

    fn apply(&mut self, patch: &EntityPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(kind) = &patch.kind {
            self.kind = kind.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
    }
}

impl VersionedStore<Entity> {
    pub async fn find_by_project(&self, project: &str) -> Result<Vec<Entity>> {
        self.find_active(&[Predicate::eq("project", project)]).await
    }

    pub async fn find_by_name(&self, project: &str, name: &str) -> Result<Option<Entity>> {
        let mut found = self
            .find_active(&[Predicate::eq("project", project), Predicate::eq("name", name)])
            .await?;
        found.sort_by_key(|e| e.temporal.tt_start);
        Ok(found.pop())
    }

    /// Record a `RELATES_TO` edge between two active entities.
    /// Returns `false` when either endpoint is missing.
    pub async fn relate(&self, from: &EntityId, to: &EntityId, relation: &str) -> Result<bool> {
        if from == to {
            log::debug!("Ignoring self relation on {}", from);
            return Ok(false);
        }
        let edge = EdgeRecord::new(
            RELATES_TO,
            NodeRef::new(Entity::LABEL, from.to_string()),
            NodeRef::new(Entity::LABEL, to.to_string()),
        )
        .with_properties(to_properties(&json!({
            "relation": relation,
            "created_at": self.now(),
        }))?);
        self.executor().create_edge(edge).await
    }

    /// Undirected adjacency over the active entities of `project`, built from
    /// `RELATES_TO` edges. Endpoints written against older versions count for
    /// the active version of their chain. Isolated entities appear with no
    /// neighbours.
    pub async fn snapshot(&self, project: &str) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let active: HashSet<String> = self
            .find_by_project(project)
            .await?
            .into_iter()
            .map(|e| e.id.to_string())
            .collect();

        let mut adjacency: BTreeMap<String, BTreeSet<String>> = active
            .iter()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();

        let mut seen: HashMap<String, Option<String>> = active
            .iter()
            .map(|id| (id.clone(), Some(id.clone())))
            .collect();
        let pattern = EdgePattern::of_type(RELATES_TO)
            .from_label(Entity::LABEL)
            .to_label(Entity::LABEL);
        for edge in self.executor().match_edges(&pattern).await? {
            let Some(a) = self.current_id(&edge.from.id, &mut seen).await? else {
                continue;
            };
            let Some(b) = self.current_id(&edge.to.id, &mut seen).await? else {
                continue;
            };
            if a == b || !active.contains(&a) || !active.contains(&b) {
                continue;
            }
            adjacency.entry(a.clone()).or_default().insert(b.clone());
            adjacency.entry(b).or_default().insert(a);
        }

        log::debug!(
            "Snapshot of {}: {} entities",
            project,
            adjacency.len()
        );
        Ok(adjacency)
    }
}
