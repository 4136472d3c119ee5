//! File changes made by an agent

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::Predicate;
use crate::id::EntityId;
use crate::temporal::Bitemporal;
use crate::versioned::{VersionedEntity, VersionedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEdit {
    pub id: EntityId,
    #[serde(flatten)]
    pub temporal: Bitemporal,
    pub session_id: String,
    pub project: String,
    pub path: String,
    pub change: ChangeKind,
    #[serde(default)]
    pub lines_added: u32,
    #[serde(default)]
    pub lines_removed: u32,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct FileEditDraft {
    pub session_id: String,
    pub project: String,
    pub path: String,
    pub change: ChangeKind,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub summary: String,
}

impl FileEditDraft {
    pub fn new(
        session_id: impl Into<String>,
        project: impl Into<String>,
        path: impl Into<String>,
        change: ChangeKind,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project: project.into(),
            path: path.into(),
            change,
            lines_added: 0,
            lines_removed: 0,
            summary: String::new(),
        }
    }

    pub fn with_lines(mut self, added: u32, removed: u32) -> Self {
        self.lines_added = added;
        self.lines_removed = removed;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileEditPatch {
    pub summary: Option<String>,
    pub lines_added: Option<u32>,
    pub lines_removed: Option<u32>,
}

impl VersionedEntity for FileEdit {
    const LABEL: &'static str = "FileEdit";
    type Draft = FileEditDraft;
    type Patch = FileEditPatch;

    fn from_draft(id: EntityId, temporal: Bitemporal, draft: FileEditDraft) -> Self {
        Self {
            id,
            temporal,
            session_id: draft.session_id,
            project: draft.project,
            path: draft.path,
            change: draft.change,
            lines_added: draft.lines_added,
            lines_removed: draft.lines_removed,
            summary: draft.summary,
        }
    }

    super::versioned_accessors!();

    fn apply(&mut self, patch: &FileEditPatch) {
        if let Some(summary) = &patch.summary {
            self.summary = summary.clone();
        }
        if let Some(n) = patch.lines_added {
            self.lines_added = n;
        }
        if let Some(n) = patch.lines_removed {
            self.lines_removed = n;
        }
    }
}

impl VersionedStore<FileEdit> {
    /// Edits to one path, oldest first
    pub async fn find_by_path(&self, project: &str, path: &str) -> Result<Vec<FileEdit>> {
        let mut edits = self
            .find_active(&[Predicate::eq("project", project), Predicate::eq("path", path)])
            .await?;
        edits.sort_by_key(|e| e.temporal.vt_start);
        Ok(edits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::graph::InMemoryGraph;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_find_by_path() {
        let store: VersionedStore<FileEdit> =
            VersionedStore::new(Arc::new(InMemoryGraph::new()), Arc::new(SystemClock::new()));

        store
            .create(
                FileEditDraft::new("s1", "p", "src/main.rs", ChangeKind::Created).with_lines(40, 0),
                None,
            )
            .await
            .unwrap();
        store
            .create(
                FileEditDraft::new("s2", "p", "src/main.rs", ChangeKind::Modified)
                    .with_lines(3, 1)
                    .with_summary("add --verbose"),
                None,
            )
            .await
            .unwrap();
        store
            .create(FileEditDraft::new("s2", "p", "README.md", ChangeKind::Modified), None)
            .await
            .unwrap();

        let edits = store.find_by_path("p", "src/main.rs").await.unwrap();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].change, ChangeKind::Created);
        assert_eq!(edits[1].summary, "add --verbose");
    }
}
