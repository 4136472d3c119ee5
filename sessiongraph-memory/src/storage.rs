//! All repositories over one graph
//!
//! [`SessionGraph`] wires every store, the community service and the activity
//! tracker to a single executor and clock, configured from [`MemoryConfig`].

use serde::Serialize;
use std::sync::Arc;

use crate::activity::ActivityTracker;
use crate::clock::{Clock, SystemClock};
use crate::community::{CommunityService, KeywordSummarizer};
use crate::config::MemoryConfig;
use crate::entities::{
    Community, ConflictStore, Entity, FileEdit, Memory, ReasoningTrace, ToolCall, Turn,
};
use crate::error::Result;
use crate::graph::{GraphExecutor, InMemoryGraph};
use crate::search::MemorySearch;
use crate::versioned::VersionedStore;

/// Active row counts per project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub project: String,
    pub memories: usize,
    pub entities: usize,
    pub communities: usize,
    pub turns: usize,
    pub pending_conflicts: usize,
}

/// Typed stores sharing one graph executor
#[derive(Clone)]
pub struct SessionGraph {
    pub memories: VersionedStore<Memory>,
    pub entities: VersionedStore<Entity>,
    pub communities: VersionedStore<Community>,
    pub turns: VersionedStore<Turn>,
    pub reasoning: VersionedStore<ReasoningTrace>,
    pub tool_calls: VersionedStore<ToolCall>,
    pub file_edits: VersionedStore<FileEdit>,
    pub conflicts: ConflictStore,
    pub activity: ActivityTracker,
    config: MemoryConfig,
}

impl SessionGraph {
    pub fn new(executor: Arc<dyn GraphExecutor>, clock: Arc<dyn Clock>, config: MemoryConfig) -> Self {
        let retry = config.retry;
        Self {
            memories: VersionedStore::new(executor.clone(), clock.clone()).with_retry(retry),
            entities: VersionedStore::new(executor.clone(), clock.clone()).with_retry(retry),
            communities: VersionedStore::new(executor.clone(), clock.clone()).with_retry(retry),
            turns: VersionedStore::new(executor.clone(), clock.clone()).with_retry(retry),
            reasoning: VersionedStore::new(executor.clone(), clock.clone()).with_retry(retry),
            tool_calls: VersionedStore::new(executor.clone(), clock.clone()).with_retry(retry),
            file_edits: VersionedStore::new(executor.clone(), clock.clone()).with_retry(retry),
            conflicts: ConflictStore::new(executor, clock),
            activity: ActivityTracker::in_memory(config.activity_trigger_threshold),
            config,
        }
    }

    /// Non-persistent graph on the system clock
    pub fn in_memory(config: MemoryConfig) -> Self {
        Self::new(Arc::new(InMemoryGraph::new()), Arc::new(SystemClock::new()), config)
    }

    /// RocksDB-backed graph at `path`, created if missing
    #[cfg(feature = "rocksdb")]
    pub fn open(path: impl AsRef<std::path::Path>, config: MemoryConfig) -> Result<Self> {
        let graph = crate::graph::RocksGraph::open(path)?;
        Ok(Self::new(Arc::new(graph), Arc::new(SystemClock::new()), config))
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Community service using the configured detection options and the
    /// keyword summarizer
    pub fn community_service(&self) -> CommunityService {
        CommunityService::new(
            self.entities.clone(),
            self.communities.clone(),
            Arc::new(KeywordSummarizer::new()),
        )
        .with_detection(self.config.detection.clone())
        .with_merge_threshold(self.config.merge_threshold)
    }

    pub fn search(&self) -> MemorySearch {
        MemorySearch::new(self.memories.clone())
    }

    pub async fn stats(&self, project: &str) -> Result<GraphStats> {
        Ok(GraphStats {
            project: project.to_string(),
            memories: self.memories.find_by_project(project).await?.len(),
            entities: self.entities.find_by_project(project).await?.len(),
            communities: self.communities.find_by_project(project).await?.len(),
            turns: self
                .turns
                .find_active(&[crate::graph::Predicate::eq("project", project)])
                .await?
                .len(),
            pending_conflicts: self.conflicts.find_pending().await?.len(),
        })
    }
}
