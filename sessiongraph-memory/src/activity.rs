//! Per-project activity counters
//!
//! Counts writes per project so a scheduler can decide when a community
//! refresh is due. The counter store is injected; [`InMemoryCounterBackend`]
//! keeps counts for the life of the process.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::Result;

/// Keyed counter storage
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Add `by` to `key` and return the new value
    async fn increment(&self, key: &str, by: u64) -> Result<u64>;
    async fn get(&self, key: &str) -> Result<u64>;
    async fn reset(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryCounterBackend {
    counts: DashMap<String, u64>,
}

impl InMemoryCounterBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterBackend for InMemoryCounterBackend {
    async fn increment(&self, key: &str, by: u64) -> Result<u64> {
        let mut entry = self.counts.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(by);
        Ok(*entry)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        Ok(self.counts.get(key).map(|v| *v).unwrap_or(0))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.counts.remove(key);
        Ok(())
    }
}

/// Activity counts per project with a refresh threshold
#[derive(Clone)]
pub struct ActivityTracker {
    backend: Arc<dyn CounterBackend>,
    threshold: u64,
}

impl ActivityTracker {
    pub fn new(backend: Arc<dyn CounterBackend>, threshold: u64) -> Self {
        Self {
            backend,
            threshold: threshold.max(1),
        }
    }

    pub fn in_memory(threshold: u64) -> Self {
        Self::new(Arc::new(InMemoryCounterBackend::new()), threshold)
    }

    fn key(project: &str) -> String {
        format!("activity:{}", project)
    }

    /// Count one event; returns the running total
    pub async fn record(&self, project: &str) -> Result<u64> {
        let count = self.backend.increment(&Self::key(project), 1).await?;
        if count == self.threshold {
            log::info!("Project {} reached {} events; refresh due", project, count);
        }
        Ok(count)
    }

    pub async fn get(&self, project: &str) -> Result<u64> {
        self.backend.get(&Self::key(project)).await
    }

    pub async fn reset(&self, project: &str) -> Result<()> {
        self.backend.reset(&Self::key(project)).await
    }

    /// Whether enough activity has accumulated since the last reset
    pub async fn should_trigger(&self, project: &str) -> Result<bool> {
        Ok(self.get(project).await? >= self.threshold)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}
