//! Runtime configuration
//!
//! Every field has a default so a partial JSON file is enough.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::community::DetectOptions;
use crate::error::{MemoryError, Result};
use crate::search::SearchConfig;

/// Retry schedule for the optimistic close in `update`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 10,
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt `attempt` (1-based): 10ms, 20ms, 40ms, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exp))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub retry: RetryPolicy,
    pub detection: DetectOptions,
    /// Minimum member overlap for a detected community to merge into an
    /// existing one
    pub merge_threshold: f64,
    pub search: SearchConfig,
    /// Activity events per project before a community refresh is due
    pub activity_trigger_threshold: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            detection: DetectOptions::default(),
            merge_threshold: 0.5,
            search: SearchConfig::default(),
            activity_trigger_threshold: 50,
        }
    }
}

impl MemoryConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| MemoryError::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(MemoryError::config("retry.max_attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            return Err(MemoryError::config("merge_threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.search.min_decay_score) {
            return Err(MemoryError::config("search.min_decay_score must be within [0, 1]"));
        }
        Ok(())
    }
}
