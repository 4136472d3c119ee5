//! SessionGraph Memory Layer
//!
//! Temporal knowledge-graph memory for AI coding-agent sessions: turns, tool
//! calls, file edits, entities, memories and communities stored as
//! bitemporal, versioned graph nodes.
//!
//! ## Features
//!
//! - **Bi-temporal versioning** - Every change closes the current version and links a new one with a `REPLACES` edge
//! - **Optimistic concurrency** - Conflicting updates are retried against the new head with backoff
//! - **Community detection** - Seeded label propagation, merged into stored communities by overlap
//! - **Decay scoring** - Type-weighted exponential decay with access boosts
//! - **RocksDB persistence** - MessagePack rows with in-place schema migration
//!
//! ## Example
//!
//! ```ignore
//! use sessiongraph_memory::{MemoryConfig, MemoryDraft, MemoryType, SessionGraph};
//!
//! let graph = SessionGraph::open(&db_path, MemoryConfig::default())?;
//!
//! let memory = graph
//!     .memories
//!     .create(MemoryDraft::new("api", "Uploads over 10MB return 413", MemoryType::Fact), None)
//!     .await?;
//!
//! let report = graph.community_service().refresh("api", "manual").await?;
//! ```

pub mod activity;
pub mod clock;
pub mod community;
pub mod config;
pub mod decay;
pub mod entities;
pub mod error;
pub mod graph;
pub mod id;
#[cfg(feature = "rocksdb")]
pub mod migration;
pub mod search;
pub mod storage;
pub mod temporal;
pub mod versioned;

// Re-exports for convenience
pub use activity::{ActivityTracker, CounterBackend, InMemoryCounterBackend};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp, MAX_DATE};
pub use community::{
    detect_communities, merge_communities, CommunityService, CommunitySummarizer,
    DetectOptions, KeywordSummarizer, RefreshReport,
};
pub use config::{MemoryConfig, RetryPolicy};
pub use decay::{decay_score, filter_by_decay_threshold, DecayInput, DecayScored, Decayable};
pub use entities::{
    Community, ConflictReport, ConflictStatus, ConflictStore, Entity, EntityDraft, FileEdit,
    Memory, MemoryDraft, MemoryPatch, MemoryType, ReasoningTrace, Role, ToolCall, ToolStatus,
    Turn, TurnDraft,
};
pub use error::{MemoryError, Result};
pub use graph::{GraphExecutor, InMemoryGraph};
#[cfg(feature = "rocksdb")]
pub use graph::RocksGraph;
pub use id::EntityId;
pub use search::{MemorySearch, SearchConfig, SearchResult};
pub use storage::{GraphStats, SessionGraph};
pub use temporal::{AsOf, Bitemporal};
pub use versioned::{VersionedEntity, VersionedStore};
