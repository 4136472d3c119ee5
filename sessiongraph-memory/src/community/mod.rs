//! Community detection over the entity graph
//!
//! - [`detect`]: seeded label propagation over an undirected snapshot
//! - [`merge`]: reconciles detection output with stored communities
//! - [`summary`]: naming and validation of community summaries
//! - [`service`]: the end-to-end refresh against the graph store

pub mod detect;
pub mod merge;
pub mod service;
pub mod summary;

pub use detect::{community_key, detect_communities, Adjacency, Communities, DetectOptions};
pub use merge::{merge_communities, overlap_ratio, DEFAULT_MERGE_THRESHOLD};
pub use service::{CommunityService, RefreshReport};
pub use summary::{CommunitySummarizer, CommunitySummary, KeywordSummarizer};
