//! Error types for sessiongraph-memory

use thiserror::Error;

/// Errors that can occur in the memory graph
#[derive(Debug, Error)]
pub enum MemoryError {
    /// No row with an open window exists for the requested id
    #[error("Not found: {0}")]
    NotFound(String),

    /// The optimistic close matched zero rows; another writer won the race.
    /// Consumed by the retry loop in `VersionedStore::update`.
    #[error("Concurrent modification of {id}")]
    ConcurrentModification { id: String },

    /// Every update attempt lost the optimistic close
    #[error("Update of {id} gave up after {attempts} attempts: {last_error}")]
    ConcurrencyExhausted {
        id: String,
        attempts: u32,
        last_error: String,
    },

    /// A generated artifact failed structural checks
    #[error("Validation error: {0}")]
    Validation(String),

    /// Status change out of a terminal state
    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    /// Backing graph store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error
    #[cfg(feature = "rocksdb")]
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error
    #[cfg(feature = "rocksdb")]
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// UUID parsing error
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for MemoryError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl MemoryError {
    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create a concurrent modification signal
    pub fn concurrent(id: impl Into<String>) -> Self {
        Self::ConcurrentModification { id: id.into() }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the retry loop should try again after this error
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;
