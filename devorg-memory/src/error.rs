//! Errors raised by the memory store, the vector index and the embedder

use thiserror::Error;

/// Result type alias for devorg-memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while storing or recalling memories.
///
/// [`Embedding`](Error::Embedding) and [`VectorDb`](Error::VectorDb) come
/// from the ranking side and let semantic search fall back to a lexical
/// query. The rest come from the structured store or the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// The structured store is missing, closed or poisoned
    #[error("Memory store unavailable: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Metadata or tags that could not be encoded or decoded
    #[error("Malformed memory fields: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Memory data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not embed memory content: {0}")]
    Embedding(String),

    #[error("Vector index error: {0}")]
    VectorDb(String),

    #[error("Invalid memory configuration: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// An entry or filter the store refuses, such as a duplicate id
    #[error("Rejected memory input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    pub fn vector_db(msg: impl Into<String>) -> Self {
        Self::VectorDb(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error means the addressed record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the failure came from the ranking side (embedder or vector
    /// index) rather than the authoritative store
    pub fn is_ranking_failure(&self) -> bool {
        matches!(self, Self::Embedding(_) | Self::VectorDb(_))
    }
}
