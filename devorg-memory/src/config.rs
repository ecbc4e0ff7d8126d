//! Configuration for devorg-memory

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::retention::RetentionPolicy;

/// Which embedding function turns memory content into vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Deterministic feature hashing, no model download
    Hash,
    /// Local all-MiniLM-L6-v2 via fastembed
    FastEmbed,
}

/// Which similarity-search service backs semantic retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    /// No vector index; semantic search falls back to lexical queries
    Disabled,
    /// Brute-force cosine search held in process memory
    InMemory,
    /// LanceDB table under `data_dir/vectors`
    LanceDb,
}

/// Configuration for the memory system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// Embedding function used for vector search
    pub embedding_backend: EmbeddingBackend,

    /// Embedding dimensions (384 for all-MiniLM-L6-v2)
    pub embedding_dimensions: usize,

    /// Vector index backend
    pub vector_backend: VectorBackend,

    /// Minimum similarity score for semantic hits (0.0 - 1.0)
    pub min_similarity_score: f32,

    /// Limit applied to queries that do not set one
    pub default_query_limit: usize,

    /// Per-type retention in days
    pub retention: RetentionPolicy,

    /// Interval between background expiry sweeps
    pub sweep_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("devorg");

        Self {
            data_dir,
            embedding_backend: EmbeddingBackend::Hash,
            embedding_dimensions: 384,
            vector_backend: VectorBackend::LanceDb,
            min_similarity_score: 0.1,
            default_query_limit: 50,
            retention: RetentionPolicy::default(),
            sweep_interval_secs: 3600,
        }
    }
}

impl MemoryConfig {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("memories.db")
    }

    /// Get the path to the vector database
    pub fn vector_db_path(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        if self.vector_backend == VectorBackend::LanceDb {
            std::fs::create_dir_all(self.vector_db_path())?;
        }
        Ok(())
    }
}
