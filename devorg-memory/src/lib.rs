//! # devorg memory
//!
//! Durable, searchable memory shared by every agent in the organization.
//!
//! ## Architecture
//!
//! - **SQLite** holds every memory and is the only source of truth
//!   (indexed on agent, type, creation and expiry time).
//! - **Vector index** (LanceDB or in-process) ranks memories by embedding
//!   similarity. It is optional; without it, or when it fails, semantic
//!   search degrades to a lexical content query.
//! - **Retention policy** gives each memory type its own lifetime; an
//!   expiry sweep removes what has lapsed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use devorg_memory::{MemoryConfig, MemoryEntry, MemoryManager, MemoryType};
//!
//! let manager = MemoryManager::open(MemoryConfig::default()).await?;
//!
//! let entry = MemoryEntry::new("eng-1", MemoryType::Knowledge, "Use sqlx for Postgres");
//! let stored = manager.store_memory(entry).await?;
//!
//! let related = manager.semantic_search("postgres driver", Some("eng-1"), 5).await?;
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod manager;
pub mod memory;
pub mod retention;
pub mod storage;

pub use config::{EmbeddingBackend, MemoryConfig, VectorBackend};
pub use embedding::{Embedder, FastEmbedder, HashEmbedder};
pub use error::{Error, Result};
pub use manager::MemoryManager;
pub use memory::{MemoryEntry, MemoryQuery, MemoryType};
pub use retention::RetentionPolicy;
pub use storage::{InMemoryVectorIndex, LanceVectorIndex, SqliteStorage, VectorIndex};
