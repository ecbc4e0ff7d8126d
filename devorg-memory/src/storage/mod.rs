//! Storage backends for devorg-memory

mod lance;
mod sqlite;
pub mod vector;

pub use lance::LanceVectorIndex;
pub use sqlite::SqliteStorage;
pub use vector::{InMemoryVectorIndex, SearchHit, VectorFilter, VectorIndex, VectorMetadata};
