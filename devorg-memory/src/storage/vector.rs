//! Vector index contract and an in-process implementation

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::memory::MemoryType;

/// Attributes stored beside each vector so searches can be filtered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorMetadata {
    pub agent_id: String,
    pub memory_type: MemoryType,
}

/// Restricts a search to one agent and/or one memory type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorFilter {
    pub agent_id: Option<String>,
    pub memory_type: Option<MemoryType>,
}

impl VectorFilter {
    fn matches(&self, metadata: &VectorMetadata) -> bool {
        self.agent_id.as_deref().map_or(true, |a| a == metadata.agent_id)
            && self.memory_type.map_or(true, |t| t == metadata.memory_type)
    }
}

/// Result from a vector similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

/// Similarity-search service keyed by memory id.
///
/// Scores rank results and are never treated as exact matches. Writing an
/// existing id overwrites it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite the vector for `id`
    async fn insert(&self, id: &str, vector: &[f32], metadata: &VectorMetadata) -> Result<()>;

    /// Up to `limit` hits with `score >= min_score`, best first
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        min_score: f32,
        filter: &VectorFilter,
    ) -> Result<Vec<SearchHit>>;

    /// Replace the vector for `id`
    async fn update(&self, id: &str, vector: &[f32], metadata: &VectorMetadata) -> Result<()> {
        self.insert(id, vector, metadata).await
    }

    /// Remove `id`; removing an unknown id is not an error
    async fn delete(&self, id: &str) -> Result<()>;

    /// Release resources held by the index
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Brute-force cosine index held in process memory
pub struct InMemoryVectorIndex {
    dimensions: usize,
    entries: RwLock<HashMap<String, (Vec<f32>, VectorMetadata)>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::vector_db(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, id: &str, vector: &[f32], metadata: &VectorMetadata) -> Result<()> {
        self.check_dimensions(vector)?;
        self.entries
            .write()
            .await
            .insert(id.to_string(), (vector.to_vec(), metadata.clone()));
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        min_score: f32,
        filter: &VectorFilter,
    ) -> Result<Vec<SearchHit>> {
        self.check_dimensions(vector)?;
        let entries = self.entries.read().await;

        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter(|(_, (_, metadata))| filter.matches(metadata))
            .map(|(id, (stored, _))| SearchHit {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
            })
            .filter(|hit| hit.score >= min_score)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// Cosine similarity; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
