//! Embedding functions: text in, fixed-length vector out

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::{EmbeddingBackend, MemoryConfig};
use crate::error::{Error, Result};

/// Maps text to a vector. Implementations must be deterministic for a
/// given text so re-indexing the same content overwrites in place.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimensions
    fn dimensions(&self) -> usize;
}

/// Build the embedder selected by `config`
pub fn embedder_from_config(config: &MemoryConfig) -> Result<Arc<dyn Embedder>> {
    match config.embedding_backend {
        EmbeddingBackend::Hash => Ok(Arc::new(HashEmbedder::new(config.embedding_dimensions))),
        EmbeddingBackend::FastEmbed => Ok(Arc::new(FastEmbedder::new(config.embedding_dimensions)?)),
    }
}

/// Feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed with SHA-256; the digest picks
/// a bucket and a sign. The result is L2-normalised, so texts that share
/// words land close together under cosine similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Local model embedder (all-MiniLM-L6-v2 via fastembed, no API keys)
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    dimensions: usize,
}

impl FastEmbedder {
    /// Load the model. It downloads on first use to ~/.cache/fastembed.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions != 384 {
            return Err(Error::config(format!(
                "all-MiniLM-L6-v2 produces 384-dim vectors but config specifies {}",
                dimensions
            )));
        }

        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(true),
        )
        .map_err(|e| Error::embedding(format!("Failed to load embedding model: {}", e)))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut guard = self.model.lock().await;
        let embeddings = guard
            .embed(vec![text.to_string()], None)
            .map_err(|e| Error::embedding(format!("Embedding failed: {}", e)))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("No embedding returned"))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
