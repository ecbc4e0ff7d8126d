//! The memory manager: one durable store, one optional vector index

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{MemoryConfig, VectorBackend};
use crate::embedding::{embedder_from_config, Embedder};
use crate::error::{Error, Result};
use crate::memory::{MemoryEntry, MemoryQuery, MemoryType};
use crate::storage::{
    InMemoryVectorIndex, LanceVectorIndex, SqliteStorage, VectorFilter, VectorIndex,
    VectorMetadata,
};

/// Coordinates the SQLite store (source of truth) with the vector index
/// (ranking hint). Vector failures are logged and degrade to lexical
/// search; SQLite failures always propagate.
pub struct MemoryManager {
    config: MemoryConfig,
    store: Option<SqliteStorage>,
    vector: Option<Arc<dyn VectorIndex>>,
    embedder: Arc<dyn Embedder>,
}

impl MemoryManager {
    /// Assemble a manager from already-opened backends
    pub fn new(
        config: MemoryConfig,
        store: Option<SqliteStorage>,
        vector: Option<Arc<dyn VectorIndex>>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            store,
            vector,
            embedder,
        }
    }

    /// Open the backends described by `config`.
    ///
    /// A vector index that fails to open is logged and left out.
    pub async fn open(config: MemoryConfig) -> Result<Self> {
        config.ensure_dirs()?;

        let store = SqliteStorage::open(config.sqlite_path())?;
        let embedder = embedder_from_config(&config)?;

        let vector: Option<Arc<dyn VectorIndex>> = match config.vector_backend {
            VectorBackend::Disabled => None,
            VectorBackend::InMemory => Some(Arc::new(InMemoryVectorIndex::new(
                config.embedding_dimensions,
            ))),
            VectorBackend::LanceDb => {
                match LanceVectorIndex::open(config.vector_db_path(), config.embedding_dimensions)
                    .await
                {
                    Ok(index) => Some(Arc::new(index)),
                    Err(e) => {
                        warn!(error = %e, "Vector index unavailable, using lexical search only");
                        None
                    }
                }
            }
        };

        info!(
            data_dir = %config.data_dir.display(),
            vector_index = vector.is_some(),
            "Memory manager opened"
        );

        Ok(Self::new(config, Some(store), vector, embedder))
    }

    /// Get the configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn has_vector_index(&self) -> bool {
        self.vector.is_some()
    }

    fn store(&self) -> Result<&SqliteStorage> {
        self.store
            .as_ref()
            .ok_or_else(|| Error::storage("no structured store configured"))
    }

    /// Persist a memory.
    ///
    /// Fills in a missing id and expiration, writes the row (fatal on
    /// failure) and indexes the content vector (non-fatal).
    pub async fn store_memory(&self, mut entry: MemoryEntry) -> Result<MemoryEntry> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        if entry.updated_at < entry.created_at {
            entry.updated_at = entry.created_at;
        }
        let expires_at = entry.expires_at.unwrap_or_else(|| {
            self.config
                .retention
                .calculate_expiration(entry.memory_type, entry.created_at)
        });
        if expires_at < entry.created_at {
            return Err(Error::invalid_input(format!(
                "memory {} expires before it was created",
                entry.id
            )));
        }
        entry.expires_at = Some(expires_at);
        entry.score = None;

        let store = self.store()?;

        if entry.embedding.is_none() {
            entry.embedding = self.embed_for_index(&entry.content).await;
        }

        store.insert(&entry)?;
        self.index(&entry, false).await;

        debug!(
            memory_id = %entry.id,
            agent_id = %entry.agent_id,
            memory_type = %entry.memory_type,
            "Stored memory"
        );
        Ok(entry)
    }

    /// Get a memory by ID
    pub fn retrieve_memory(&self, id: &str) -> Result<MemoryEntry> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::not_found(format!("memory {} (no store configured)", id)))?;
        store
            .get(id)?
            .ok_or_else(|| Error::not_found(format!("memory {}", id)))
    }

    /// List memories matching `query`, newest first
    pub fn query_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>> {
        self.store()?.query(query, self.config.default_query_limit)
    }

    /// Replace an existing memory's content, tags and metadata
    pub async fn update_memory(&self, mut entry: MemoryEntry) -> Result<MemoryEntry> {
        let store = self.store()?;
        entry.updated_at = Utc::now();
        if entry.expires_at.is_none() {
            entry.expires_at = Some(
                self.config
                    .retention
                    .calculate_expiration(entry.memory_type, entry.created_at),
            );
        }
        entry.score = None;
        entry.embedding = self.embed_for_index(&entry.content).await;

        store.update(&entry)?;
        self.index(&entry, true).await;
        Ok(entry)
    }

    /// Delete a memory from both backends
    pub async fn delete_memory(&self, id: &str) -> Result<()> {
        self.store()?.delete(id)?;
        if let Some(vector) = &self.vector {
            if let Err(e) = vector.delete(id).await {
                warn!(memory_id = %id, error = %e, "Failed to remove memory vector");
            }
        }
        Ok(())
    }

    /// Memories related to `text`.
    ///
    /// Uses the vector index when present; otherwise (or when it fails)
    /// the same call becomes a lexical [`MemoryQuery`] on the content.
    pub async fn semantic_search(
        &self,
        text: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        self.semantic_search_typed(text, agent_id, None, limit).await
    }

    /// [`semantic_search`](Self::semantic_search) restricted to one memory type
    pub async fn semantic_search_typed(
        &self,
        text: &str,
        agent_id: Option<&str>,
        memory_type: Option<MemoryType>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let limit = if limit == 0 {
            self.config.default_query_limit
        } else {
            limit
        };

        if let Some(vector) = &self.vector {
            match self.vector_search(vector.as_ref(), text, agent_id, memory_type, limit).await {
                Ok(Some(entries)) => return Ok(entries),
                Ok(None) => {}
                Err(e) if e.is_ranking_failure() => {
                    warn!(error = %e, "Vector search failed, falling back to lexical query");
                }
                Err(e) => return Err(e),
            }
        }

        let query = MemoryQuery {
            agent_id: agent_id.map(str::to_string),
            memory_type,
            content: Some(text.to_string()),
            limit,
            ..Default::default()
        };
        self.query_memories(&query)
    }

    async fn vector_search(
        &self,
        vector: &dyn VectorIndex,
        text: &str,
        agent_id: Option<&str>,
        memory_type: Option<MemoryType>,
        limit: usize,
    ) -> Result<Option<Vec<MemoryEntry>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let store = self.store()?;
        let embedding = self.embedder.embed(text).await?;
        let filter = VectorFilter {
            agent_id: agent_id.map(str::to_string),
            memory_type,
        };
        let hits = vector
            .search(&embedding, limit, self.config.min_similarity_score, &filter)
            .await?;

        let mut entries = Vec::with_capacity(hits.len());
        for hit in hits {
            match store.get(&hit.id)? {
                Some(mut entry) => {
                    entry.score = Some(hit.score);
                    entries.push(entry);
                }
                None => debug!(memory_id = %hit.id, "Dropping orphaned vector hit"),
            }
        }
        Ok(Some(entries))
    }

    /// Remove every expired memory. Returns the number of rows deleted.
    pub async fn prune_expired_memories(&self) -> Result<usize> {
        let store = self.store()?;
        let now = Utc::now();

        if let Some(vector) = &self.vector {
            for id in store.expired_ids(now)? {
                if let Err(e) = vector.delete(&id).await {
                    warn!(memory_id = %id, error = %e, "Failed to remove expired memory vector");
                }
            }
        }

        let removed = store.delete_expired(now)?;
        if removed > 0 {
            info!(removed, "Pruned expired memories");
        }
        Ok(removed)
    }

    /// Count stored memories, optionally for one agent
    pub fn count_memories(&self, agent_id: Option<&str>) -> Result<usize> {
        self.store()?.count(agent_id)
    }

    /// Close both backends, attempting each even if the other fails
    pub async fn close(&self) -> Result<()> {
        let mut failures = Vec::new();

        if let Some(vector) = &self.vector {
            if let Err(e) = vector.close().await {
                warn!(error = %e, "Failed to close vector index");
                failures.push(format!("vector index: {}", e));
            }
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.close() {
                warn!(error = %e, "Failed to close memory store");
                failures.push(format!("store: {}", e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::storage(failures.join("; ")))
        }
    }

    /// Run [`prune_expired_memories`](Self::prune_expired_memories) every
    /// `interval` until `cancel` fires.
    pub fn spawn_expiry_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Expiry sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = manager.prune_expired_memories().await {
                            warn!(error = %e, "Expiry sweep failed");
                        }
                    }
                }
            }
        })
    }

    async fn embed_for_index(&self, content: &str) -> Option<Vec<f32>> {
        if self.vector.is_none() || content.trim().is_empty() {
            return None;
        }
        match self.embedder.embed(content).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "Failed to embed memory content");
                None
            }
        }
    }

    /// Write the entry's vector; `replace` routes through [`VectorIndex::update`]
    async fn index(&self, entry: &MemoryEntry, replace: bool) {
        let (Some(vector), Some(embedding)) = (&self.vector, &entry.embedding) else {
            return;
        };
        let metadata = VectorMetadata {
            agent_id: entry.agent_id.clone(),
            memory_type: entry.memory_type,
        };
        let result = if replace {
            vector.update(&entry.id, embedding, &metadata).await
        } else {
            vector.insert(&entry.id, embedding, &metadata).await
        };
        if let Err(e) = result {
            warn!(memory_id = %entry.id, error = %e, "Failed to index memory vector");
        }
    }
}
