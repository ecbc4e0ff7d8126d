//! Memory entries and the query filter used to find them

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Type of memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// A message an agent received or sent
    Conversation,

    /// A processed task and its outcome
    Task,

    /// A fact or piece of knowledge
    Knowledge,

    /// A choice an agent made, with its reasoning
    Decision,

    /// Short-lived working context
    Context,
}

impl MemoryType {
    pub const ALL: [MemoryType; 5] = [
        MemoryType::Conversation,
        MemoryType::Task,
        MemoryType::Knowledge,
        MemoryType::Decision,
        MemoryType::Context,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Conversation => "conversation",
            MemoryType::Task => "task",
            MemoryType::Knowledge => "knowledge",
            MemoryType::Decision => "decision",
            MemoryType::Context => "context",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(MemoryType::Conversation),
            "task" => Ok(MemoryType::Task),
            "knowledge" => Ok(MemoryType::Knowledge),
            "decision" => Ok(MemoryType::Decision),
            "context" => Ok(MemoryType::Context),
            other => Err(Error::invalid_input(format!("Unknown memory type: {}", other))),
        }
    }
}

/// A single persisted memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique memory ID (assigned on store when empty)
    #[serde(default)]
    pub id: String,

    /// Agent that owns this memory
    pub agent_id: String,

    /// Type of memory, drives retention
    pub memory_type: MemoryType,

    /// The memory content
    pub content: String,

    /// Free-form structured metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,

    /// Embedding vector (populated when a vector index is configured)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// When the memory expires. Filled from the retention policy on store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Similarity score, only set on semantic search results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl MemoryEntry {
    /// Create a new memory for an agent
    pub fn new(
        agent_id: impl Into<String>,
        memory_type: MemoryType,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            memory_type,
            content: content.into(),
            metadata: HashMap::new(),
            tags: Vec::new(),
            embedding: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            score: None,
        }
    }

    /// Add tags to the memory
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set one metadata key
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the expiration instead of using the retention policy
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Read a string metadata value
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Filter for listing memories. Results are ordered newest-created first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryQuery {
    pub agent_id: Option<String>,

    pub memory_type: Option<MemoryType>,

    /// Case-insensitive substring of the content
    pub content: Option<String>,

    /// Every listed tag must be present on the entry
    pub tags: Vec<String>,

    /// Inclusive lower bound on `created_at`
    pub start_time: Option<DateTime<Utc>>,

    /// Inclusive upper bound on `created_at`
    pub end_time: Option<DateTime<Utc>>,

    /// Maximum results; 0 uses the configured default
    pub limit: usize,

    pub offset: usize,
}

impl MemoryQuery {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Default::default()
        }
    }

    pub fn of_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    pub fn containing(mut self, text: impl Into<String>) -> Self {
        self.content = Some(text.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}
