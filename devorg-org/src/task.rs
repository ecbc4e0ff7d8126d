//! Units of work and the responses they produce

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority level for tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

/// Outcome of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Delegated,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Delegated => "delegated",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work travelling down the organization.
///
/// A task is never mutated once handed to an agent; delegation mints a new
/// task that points back at the one it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    #[serde(default = "new_task_id")]
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Working content; replaced with an agent's own analysis on each hop
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub from_agent: String,

    #[serde(default)]
    pub to_agent: String,

    #[serde(default)]
    pub priority: TaskPriority,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Task this one was delegated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn new_task_id() -> String {
    format!("task_{}", Uuid::new_v4())
}

impl Task {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            id: new_task_id(),
            title: title.into(),
            content: description.clone(),
            description,
            from_agent: String::new(),
            to_agent: String::new(),
            priority: TaskPriority::Normal,
            metadata: HashMap::new(),
            parent_task_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn from_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.from_agent = agent_id.into();
        self
    }

    pub fn to_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.to_agent = agent_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mint the task handed from `from` to `to`, leaving `self` untouched
    pub fn delegate(&self, from: &str, to: &str, content: impl Into<String>) -> Task {
        let mut metadata = self.metadata.clone();
        metadata
            .entry("origin_task_id".to_string())
            .or_insert_with(|| serde_json::Value::String(self.id.clone()));

        Task {
            id: new_task_id(),
            title: self.title.clone(),
            description: self.description.clone(),
            content: content.into(),
            from_agent: from.to_string(),
            to_agent: to.to_string(),
            priority: self.priority,
            metadata,
            parent_task_id: Some(self.id.clone()),
            created_at: Utc::now(),
        }
    }
}

/// Result of processing a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,

    pub status: TaskStatus,

    #[serde(default)]
    pub result: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskResponse {
    pub fn completed(task_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            result: result.into(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            result: String::new(),
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
