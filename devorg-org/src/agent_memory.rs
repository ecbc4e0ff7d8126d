//! Per-agent view of the shared memory manager

use std::sync::Arc;

use devorg_memory::{MemoryEntry, MemoryManager, MemoryQuery, MemoryType};
use tracing::debug;

use crate::error::Result;
use crate::task::{Task, TaskResponse};

/// Binds one agent id to the shared [`MemoryManager`].
///
/// Without a manager every store is a successful no-op and every lookup
/// returns nothing, so agents never branch on whether memory is enabled.
#[derive(Clone)]
pub struct AgentMemory {
    agent_id: String,
    manager: Option<Arc<MemoryManager>>,
}

impl AgentMemory {
    pub fn new(agent_id: impl Into<String>, manager: Option<Arc<MemoryManager>>) -> Self {
        Self {
            agent_id: agent_id.into(),
            manager,
        }
    }

    pub fn disabled(agent_id: impl Into<String>) -> Self {
        Self::new(agent_id, None)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_enabled(&self) -> bool {
        self.manager.is_some()
    }

    async fn store(&self, entry: MemoryEntry) -> Result<Option<MemoryEntry>> {
        let Some(manager) = &self.manager else {
            return Ok(None);
        };
        let stored = manager.store_memory(entry).await?;
        debug!(
            agent_id = %self.agent_id,
            memory_id = %stored.id,
            memory_type = %stored.memory_type,
            "Agent memory stored"
        );
        Ok(Some(stored))
    }

    pub async fn store_conversation(
        &self,
        message: &str,
        tags: Vec<String>,
    ) -> Result<Option<MemoryEntry>> {
        let entry = MemoryEntry::new(&self.agent_id, MemoryType::Conversation, message).with_tags(tags);
        self.store(entry).await
    }

    /// Record a processed task and its outcome
    pub async fn store_task(
        &self,
        task: &Task,
        response: &TaskResponse,
        tags: Vec<String>,
    ) -> Result<Option<MemoryEntry>> {
        let mut content = format!("Task: {}\n{}", task.title, task.description);
        if !response.result.is_empty() {
            content.push_str("\nResult: ");
            content.push_str(&response.result);
        }
        if let Some(error) = &response.error {
            content.push_str("\nError: ");
            content.push_str(error);
        }

        let entry = MemoryEntry::new(&self.agent_id, MemoryType::Task, content)
            .with_tags(tags)
            .with_metadata("task_id", task.id.as_str())
            .with_metadata(
                "parent_task_id",
                task.parent_task_id
                    .as_deref()
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null),
            )
            .with_metadata("title", task.title.as_str())
            .with_metadata("from_agent", task.from_agent.as_str())
            .with_metadata("to_agent", task.to_agent.as_str())
            .with_metadata("status", response.status.as_str())
            .with_metadata("priority", task.priority.to_string());
        self.store(entry).await
    }

    pub async fn store_knowledge(
        &self,
        knowledge: &str,
        tags: Vec<String>,
    ) -> Result<Option<MemoryEntry>> {
        let entry = MemoryEntry::new(&self.agent_id, MemoryType::Knowledge, knowledge).with_tags(tags);
        self.store(entry).await
    }

    pub async fn store_decision(
        &self,
        decision: &str,
        reasoning: &str,
        tags: Vec<String>,
    ) -> Result<Option<MemoryEntry>> {
        let content = format!("Decision: {}\nReasoning: {}", decision, reasoning);
        let entry = MemoryEntry::new(&self.agent_id, MemoryType::Decision, content)
            .with_tags(tags)
            .with_metadata("decision", decision)
            .with_metadata("reasoning", reasoning);
        self.store(entry).await
    }

    fn recent(&self, memory_type: MemoryType, limit: usize) -> Result<Vec<MemoryEntry>> {
        let Some(manager) = &self.manager else {
            return Ok(Vec::new());
        };
        let query = MemoryQuery::for_agent(&self.agent_id)
            .of_type(memory_type)
            .limit(limit);
        Ok(manager.query_memories(&query)?)
    }

    async fn related(&self, text: &str, memory_type: MemoryType, limit: usize) -> Result<Vec<MemoryEntry>> {
        let Some(manager) = &self.manager else {
            return Ok(Vec::new());
        };
        Ok(manager
            .semantic_search_typed(text, Some(&self.agent_id), Some(memory_type), limit)
            .await?)
    }

    /// Most recent conversation entries, newest first
    pub fn get_conversation_history(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        self.recent(MemoryType::Conversation, limit)
    }

    /// Past tasks related to `query`
    pub async fn get_related_tasks(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        self.related(query, MemoryType::Task, limit).await
    }

    pub async fn get_knowledge(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        self.related(query, MemoryType::Knowledge, limit).await
    }

    pub fn get_decision_history(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        self.recent(MemoryType::Decision, limit)
    }
}

impl std::fmt::Debug for AgentMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentMemory")
            .field("agent_id", &self.agent_id)
            .field("enabled", &self.manager.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devorg_memory::{HashEmbedder, MemoryConfig, SqliteStorage, VectorBackend};

    use crate::task::TaskStatus;

    fn manager() -> Arc<MemoryManager> {
        let config = MemoryConfig {
            vector_backend: VectorBackend::Disabled,
            ..MemoryConfig::default()
        };
        Arc::new(MemoryManager::new(
            config,
            Some(SqliteStorage::open_in_memory().unwrap()),
            None,
            Arc::new(HashEmbedder::new(64)),
        ))
    }

    #[tokio::test]
    async fn test_disabled_memory_is_noop() {
        let memory = AgentMemory::disabled("eng-1");
        let task = Task::new("Fix login", "Session cookie is dropped");

        assert!(memory.store_conversation("hello", vec![]).await.unwrap().is_none());
        assert!(memory
            .store_task(&task, &TaskResponse::completed(&task.id, "ok"), vec![])
            .await
            .unwrap()
            .is_none());
        assert!(memory.get_conversation_history(10).unwrap().is_empty());
        assert!(memory.get_related_tasks("login", 5).await.unwrap().is_empty());
        assert!(memory.get_knowledge("login", 5).await.unwrap().is_empty());
        assert!(memory.get_decision_history(5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_task_metadata() {
        let memory = AgentMemory::new("mgr-1", Some(manager()));
        let parent = Task::new("Fix login", "Session cookie is dropped");
        let task = parent.delegate("mgr-1", "eng-2", "Patch the cookie path");
        let response = TaskResponse::completed(&task.id, "Patched");

        let stored = memory
            .store_task(&task, &response, vec!["auth".into()])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stored.memory_type, MemoryType::Task);
        assert!(stored.content.starts_with("Task: Fix login"));
        assert_eq!(stored.metadata_str("task_id"), Some(task.id.as_str()));
        assert_eq!(stored.metadata_str("parent_task_id"), Some(parent.id.as_str()));
        assert_eq!(stored.metadata_str("from_agent"), Some("mgr-1"));
        assert_eq!(stored.metadata_str("to_agent"), Some("eng-2"));
        assert_eq!(stored.metadata_str("status"), Some(TaskStatus::Completed.as_str()));
        assert_eq!(stored.metadata_str("priority"), Some("normal"));

        let related = memory.get_related_tasks("Fix login", 5).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, stored.id);
    }

    #[tokio::test]
    async fn test_histories_are_scoped_to_agent() {
        let shared = manager();
        let mine = AgentMemory::new("dir-1", Some(Arc::clone(&shared)));
        let theirs = AgentMemory::new("dir-2", Some(shared));

        mine.store_conversation("kickoff", vec![]).await.unwrap();
        mine.store_decision("Fan out to managers", "three workstreams", vec![])
            .await
            .unwrap();
        theirs.store_conversation("unrelated", vec![]).await.unwrap();

        let history = mine.get_conversation_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "kickoff");

        let decisions = mine.get_decision_history(10).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].metadata_str("reasoning"), Some("three workstreams"));
        assert!(theirs.get_decision_history(10).unwrap().is_empty());
    }
}
