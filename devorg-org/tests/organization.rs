//! Integration tests for building organizations and routing tasks through
//! them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devorg_memory::{
    HashEmbedder, MemoryConfig, MemoryEntry, MemoryManager, MemoryQuery, MemoryType,
    SqliteStorage, VectorBackend,
};
use devorg_org::{
    AgentStatus, DelegationPolicy, Error, GenerationOptions, Generator, HierarchyConfig,
    LayerConfig, Notification, Notifier, OrgDeps, Organization, Role, Task, TaskContext,
    TaskStatus,
};
use proptest::prelude::*;

const FAIL_PROMPT: &str = "FAIL";

/// Echoes the first prompt line; fails for agents whose system prompt is
/// [`FAIL_PROMPT`].
#[derive(Default)]
struct ScriptedGenerator {
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> devorg_org::Result<String> {
        self.calls.lock().unwrap().push(prompt.to_string());
        if options.system_prompt == FAIL_PROMPT {
            return Err(Error::generation("provider returned 503"));
        }
        Ok(format!("analysis of {}", prompt.lines().next().unwrap_or_default()))
    }
}

/// Never answers within a test's lifetime
struct StalledGenerator;

#[async_trait]
impl Generator for StalledGenerator {
    async fn generate(&self, _: &str, _: &GenerationOptions) -> devorg_org::Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(String::new())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn of_type(&self, event_type: &str) -> Vec<Notification> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.event_type == event_type)
            .cloned()
            .collect()
    }

    async fn wait_for(&self, event_type: &str, count: usize) -> Vec<Notification> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let events = self.of_type(event_type);
                if events.len() >= count {
                    return events;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for notifications")
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> devorg_org::Result<()> {
        self.events.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

fn memory() -> Arc<MemoryManager> {
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

fn hierarchy(layers: &[(Role, usize)]) -> HierarchyConfig {
    HierarchyConfig::new(
        layers
            .iter()
            .map(|(role, count)| LayerConfig::new(*role, *count))
            .collect(),
    )
}

fn delegated_to(response: &devorg_org::TaskResponse) -> String {
    response.metadata["delegated_to"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_manager_without_engineers_completes_locally() {
    let memory = memory();
    let org = Organization::build(
        &hierarchy(&[(Role::President, 1), (Role::Manager, 1), (Role::Engineer, 0)]),
        OrgDeps::default().with_memory(Arc::clone(&memory)),
    )
    .unwrap();

    let response = org
        .process_task_on(&TaskContext::new(), "mgr-1", Task::new("Fix login", "Cookie dropped"))
        .await
        .unwrap();

    assert_eq!(response.status, TaskStatus::Completed);
    assert!(response.result.contains("No engineers available"));
    assert!(response.result.contains("'Fix login'"));
    assert_eq!(response.metadata["delegated"], false);

    let decisions = memory
        .query_memories(&MemoryQuery::for_agent("mgr-1").of_type(MemoryType::Decision))
        .unwrap();
    assert!(decisions.is_empty());
}

#[tokio::test]
async fn test_secretary_rotates_through_directors() {
    let org = Organization::build(
        &hierarchy(&[(Role::President, 1), (Role::Secretary, 1), (Role::Director, 3)]),
        OrgDeps::default(),
    )
    .unwrap();
    let ctx = TaskContext::new();

    let mut targets = Vec::new();
    for title in ["Billing export", "Audit log", "SSO rollout"] {
        let response = org
            .process_task_on(&ctx, "sec-1", Task::new(title, "new initiative"))
            .await
            .unwrap();
        assert_eq!(response.status, TaskStatus::Completed);
        targets.push(delegated_to(&response));
    }

    assert_eq!(targets, ["dir-1", "dir-2", "dir-3"]);
}

#[tokio::test]
async fn test_synchronous_chain_returns_leaf_result() {
    let generator = Arc::new(ScriptedGenerator::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let org = Organization::build(
        &hierarchy(&[(Role::President, 1), (Role::Manager, 1), (Role::Engineer, 2)]),
        OrgDeps::default()
            .with_generator(generator.clone())
            .with_notifier(notifier.clone()),
    )
    .unwrap();

    let response = org
        .process_task(&TaskContext::new(), Task::new("Fix login", "Cookie dropped"))
        .await
        .unwrap();

    assert_eq!(response.status, TaskStatus::Completed);
    assert_eq!(response.result, "analysis of Task: Fix login");
    assert_eq!(delegated_to(&response), "mgr-1");
    assert_eq!(generator.calls().len(), 3);
    assert_eq!(notifier.of_type(Notification::TASK_COMPLETED).len(), 1);

    let root = org.status_of("pres-1").unwrap();
    assert_eq!(root.active_tasks, 0);
    assert_eq!(root.completed_tasks, 1);
    assert_eq!(org.status_of("eng-1").unwrap().completed_tasks, 1);
    assert_eq!(org.status_of("eng-2").unwrap().completed_tasks, 0);
}

#[tokio::test]
async fn test_memory_record_overrides_rotation() {
    let memory = memory();
    let org = Organization::build(
        &hierarchy(&[(Role::President, 1), (Role::Manager, 1), (Role::Engineer, 3)]),
        OrgDeps::default().with_memory(Arc::clone(&memory)),
    )
    .unwrap();

    let prior = MemoryEntry::new("mgr-1", MemoryType::Task, "Task: Fix login\nPatched the cookie path")
        .with_metadata("to_agent", "eng-2")
        .with_metadata("status", "completed");
    memory.store_memory(prior).await.unwrap();

    let response = org
        .process_task_on(&TaskContext::new(), "mgr-1", Task::new("Fix login", "Cookie dropped again"))
        .await
        .unwrap();
    assert_eq!(delegated_to(&response), "eng-2");

    let decisions = memory
        .query_memories(&MemoryQuery::for_agent("mgr-1").of_type(MemoryType::Decision))
        .unwrap();
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0]
        .metadata_str("reasoning")
        .unwrap()
        .contains("prior successful"));

    // Unrelated work still rotates; the cursor advanced past slot 0.
    let unrelated = org
        .process_task_on(&TaskContext::new(), "mgr-1", Task::new("Upgrade tokio", "bump"))
        .await
        .unwrap();
    assert_eq!(delegated_to(&unrelated), "eng-2");
    let next = org
        .process_task_on(&TaskContext::new(), "mgr-1", Task::new("Rotate keys", "quarterly"))
        .await
        .unwrap();
    assert_eq!(delegated_to(&next), "eng-3");
}

#[tokio::test]
async fn test_successful_delegate_is_chosen_again() {
    let memory = memory();
    let org = Organization::build(
        &hierarchy(&[(Role::President, 1), (Role::Manager, 1), (Role::Engineer, 3)]),
        OrgDeps::default().with_memory(memory),
    )
    .unwrap();
    let ctx = TaskContext::new();

    let first = org
        .process_task_on(&ctx, "mgr-1", Task::new("Fix login", "Cookie dropped"))
        .await
        .unwrap();
    assert_eq!(delegated_to(&first), "eng-1");

    let second = org
        .process_task_on(&ctx, "mgr-1", Task::new("Fix login", "Cookie dropped on Safari"))
        .await
        .unwrap();
    assert_eq!(delegated_to(&second), "eng-1");
}

#[tokio::test]
async fn test_delegation_leaves_audit_trail() {
    let memory = memory();
    let org = Organization::build(
        &hierarchy(&[(Role::President, 1), (Role::Manager, 1), (Role::Engineer, 1)]),
        OrgDeps::default().with_memory(Arc::clone(&memory)),
    )
    .unwrap();

    let task = Task::new("Fix login", "Cookie dropped");
    let task_id = task.id.clone();
    org.process_task_on(&TaskContext::new(), "mgr-1", task)
        .await
        .unwrap();

    let engineer_tasks = memory
        .query_memories(&MemoryQuery::for_agent("eng-1").of_type(MemoryType::Task))
        .unwrap();
    assert_eq!(engineer_tasks.len(), 1);
    let record = &engineer_tasks[0];
    assert_eq!(record.metadata_str("parent_task_id"), Some(task_id.as_str()));
    assert_eq!(record.metadata_str("from_agent"), Some("mgr-1"));
    assert_eq!(record.metadata_str("to_agent"), Some("eng-1"));
    assert_eq!(record.metadata_str("status"), Some("completed"));
    assert_ne!(record.metadata_str("task_id"), Some(task_id.as_str()));

    let conversations = memory
        .query_memories(&MemoryQuery::for_agent("eng-1").of_type(MemoryType::Conversation))
        .unwrap();
    assert_eq!(conversations.len(), 1);
    assert!(conversations[0].content.contains("from mgr-1"));

    let manager_tasks = memory
        .query_memories(&MemoryQuery::for_agent("mgr-1").of_type(MemoryType::Task))
        .unwrap();
    let ids: HashSet<_> = manager_tasks
        .iter()
        .filter_map(|m| m.metadata_str("task_id"))
        .collect();
    assert!(ids.contains(task_id.as_str()));
    assert_eq!(manager_tasks.len(), 2);
}

#[tokio::test]
async fn test_failure_propagates_with_context_per_hop() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut config = hierarchy(&[(Role::President, 1), (Role::Manager, 1), (Role::Engineer, 1)]);
    config.layers[2].system_prompt = Some(FAIL_PROMPT.to_string());

    let org = Organization::build(
        &config,
        OrgDeps::default()
            .with_generator(Arc::new(ScriptedGenerator::default()))
            .with_notifier(notifier.clone()),
    )
    .unwrap();

    let err = org
        .process_task(&TaskContext::new(), Task::new("Fix login", "Cookie dropped"))
        .await
        .unwrap_err();

    let chain = err.chain();
    assert_eq!(chain.len(), 3, "{:?}", chain);
    assert!(chain[0].starts_with("Manager mgr-1"));
    assert!(chain[1].starts_with("Engineer eng-1"));
    assert!(chain[2].contains("provider returned 503"));
    assert!(matches!(err.root_cause(), Error::Generation(_)));

    let failed = notifier.of_type(Notification::TASK_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].role, Role::President);
    assert_eq!(org.status_of("mgr-1").unwrap().active_tasks, 0);
}

#[tokio::test]
async fn test_director_fan_out_reports_dispatch_not_outcome() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut config = hierarchy(&[
        (Role::President, 1),
        (Role::Director, 1),
        (Role::Manager, 2),
        (Role::Engineer, 2),
    ]);
    config.layers[3].system_prompt = Some(FAIL_PROMPT.to_string());

    let org = Organization::build(
        &config,
        OrgDeps::default()
            .with_generator(Arc::new(ScriptedGenerator::default()))
            .with_notifier(notifier.clone()),
    )
    .unwrap();

    let response = org
        .process_task(&TaskContext::new(), Task::new("Platform revamp", "Q3 initiative"))
        .await
        .unwrap();

    assert_eq!(response.status, TaskStatus::Completed);
    assert_eq!(delegated_to(&response), "dir-1");
    assert_eq!(response.result, "Dispatched task 'Platform revamp' to 2 managers");

    let failures = notifier.wait_for(Notification::DELEGATION_FAILED, 2).await;
    let failed: HashSet<_> = failures
        .iter()
        .filter_map(|n| n.details.get("subordinate").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(failed, HashSet::from(["mgr-1", "mgr-2"]));
    assert!(failures.iter().all(|n| n.role == Role::Director));
    assert!(notifier.of_type(Notification::TASK_FAILED).is_empty());
}

#[tokio::test]
async fn test_layer_policy_override() {
    let mut config = hierarchy(&[(Role::President, 1), (Role::Director, 1), (Role::Manager, 3)]);
    config.layers[1].policy = Some(DelegationPolicy::RoundRobin);
    let org = Organization::build(&config, OrgDeps::default()).unwrap();

    let response = org
        .process_task_on(&TaskContext::new(), "dir-1", Task::new("Hiring plan", "two teams"))
        .await
        .unwrap();
    assert_eq!(delegated_to(&response), "mgr-1");
    assert!(response.result.contains("No engineers available"));
}

#[tokio::test]
async fn test_lifecycle_misuse() {
    let org = Organization::build(&HierarchyConfig::default(), OrgDeps::default()).unwrap();

    assert!(matches!(org.stop(), Err(Error::AlreadyInState { .. })));
    org.start().unwrap();
    assert!(org.is_running());
    assert!(org
        .statuses()
        .iter()
        .all(|s| s.status == AgentStatus::Running));
    assert!(matches!(org.start(), Err(Error::AlreadyInState { .. })));

    org.stop().unwrap();
    assert!(org.stop().is_err());
    assert_eq!(org.status_of("eng-12").unwrap().status, AgentStatus::Stopped);
}

#[tokio::test]
async fn test_cancellation_reaches_in_flight_hop() {
    let org = Organization::build(
        &hierarchy(&[(Role::President, 1), (Role::Manager, 1), (Role::Engineer, 1)]),
        OrgDeps::default().with_generator(Arc::new(StalledGenerator)),
    )
    .unwrap();
    let ctx = TaskContext::new();

    let handle = {
        let org = org.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            org.process_task(&ctx, Task::new("Fix login", "Cookie dropped"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    ctx.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err.root_cause(), Error::Cancelled));
    assert_eq!(org.status_of("pres-1").unwrap().active_tasks, 0);

    let rejected = org
        .process_task(&ctx, Task::new("Another", "after cancel"))
        .await
        .unwrap_err();
    assert!(matches!(rejected, Error::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_exceeded() {
    let org = Organization::build(
        &hierarchy(&[(Role::President, 1), (Role::Engineer, 1)]),
        OrgDeps::default().with_generator(Arc::new(StalledGenerator)),
    )
    .unwrap();

    let err = org
        .process_task_on(
            &TaskContext::with_timeout(Duration::from_secs(30)),
            "eng-1",
            Task::new("Fix login", "Cookie dropped"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_task_releases_active_count() {
    let org = Organization::build(
        &hierarchy(&[(Role::President, 1), (Role::Manager, 1), (Role::Engineer, 1)]),
        OrgDeps::default().with_generator(Arc::new(StalledGenerator)),
    )
    .unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_millis(10),
        org.process_task(&TaskContext::new(), Task::new("Fix login", "Cookie dropped")),
    )
    .await;
    assert!(outcome.is_err());

    assert_eq!(org.status_of("pres-1").unwrap().active_tasks, 0);
    assert!(org.statuses().iter().all(|s| s.active_tasks == 0));
}

#[tokio::test]
async fn test_background_work_drains_before_memory_closes() {
    let memory = memory();
    let org = Organization::build(
        &hierarchy(&[(Role::President, 1), (Role::Director, 1), (Role::Manager, 2)]),
        OrgDeps::default().with_memory(Arc::clone(&memory)),
    )
    .unwrap();

    let response = org
        .process_task_on(&TaskContext::new(), "dir-1", Task::new("Platform revamp", "Q3 initiative"))
        .await
        .unwrap();
    assert_eq!(response.result, "Dispatched task 'Platform revamp' to 2 managers");

    org.wait_for_background().await;

    let director_tasks = memory
        .query_memories(&MemoryQuery::for_agent("dir-1").of_type(MemoryType::Task))
        .unwrap();
    // Own record plus one per manager
    assert_eq!(director_tasks.len(), 3);
    for manager in ["mgr-1", "mgr-2"] {
        let records = memory
            .query_memories(&MemoryQuery::for_agent(manager).of_type(MemoryType::Task))
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    memory.close().await.unwrap();

    // The tracker reopens, so a later drain with nothing in flight returns
    org.wait_for_background().await;
}

#[tokio::test]
async fn test_build_rejects_invalid_hierarchy() {
    let err = Organization::build(&HierarchyConfig::new(vec![]), OrgDeps::default())
        .err()
        .unwrap();
    assert!(matches!(err, Error::Config(_)));

    let dangling = HierarchyConfig::new(vec![
        LayerConfig::new(Role::President, 1),
        LayerConfig::new(Role::Secretary, 1).attach_to(Role::Director),
    ]);
    assert!(matches!(
        Organization::build(&dangling, OrgDeps::default()),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn test_queries_and_attachments() {
    let config = HierarchyConfig::new(vec![
        LayerConfig::new(Role::President, 1),
        LayerConfig::new(Role::Secretary, 2).attach_to(Role::Director),
        LayerConfig::new(Role::Director, 2),
    ]);
    let org = Organization::build(&config, OrgDeps::default()).unwrap();

    assert_eq!(org.agents_by_role(Role::Secretary).len(), 2);
    assert_eq!(org.attached_to("sec-2"), Some("dir-2"));
    assert_eq!(org.attachments_of("dir-1"), vec!["sec-1"]);
    assert_eq!(org.attached_to("pres-1"), None);
    // attachment is a cross-edge, not a reporting line
    assert_eq!(org.subordinates_of("sec-1").unwrap(), vec!["dir-1"]);
    assert_eq!(org.parent_of("dir-2"), Some("sec-2"));
    assert!(org.agent("eng-1").unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_notify_is_recorded_and_forwarded() {
    let memory = memory();
    let notifier = Arc::new(RecordingNotifier::default());
    let org = Organization::build(
        &HierarchyConfig::default(),
        OrgDeps::default()
            .with_memory(Arc::clone(&memory))
            .with_notifier(notifier.clone()),
    )
    .unwrap();

    let details = HashMap::from([("build".to_string(), serde_json::json!(42))]);
    org.notify("eng-3", "deploy finished", details)
        .unwrap()
        .await
        .unwrap();

    let events = notifier.of_type(Notification::NOTIFICATION);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].role, Role::Engineer);
    assert_eq!(events[0].details["build"], 42);

    let history = memory
        .query_memories(&MemoryQuery::for_agent("eng-3").of_type(MemoryType::Conversation))
        .unwrap();
    assert_eq!(history[0].content, "Notification: deploy finished");

    assert!(org.notify("nobody", "hi", HashMap::new()).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_round_robin_is_fair_and_ordered(subordinates in 1usize..6, tasks in 1usize..25) {
        let org = Organization::build(
            &hierarchy(&[(Role::President, 1), (Role::Engineer, subordinates)]),
            OrgDeps::default(),
        )
        .unwrap();

        let picks: Vec<String> = tokio_test::block_on(async {
            let ctx = TaskContext::new();
            let mut picks = Vec::with_capacity(tasks);
            for n in 0..tasks {
                let response = org
                    .process_task(&ctx, Task::new(format!("task {}", n), "work"))
                    .await
                    .unwrap();
                picks.push(delegated_to(&response));
            }
            picks
        });

        for (n, pick) in picks.iter().enumerate() {
            prop_assert_eq!(pick, &format!("eng-{}", n % subordinates + 1));
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for pick in &picks {
            *counts.entry(pick.as_str()).or_default() += 1;
        }
        let max = counts.values().copied().max().unwrap_or(0);
        let min = if counts.len() < subordinates { 0 } else { counts.values().copied().min().unwrap_or(0) };
        prop_assert!(max - min <= 1);
    }
}
