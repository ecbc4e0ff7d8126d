//! The organization: an arena of agents, the relations between them and
//! the engine that routes tasks down the tree.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use devorg_memory::{MemoryEntry, MemoryManager};
use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentStatusReport};
use crate::agent_memory::AgentMemory;
use crate::collaborators::{Generator, Notification, Notifier, TracingNotifier};
use crate::config::HierarchyConfig;
use crate::context::TaskContext;
use crate::error::{Error, Result};
use crate::role::{DelegationContract, DelegationPolicy, Role};
use crate::task::{Task, TaskResponse, TaskStatus};

/// External collaborators shared by every agent
#[derive(Clone)]
pub struct OrgDeps {
    pub memory: Option<Arc<MemoryManager>>,
    pub generator: Option<Arc<dyn Generator>>,
    pub notifier: Arc<dyn Notifier>,
}

impl Default for OrgDeps {
    fn default() -> Self {
        Self {
            memory: None,
            generator: None,
            notifier: Arc::new(TracingNotifier),
        }
    }
}

impl OrgDeps {
    pub fn with_memory(mut self, memory: Arc<MemoryManager>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

struct Inner {
    agents: HashMap<String, Arc<Agent>>,
    /// Build order: root first, then layer by layer
    order: Vec<String>,
    root: String,
    parents: HashMap<String, String>,
    attached_to: HashMap<String, String>,
    memory: Option<Arc<MemoryManager>>,
    generator: Option<Arc<dyn Generator>>,
    notifier: Arc<dyn Notifier>,
    running: AtomicBool,
    /// Fan-out children and notifications still in flight
    background: TaskTracker,
}

/// A built organization. Cloning is cheap and every clone shares the same
/// agents.
#[derive(Clone)]
pub struct Organization {
    inner: Arc<Inner>,
}

impl Organization {
    /// Build the agent tree described by `hierarchy`.
    ///
    /// Agent `n` of a layer reports to agent `n mod parents` of the layer
    /// above it. `attach_to` adds a cross-edge to the named layer using the
    /// same spread.
    pub fn build(hierarchy: &HierarchyConfig, deps: OrgDeps) -> Result<Self> {
        hierarchy.validate()?;

        let mut agents: HashMap<String, Arc<Agent>> = HashMap::new();
        let mut order = Vec::new();
        let mut parents = HashMap::new();
        let mut layer_ids: Vec<Vec<String>> = Vec::with_capacity(hierarchy.layers.len());

        for (depth, layer) in hierarchy.layers.iter().enumerate() {
            let below = hierarchy
                .layers
                .get(depth + 1)
                .map(|l| l.role)
                .or(layer.role.subordinate_role());
            let above = depth.checked_sub(1).map(|d| &layer_ids[d]);

            let mut ids = Vec::with_capacity(layer.count);
            for n in 0..layer.count {
                let id = format!("{}-{}", layer.role.id_prefix(), n + 1);
                let agent = Agent::new(
                    id.as_str(),
                    layer.role,
                    layer.policy(),
                    layer.generation_options(),
                    AgentMemory::new(id.as_str(), deps.memory.clone()),
                )
                .with_subordinate_role(below);

                if let Some(parent_id) = above.and_then(|p| p.get(n % p.len().max(1))) {
                    if let Some(parent) = agents.get(parent_id) {
                        parent.add_subordinate(id.as_str());
                    }
                    parents.insert(id.clone(), parent_id.clone());
                }

                agents.insert(id.clone(), Arc::new(agent));
                order.push(id.clone());
                ids.push(id);
            }
            layer_ids.push(ids);
        }

        let mut attached_to = HashMap::new();
        for (depth, layer) in hierarchy.layers.iter().enumerate() {
            let Some(target_role) = layer.attach_to else {
                continue;
            };
            let Some(targets) = hierarchy
                .layers
                .iter()
                .position(|l| l.role == target_role)
                .map(|i| &layer_ids[i])
            else {
                continue;
            };
            for (n, id) in layer_ids[depth].iter().enumerate() {
                attached_to.insert(id.clone(), targets[n % targets.len()].clone());
            }
        }

        let root = layer_ids
            .first()
            .and_then(|ids| ids.first())
            .cloned()
            .ok_or_else(|| Error::config("Hierarchy has no root agent"))?;

        info!(agents = order.len(), root = %root, "Organization built");

        Ok(Self {
            inner: Arc::new(Inner {
                agents,
                order,
                root,
                parents,
                attached_to,
                memory: deps.memory,
                generator: deps.generator,
                notifier: deps.notifier,
                running: AtomicBool::new(false),
                background: TaskTracker::new(),
            }),
        })
    }

    pub fn memory(&self) -> Option<&Arc<MemoryManager>> {
        self.inner.memory.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start every agent. Fails if the organization is already running.
    pub fn start(&self) -> Result<()> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::already_in_state("organization", "running"));
        }
        for agent in self.agents() {
            if let Err(e) = agent.start() {
                warn!(agent_id = %agent.id(), error = %e, "Agent start skipped");
            }
        }
        info!("Organization started");
        Ok(())
    }

    /// Stop every agent. Fails if the organization is not running.
    pub fn stop(&self) -> Result<()> {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::already_in_state("organization", "stopped"));
        }
        for agent in self.agents() {
            if let Err(e) = agent.stop() {
                warn!(agent_id = %agent.id(), error = %e, "Agent stop skipped");
            }
        }
        info!("Organization stopped");
        Ok(())
    }

    // === Queries ===

    pub fn agent(&self, agent_id: &str) -> Result<Arc<Agent>> {
        self.inner
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))
    }

    /// All agents, root first
    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.inner
            .order
            .iter()
            .filter_map(|id| self.inner.agents.get(id).cloned())
            .collect()
    }

    pub fn agents_by_role(&self, role: Role) -> Vec<Arc<Agent>> {
        self.agents()
            .into_iter()
            .filter(|a| a.role() == role)
            .collect()
    }

    pub fn root(&self) -> Result<Arc<Agent>> {
        self.agent(&self.inner.root)
    }

    pub fn parent_of(&self, agent_id: &str) -> Option<&str> {
        self.inner.parents.get(agent_id).map(String::as_str)
    }

    pub fn subordinates_of(&self, agent_id: &str) -> Result<Vec<String>> {
        Ok(self.agent(agent_id)?.subordinates())
    }

    /// The agent `agent_id` is attached to, if its layer has an attach-to link
    pub fn attached_to(&self, agent_id: &str) -> Option<&str> {
        self.inner.attached_to.get(agent_id).map(String::as_str)
    }

    /// Agents attached to `agent_id`, in build order
    pub fn attachments_of(&self, agent_id: &str) -> Vec<String> {
        self.inner
            .order
            .iter()
            .filter(|id| self.attached_to(id) == Some(agent_id))
            .cloned()
            .collect()
    }

    pub fn status_of(&self, agent_id: &str) -> Result<AgentStatusReport> {
        Ok(self.agent(agent_id)?.report())
    }

    pub fn statuses(&self) -> Vec<AgentStatusReport> {
        self.agents().iter().map(|a| a.report()).collect()
    }

    // === Task processing ===

    /// Submit a task to the root agent
    pub async fn process_task(&self, ctx: &TaskContext, task: Task) -> Result<TaskResponse> {
        let root = self.inner.root.clone();
        self.process_task_on(ctx, &root, task).await
    }

    /// Submit a task to a specific agent
    pub async fn process_task_on(
        &self,
        ctx: &TaskContext,
        agent_id: &str,
        task: Task,
    ) -> Result<TaskResponse> {
        let agent = self.agent(agent_id)?;
        let task = if task.to_agent.is_empty() {
            task.to_agent(agent_id)
        } else {
            task
        };
        let title = task.title.clone();
        let task_id = task.id.clone();

        let result = self.dispatch(Arc::clone(&agent), ctx.clone(), task).await;

        let notification = match &result {
            Ok(response) => Notification::new(
                Notification::TASK_COMPLETED,
                agent.role(),
                format!("Task '{}' completed", title),
            )
            .with_detail("result", response.result.as_str()),
            Err(e) => {
                warn!(agent_id = %agent_id, task_id = %task_id, error = %e, "Task failed");
                Notification::new(
                    Notification::TASK_FAILED,
                    agent.role(),
                    format!("Task '{}' failed: {}", title, e.root_cause()),
                )
                .with_detail("error_chain", e.chain())
            }
        };
        self.emit(
            notification
                .with_detail("task_id", task_id)
                .with_detail("agent_id", agent_id),
        )
        .await;

        result
    }

    /// Wait until every fan-out child and notification has finished,
    /// including ones spawned while waiting.
    pub async fn wait_for_background(&self) {
        let background = &self.inner.background;
        background.close();
        background.wait().await;
        background.reopen();
    }

    /// Fire-and-forget message to an agent. The returned handle may be
    /// dropped.
    pub fn notify(
        &self,
        agent_id: &str,
        message: impl Into<String>,
        details: HashMap<String, serde_json::Value>,
    ) -> Result<JoinHandle<()>> {
        let agent = self.agent(agent_id)?;
        let message = message.into();
        let org = self.clone();

        Ok(self.inner.background.spawn(async move {
            let record = format!("Notification: {}", message);
            if let Err(e) = agent
                .memory()
                .store_conversation(&record, vec!["notification".to_string()])
                .await
            {
                warn!(agent_id = %agent.id(), error = %e, "Failed to record notification");
            }

            let mut notification = Notification::new(Notification::NOTIFICATION, agent.role(), message)
                .with_detail("agent_id", agent.id());
            notification.details.extend(details);
            org.emit(notification).await;
        }))
    }

    async fn emit(&self, notification: Notification) {
        if let Err(e) = self.inner.notifier.notify(&notification).await {
            warn!(event_type = %notification.event_type, error = %e, "Notifier failed");
        }
    }

    fn dispatch(
        &self,
        agent: Arc<Agent>,
        ctx: TaskContext,
        task: Task,
    ) -> BoxFuture<'static, Result<TaskResponse>> {
        let org = self.clone();
        async move {
            ctx.check()?;
            let _active = agent.begin_task();
            org.handle(&agent, &ctx, &task).await
        }
        .boxed()
    }

    async fn handle(&self, agent: &Arc<Agent>, ctx: &TaskContext, task: &Task) -> Result<TaskResponse> {
        info!(
            agent_id = %agent.id(),
            role = %agent.role(),
            task_id = %task.id,
            title = %task.title,
            "Task received"
        );

        let memory = agent.memory();
        let sender = if task.from_agent.is_empty() {
            "client"
        } else {
            task.from_agent.as_str()
        };
        let received = format!("Received task '{}' from {}: {}", task.title, sender, task.content);
        ctx.run(memory.store_conversation(&received, tags_for(agent)))
            .await?;

        let subordinates = agent.subordinates();

        let related = match agent.policy() {
            DelegationPolicy::MemoryInformed { related_tasks } if !subordinates.is_empty() => {
                let related = ctx
                    .run(memory.get_related_tasks(&task.title, related_tasks))
                    .await?;
                debug!(agent_id = %agent.id(), related = related.len(), "Memory consulted");
                related
            }
            _ => Vec::new(),
        };

        let analysis = self.generate(agent, ctx, task, &related).await?;

        match agent.policy().contract() {
            DelegationContract::Terminal => {
                let response = TaskResponse::completed(&task.id, analysis);
                self.finish(agent, ctx, task, response).await
            }
            _ if subordinates.is_empty() => {
                let below = agent.subordinate_role().unwrap_or(Role::Engineer);
                let message = format!(
                    "No {} available to handle task '{}'",
                    below.plural(),
                    task.title
                );
                info!(agent_id = %agent.id(), task_id = %task.id, "{}", message);
                let response =
                    TaskResponse::completed(&task.id, message).with_metadata("delegated", false);
                self.finish(agent, ctx, task, response).await
            }
            DelegationContract::SynchronousSingle => {
                self.delegate_single(agent, ctx, task, &subordinates, &related, analysis)
                    .await
            }
            DelegationContract::FireAndForgetFanOut => {
                self.fan_out(agent, ctx, task, &subordinates, analysis).await
            }
        }
    }

    async fn generate(
        &self,
        agent: &Agent,
        ctx: &TaskContext,
        task: &Task,
        related: &[MemoryEntry],
    ) -> Result<String> {
        let Some(generator) = &self.inner.generator else {
            return Ok(task.content.clone());
        };
        let prompt = build_prompt(task, related);
        ctx.run(generator.generate(&prompt, agent.generation_options()))
            .await
    }

    async fn delegate_single(
        &self,
        agent: &Arc<Agent>,
        ctx: &TaskContext,
        task: &Task,
        subordinates: &[String],
        related: &[MemoryEntry],
        analysis: String,
    ) -> Result<TaskResponse> {
        let successes = tally_successes(subordinates, related);
        let selection = agent
            .select_target(subordinates, &successes)
            .ok_or_else(|| Error::AgentNotFound(format!("subordinate of {}", agent.id())))?;
        info!(
            agent_id = %agent.id(),
            task_id = %task.id,
            target = %selection.agent_id,
            reason = %selection.reason,
            "Delegation target selected"
        );

        let target = self.agent(&selection.agent_id)?;
        let decision = format!("Delegate task '{}' to {}", task.title, target.id());
        ctx.run(
            agent
                .memory()
                .store_decision(&decision, &selection.reason.to_string(), tags_for(agent)),
        )
        .await?;

        let child_task = task.delegate(agent.id(), target.id(), analysis);
        let outcome = self
            .dispatch(Arc::clone(&target), ctx.child(), child_task.clone())
            .await
            .and_then(|response| match response.status {
                TaskStatus::Failed => Err(Error::SubordinateFailed {
                    agent_id: target.id().to_string(),
                    message: response.error.unwrap_or_default(),
                }),
                _ => Ok(response),
            });

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    agent_id = %agent.id(),
                    target = %target.id(),
                    task_id = %task.id,
                    error = %e,
                    "Delegation failed"
                );
                let message = e.to_string();
                self.record_best_effort(agent, &child_task, &TaskResponse::failed(&child_task.id, &message))
                    .await;
                self.record_best_effort(agent, task, &TaskResponse::failed(&task.id, &message))
                    .await;
                return Err(e.in_hop(target.role(), target.id(), child_task.id));
            }
        };

        ctx.run(agent.memory().store_task(&child_task, &response, tags_for(agent)))
            .await?;

        let result = TaskResponse::completed(&task.id, response.result)
            .with_metadata("delegated_to", target.id())
            .with_metadata("subordinate_task_id", child_task.id.as_str());
        self.finish(agent, ctx, task, result).await
    }

    async fn fan_out(
        &self,
        agent: &Arc<Agent>,
        ctx: &TaskContext,
        task: &Task,
        subordinates: &[String],
        analysis: String,
    ) -> Result<TaskResponse> {
        let below = agent.subordinate_role().unwrap_or(Role::Engineer);
        let decision = format!(
            "Fan out task '{}' to {} {}",
            task.title,
            subordinates.len(),
            below.plural()
        );
        let reasoning = format!("parallel workstreams for {}", subordinates.join(", "));
        ctx.run(agent.memory().store_decision(&decision, &reasoning, tags_for(agent)))
            .await?;

        let mut dispatched = Vec::with_capacity(subordinates.len());
        for sub_id in subordinates {
            let child = match self.agent(sub_id) {
                Ok(child) => child,
                Err(e) => {
                    warn!(agent_id = %agent.id(), subordinate = %sub_id, error = %e, "Skipping unknown subordinate");
                    continue;
                }
            };
            let child_task = task.delegate(agent.id(), child.id(), analysis.clone());
            let org = self.clone();
            let parent = Arc::clone(agent);
            let child_ctx = ctx.child();
            self.inner.background.spawn(async move {
                org.run_fan_out_child(parent, child, child_ctx, child_task)
                    .await;
            });
            dispatched.push(sub_id.clone());
        }

        info!(
            agent_id = %agent.id(),
            task_id = %task.id,
            dispatched = dispatched.len(),
            "Fan-out dispatched"
        );

        let result = format!(
            "Dispatched task '{}' to {} {}",
            task.title,
            dispatched.len(),
            below.plural()
        );
        let response = TaskResponse::completed(&task.id, result).with_metadata("dispatched_to", dispatched);
        self.finish(agent, ctx, task, response).await
    }

    async fn run_fan_out_child(&self, parent: Arc<Agent>, child: Arc<Agent>, ctx: TaskContext, task: Task) {
        let failure = match self.dispatch(Arc::clone(&child), ctx, task.clone()).await {
            Ok(response) if response.status != TaskStatus::Failed => {
                self.record_best_effort(&parent, &task, &response).await;
                return;
            }
            Ok(response) => response.error.unwrap_or_default(),
            Err(e) => e.chain().join(": "),
        };

        warn!(
            agent_id = %parent.id(),
            subordinate = %child.id(),
            task_id = %task.id,
            error = %failure,
            "Fan-out delegation failed"
        );
        self.record_best_effort(&parent, &task, &TaskResponse::failed(&task.id, &failure))
            .await;
        self.emit(
            Notification::new(
                Notification::DELEGATION_FAILED,
                parent.role(),
                format!("{} {} failed task '{}'", child.role(), child.id(), task.title),
            )
            .with_detail("agent_id", parent.id())
            .with_detail("subordinate", child.id())
            .with_detail("task_id", task.id.as_str())
            .with_detail("error", failure),
        )
        .await;
    }

    async fn finish(
        &self,
        agent: &Agent,
        ctx: &TaskContext,
        task: &Task,
        response: TaskResponse,
    ) -> Result<TaskResponse> {
        ctx.run(agent.memory().store_task(task, &response, tags_for(agent)))
            .await?;
        debug!(agent_id = %agent.id(), task_id = %task.id, status = %response.status, "Task finished");
        Ok(response)
    }

    async fn record_best_effort(&self, agent: &Agent, task: &Task, response: &TaskResponse) {
        if let Err(e) = agent.memory().store_task(task, response, tags_for(agent)).await {
            warn!(agent_id = %agent.id(), task_id = %task.id, error = %e, "Failed to record task outcome");
        }
    }
}

fn tags_for(agent: &Agent) -> Vec<String> {
    vec![agent.role().as_str().to_string()]
}

/// Count prior successes per currently registered subordinate
fn tally_successes(subordinates: &[String], related: &[MemoryEntry]) -> HashMap<String, usize> {
    let mut tally = HashMap::new();
    for entry in related {
        if entry.metadata_str("status") != Some(TaskStatus::Completed.as_str()) {
            continue;
        }
        let Some(to_agent) = entry.metadata_str("to_agent") else {
            continue;
        };
        if subordinates.iter().any(|id| id == to_agent) {
            *tally.entry(to_agent.to_string()).or_insert(0) += 1;
        }
    }
    tally
}

fn build_prompt(task: &Task, related: &[MemoryEntry]) -> String {
    let mut prompt = format!("Task: {}\n", task.title);
    if !task.description.is_empty() {
        let _ = writeln!(prompt, "Description: {}", task.description);
    }
    if !task.content.is_empty() && task.content != task.description {
        let _ = writeln!(prompt, "\n{}", task.content);
    }
    if !related.is_empty() {
        prompt.push_str("\nRelated past work:\n");
        for entry in related {
            let summary = entry.content.lines().next().unwrap_or_default();
            let status = entry.metadata_str("status").unwrap_or("unknown");
            let _ = writeln!(prompt, "- {} ({})", summary, status);
        }
    }
    prompt
}
