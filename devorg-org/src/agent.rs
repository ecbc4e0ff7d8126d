//! A single role-specialized agent

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::agent_memory::AgentMemory;
use crate::collaborators::GenerationOptions;
use crate::error::{Error, Result};
use crate::role::{DelegationPolicy, Role};

/// Lifecycle state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Running,
    Stopped,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time view of an agent, as served by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub agent_id: String,
    pub role: Role,
    pub status: AgentStatus,
    pub active_tasks: usize,
    pub completed_tasks: u64,
    pub subordinates: Vec<String>,
}

/// Why a delegation target was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    RoundRobin { slot: usize, of: usize },
    MemoryInformed { successes: usize },
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionReason::RoundRobin { slot, of } => {
                write!(f, "round-robin rotation (slot {} of {})", slot + 1, of)
            }
            SelectionReason::MemoryInformed { successes } => {
                write!(f, "{} prior successful related task(s)", successes)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub agent_id: String,
    pub reason: SelectionReason,
}

#[derive(Debug)]
struct AgentState {
    status: AgentStatus,
    active_tasks: usize,
    completed_tasks: u64,
    subordinates: Vec<String>,
}

/// An in-flight task on an agent. Dropping it, including when the owning
/// future is abandoned, decrements the agent's active count.
#[must_use = "the task stops counting as active as soon as the guard drops"]
#[derive(Debug)]
pub struct ActiveTask<'a> {
    agent: &'a Agent,
}

impl Drop for ActiveTask<'_> {
    fn drop(&mut self) {
        self.agent.decrement_active_tasks();
    }
}

/// One node of the organization.
///
/// Role behaviour comes from the injected [`DelegationPolicy`], not from a
/// per-role type. Mutable state sits behind a per-agent lock that is never
/// held across an await or while another agent's lock is taken.
#[derive(Debug)]
pub struct Agent {
    id: String,
    role: Role,
    policy: DelegationPolicy,
    generation: GenerationOptions,
    memory: AgentMemory,
    subordinate_role: Option<Role>,
    cursor: AtomicUsize,
    state: Mutex<AgentState>,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        role: Role,
        policy: DelegationPolicy,
        generation: GenerationOptions,
        memory: AgentMemory,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            policy,
            generation,
            memory,
            subordinate_role: role.subordinate_role(),
            cursor: AtomicUsize::new(0),
            state: Mutex::new(AgentState {
                status: AgentStatus::Idle,
                active_tasks: 0,
                completed_tasks: 0,
                subordinates: Vec::new(),
            }),
        }
    }

    /// Role of the layer below, when it differs from the role default
    pub fn with_subordinate_role(mut self, role: Option<Role>) -> Self {
        self.subordinate_role = role;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn policy(&self) -> DelegationPolicy {
        self.policy
    }

    pub fn generation_options(&self) -> &GenerationOptions {
        &self.generation
    }

    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    pub fn subordinate_role(&self) -> Option<Role> {
        self.subordinate_role
    }

    fn state(&self) -> MutexGuard<'_, AgentState> {
        // Counters stay meaningful even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.state();
        if state.status == AgentStatus::Running {
            return Err(Error::already_in_state(&self.id, "running"));
        }
        state.status = AgentStatus::Running;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.state();
        if state.status != AgentStatus::Running {
            return Err(Error::already_in_state(&self.id, "stopped"));
        }
        state.status = AgentStatus::Stopped;
        Ok(())
    }

    pub fn status(&self) -> AgentStatus {
        self.state().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == AgentStatus::Running
    }

    pub fn increment_active_tasks(&self) {
        self.state().active_tasks += 1;
    }

    /// Mark one active task finished and count it as completed
    pub fn decrement_active_tasks(&self) {
        let mut state = self.state();
        state.active_tasks = state.active_tasks.saturating_sub(1);
        state.completed_tasks += 1;
    }

    /// Count one task as active until the returned guard drops
    pub fn begin_task(&self) -> ActiveTask<'_> {
        self.increment_active_tasks();
        ActiveTask { agent: self }
    }

    pub fn active_tasks(&self) -> usize {
        self.state().active_tasks
    }

    pub fn completed_tasks(&self) -> u64 {
        self.state().completed_tasks
    }

    pub fn add_subordinate(&self, agent_id: impl Into<String>) {
        let agent_id = agent_id.into();
        let mut state = self.state();
        if !state.subordinates.contains(&agent_id) {
            state.subordinates.push(agent_id);
        }
    }

    pub fn remove_subordinate(&self, agent_id: &str) -> bool {
        let mut state = self.state();
        let before = state.subordinates.len();
        state.subordinates.retain(|id| id != agent_id);
        state.subordinates.len() != before
    }

    /// Snapshot of subordinate ids in registration order
    pub fn subordinates(&self) -> Vec<String> {
        self.state().subordinates.clone()
    }

    pub fn report(&self) -> AgentStatusReport {
        let state = self.state();
        AgentStatusReport {
            agent_id: self.id.clone(),
            role: self.role,
            status: state.status,
            active_tasks: state.active_tasks,
            completed_tasks: state.completed_tasks,
            subordinates: state.subordinates.clone(),
        }
    }

    /// Choose one of `subordinates` for the next task.
    ///
    /// The cursor always advances. When `successes` names any subordinate,
    /// the first one found scanning from the round-robin slot wins.
    pub fn select_target(
        &self,
        subordinates: &[String],
        successes: &HashMap<String, usize>,
    ) -> Option<Selection> {
        if subordinates.is_empty() {
            return None;
        }
        let count = subordinates.len();
        let slot = self.cursor.fetch_add(1, Ordering::SeqCst) % count;

        let informed = (0..count)
            .map(|offset| &subordinates[(slot + offset) % count])
            .find_map(|id| {
                successes
                    .get(id)
                    .filter(|n| **n > 0)
                    .map(|n| (id, *n))
            });

        Some(match informed {
            Some((id, successes)) => Selection {
                agent_id: id.clone(),
                reason: SelectionReason::MemoryInformed { successes },
            },
            None => Selection {
                agent_id: subordinates[slot].clone(),
                reason: SelectionReason::RoundRobin { slot, of: count },
            },
        })
    }
}
