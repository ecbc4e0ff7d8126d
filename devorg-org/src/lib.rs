//! # devorg org
//!
//! A virtual software organization: President, Secretary, Directors,
//! Managers and Engineers, each an [`Agent`] that can hand work to the
//! layer below and learns from past work through shared memory.
//!
//! Delegation comes in two shapes. Presidents, Secretaries and Managers pick
//! one subordinate (round-robin, or memory-informed) and wait for its
//! answer; a failure fails the whole chain with one error context per hop.
//! Directors fan out to every manager on independent tasks and report
//! success once the work is dispatched.
//!
//! ```rust,ignore
//! use devorg_org::{HierarchyConfig, OrgDeps, Organization, Task, TaskContext};
//!
//! let org = Organization::build(&HierarchyConfig::default(), OrgDeps::default())?;
//! org.start()?;
//! let response = org
//!     .process_task(&TaskContext::new(), Task::new("Add search", "Full-text search over issues"))
//!     .await?;
//! ```

pub mod agent;
pub mod agent_memory;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod organization;
pub mod role;
pub mod task;

pub use agent::{ActiveTask, Agent, AgentStatus, AgentStatusReport, Selection, SelectionReason};
pub use agent_memory::AgentMemory;
pub use collaborators::{GenerationOptions, Generator, Notification, Notifier, TracingNotifier};
pub use config::{HierarchyConfig, LayerConfig, OrgConfig};
pub use context::TaskContext;
pub use error::{Error, Result};
pub use organization::{OrgDeps, Organization};
pub use role::{DelegationContract, DelegationPolicy, Role};
pub use task::{Task, TaskPriority, TaskResponse, TaskStatus};
