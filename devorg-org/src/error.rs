//! Error types for devorg-org

use std::error::Error as StdError;

use thiserror::Error;

use crate::role::Role;

/// Result type alias for devorg-org operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or running the organization
#[derive(Error, Debug)]
pub enum Error {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("{subject} is already {state}")]
    AlreadyInState { subject: String, state: String },

    #[error("Memory error: {0}")]
    Memory(#[from] devorg_memory::Error),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("{role} {agent_id} could not complete task {task_id}")]
    Delegation {
        role: Role,
        agent_id: String,
        task_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{agent_id} reported failure: {message}")]
    SubordinateFailed { agent_id: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Task deadline exceeded")]
    DeadlineExceeded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn already_in_state(subject: impl Into<String>, state: impl Into<String>) -> Self {
        Self::AlreadyInState {
            subject: subject.into(),
            state: state.into(),
        }
    }

    /// Wrap `self` as the failure of one delegation hop
    pub fn in_hop(self, role: Role, agent_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self::Delegation {
            role,
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            source: Box::new(self),
        }
    }

    /// Messages from this error down to its root cause, outermost first
    pub fn chain(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current: Option<&(dyn StdError + 'static)> = self.source();
        while let Some(err) = current {
            messages.push(err.to_string());
            current = err.source();
        }
        messages
    }

    /// The innermost error of a delegation chain
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Delegation { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::AgentNotFound(_) => true,
            Self::Memory(e) => e.is_not_found(),
            _ => false,
        }
    }
}
