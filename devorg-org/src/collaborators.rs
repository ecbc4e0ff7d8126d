//! Seams to the outside world: text generation and notifications

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::role::Role;

/// Per-call generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// A text-generation provider.
///
/// Provider selection, retries and rate limiting live behind this trait.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;
}

/// One event sent to the notifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event_type: String,
    pub role: Role,
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl Notification {
    pub const TASK_COMPLETED: &'static str = "task_completed";
    pub const TASK_FAILED: &'static str = "task_failed";
    pub const DELEGATION_FAILED: &'static str = "delegation_failed";
    pub const NOTIFICATION: &'static str = "notification";

    pub fn new(event_type: impl Into<String>, role: Role, message: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            role,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Receives organization events. Errors are logged by the caller and never
/// fail the task that raised the event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes every notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        info!(
            event_type = %notification.event_type,
            role = %notification.role,
            details = ?notification.details,
            "{}",
            notification.message
        );
        Ok(())
    }
}
