//! Type-specific retention: how long each kind of memory lives

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::MemoryType;

/// Years used for memories whose retention is "forever"
pub const FOREVER_YEARS: u32 = 100;

/// Retention in days per memory type. Zero keeps a memory for
/// [`FOREVER_YEARS`] so expiry stays a plain range comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub conversation_days: u32,
    pub task_days: u32,
    pub knowledge_days: u32,
    pub decision_days: u32,
    pub context_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            conversation_days: 30,
            task_days: 90,
            knowledge_days: 0,
            decision_days: 365,
            context_days: 7,
        }
    }
}

impl RetentionPolicy {
    /// Days a memory of the given type is retained (0 = forever)
    pub fn days_for(&self, memory_type: MemoryType) -> u32 {
        match memory_type {
            MemoryType::Conversation => self.conversation_days,
            MemoryType::Task => self.task_days,
            MemoryType::Knowledge => self.knowledge_days,
            MemoryType::Decision => self.decision_days,
            MemoryType::Context => self.context_days,
        }
    }

    /// Expiration for a memory of `memory_type` created at `created_at`
    pub fn calculate_expiration(
        &self,
        memory_type: MemoryType,
        created_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        expiration_after(created_at, self.days_for(memory_type))
    }
}

/// `created_at + days`, or `created_at + 100 years` when `days` is zero.
pub fn expiration_after(created_at: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    if days == 0 {
        return created_at
            .checked_add_months(Months::new(FOREVER_YEARS * 12))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
    created_at
        .checked_add_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
