//! Task data model
//!
//! A [`Task`] is an immutable description of a unit of work plus a retry
//! counter. The pool owns a task from submission until it either completes
//! or exhausts its retry budget; retried tasks keep their identity.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::duration_millis;

/// Default execution timeout for tasks built with [`Task::new`]
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default retry ceiling for tasks built with [`Task::new`]
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Opaque unique task identifier (UUID v7, time-ordered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Task priority, ordered `Low < Medium < High < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// All priorities, lowest first
    pub const ALL: [TaskPriority; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prioritized, retry-bounded unit of opaque work
///
/// # Example
///
/// ```
/// use arbiter_pool::{Task, TaskPriority};
/// use serde_json::json;
/// use std::time::Duration;
///
/// let task = Task::new(TaskPriority::High, json!({"bracket": 42}))
///     .with_timeout(Duration::from_secs(5))
///     .with_max_retries(2);
///
/// assert_eq!(task.retries, 0);
/// assert!(task.can_retry());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Scheduling priority
    pub priority: TaskPriority,

    /// Application data, never inspected by the pool
    pub payload: serde_json::Value,

    /// Creation time, breaks ordering ties within a priority band
    pub created_at: DateTime<Utc>,

    /// Maximum wall-clock duration allowed for one execution attempt
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Number of retries consumed so far
    pub retries: u32,

    /// Retry ceiling; a task runs at most `max_retries + 1` times
    pub max_retries: u32,
}

impl Task {
    /// Create a task with the default timeout and retry budget
    pub fn new(priority: TaskPriority, payload: serde_json::Value) -> Self {
        Self {
            id: TaskId::new(),
            priority,
            payload,
            created_at: Utc::now(),
            timeout: DEFAULT_TASK_TIMEOUT,
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry ceiling
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the creation timestamp
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether another attempt is allowed after a failure
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    /// Number of attempts made once the current one finishes
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}
