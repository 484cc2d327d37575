//! Task types and task submissions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::params::TaskParams;

/// Error type returned by task implementations.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// A named capability the worker pool can execute.
///
/// Implementations are registered on the queue server before it starts and
/// live for the rest of the process. A single instance serves every
/// invocation, so any per-run state belongs in the parameters.
#[async_trait]
pub trait TaskType: Send + Sync {
    /// Name the task is registered and submitted under.
    fn name(&self) -> &str;

    /// Run the task with the submitted parameters.
    async fn run(&self, params: TaskParams) -> Result<Value, TaskError>;
}

/// Unique identifier of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task submission as carried by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSignature {
    pub id: TaskId,
    /// Registered task type name.
    pub name: String,
    pub params: TaskParams,
    pub created_at: DateTime<Utc>,
    /// Workers refuse to start the task after this instant.
    pub valid_until: DateTime<Utc>,
}

impl TaskSignature {
    /// Create a submission valid for `valid_for` from now.
    pub fn new(name: impl Into<String>, params: TaskParams, valid_for: Duration) -> Self {
        let now = Utc::now();
        let valid_for = chrono::Duration::from_std(valid_for).unwrap_or(chrono::Duration::MAX);
        Self {
            id: TaskId::new(),
            name: name.into(),
            params,
            created_at: now,
            valid_until: now.checked_add_signed(valid_for).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.valid_until
    }

    /// Time left before the submission expires, `None` once expired.
    pub fn remaining(&self) -> Option<Duration> {
        (self.valid_until - Utc::now())
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
    }
}
