//! Queue error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors surfaced by the queue server, its workers and result handles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue hasn't been initialised")]
    NotInitialised,

    #[error("queue server already started")]
    AlreadyStarted,

    #[error("no task type registered under '{0}'")]
    UnknownTask(String),

    #[error("task {task_id} expired before it completed")]
    Expired { task_id: String },

    #[error("timed out after {timeout:?} waiting for task {task_id}")]
    Timeout { task_id: String, timeout: Duration },

    #[error("task {task} failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("queue closed")]
    Closed,
}

impl QueueError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn task_failed(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskFailed {
            task: task.into(),
            message: message.into(),
        }
    }
}
