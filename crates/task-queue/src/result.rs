//! Handles returned to task submitters.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::backend::ResultBackend;
use crate::task::TaskId;
use crate::{QueueError, Result};

/// Handle on the eventual outcome of a submitted task.
///
/// Dropping the handle tells the backend the outcome is no longer wanted.
pub struct TaskResult {
    task_id: TaskId,
    backend: Arc<dyn ResultBackend>,
}

impl TaskResult {
    pub(crate) fn new(task_id: TaskId, backend: Arc<dyn ResultBackend>) -> Self {
        Self { task_id, backend }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Wait up to `timeout` for the task's outcome.
    pub async fn get(&self, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, self.backend.wait_result(&self.task_id)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(QueueError::Timeout {
                task_id: self.task_id.to_string(),
                timeout,
            }),
        }
    }
}

impl Drop for TaskResult {
    fn drop(&mut self) {
        self.backend.forget(&self.task_id);
    }
}

impl std::fmt::Debug for TaskResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskResult")
            .field("task_id", &self.task_id)
            .finish()
    }
}
