//! Result backends store task outcomes until the submitter collects them.

use std::pin::pin;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::Notify;

use crate::task::TaskId;
use crate::{QueueError, Result};

/// Outcome of one task execution.
pub type TaskOutcome = std::result::Result<Value, QueueError>;

/// Storage for task outcomes.
#[async_trait]
pub trait ResultBackend: Send + Sync {
    /// Record the outcome of a task.
    async fn set_result(&self, task_id: &TaskId, outcome: TaskOutcome) -> Result<()>;

    /// Wait until the outcome of a task is available.
    async fn wait_result(&self, task_id: &TaskId) -> TaskOutcome;

    /// Drop any stored outcome; the submitter is no longer interested.
    fn forget(&self, task_id: &TaskId);
}

/// What the in-memory backend holds for one task.
#[derive(Debug)]
enum Slot {
    /// Outcome waiting to be collected.
    Done(TaskOutcome),
    /// The handle was dropped before the outcome arrived.
    Abandoned,
}

/// Process-local result backend.
///
/// Each task id has at most one slot, and every transition goes through the
/// map's entry lock, so an outcome racing with a dropped handle leaves
/// nothing behind.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    slots: DashMap<TaskId, Slot>,
    notify: Notify,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of task ids the backend is holding state for.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl ResultBackend for InMemoryBackend {
    async fn set_result(&self, task_id: &TaskId, outcome: TaskOutcome) -> Result<()> {
        match self.slots.entry(task_id.clone()) {
            Entry::Occupied(entry) if matches!(entry.get(), Slot::Abandoned) => {
                entry.remove();
                return Ok(());
            }
            Entry::Occupied(mut entry) => {
                entry.insert(Slot::Done(outcome));
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot::Done(outcome));
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn wait_result(&self, task_id: &TaskId) -> TaskOutcome {
        loop {
            // Register interest before checking so a concurrent set_result
            // between the check and the await is not missed.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            if let Some(slot) = self.slots.get(task_id) {
                if let Slot::Done(outcome) = slot.value() {
                    return outcome.clone();
                }
            }

            notified.await;
        }
    }

    fn forget(&self, task_id: &TaskId) {
        match self.slots.entry(task_id.clone()) {
            Entry::Occupied(entry) => {
                if matches!(entry.get(), Slot::Done(_)) {
                    entry.remove();
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot::Abandoned);
            }
        }
    }
}
