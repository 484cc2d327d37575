//! Queue server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{QueueError, Result};

/// Configuration for the queue server and its worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of background workers to spawn.
    pub num_workers: usize,
    /// How long an idle worker waits before polling the broker again.
    ///
    /// Raising this slows pickup of tasks that arrive without a wake-up;
    /// lowering it burns CPU on empty polls.
    pub worker_wait_time_ms: u64,
    /// How long a submitted task stays valid, measured from submission.
    pub task_valid_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            worker_wait_time_ms: 100,
            task_valid_duration: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    pub fn worker_wait_time(&self) -> Duration {
        Duration::from_millis(self.worker_wait_time_ms)
    }

    /// Reject configurations the worker pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(QueueError::validation(
                "num_workers must be greater than zero",
            ));
        }
        if self.task_valid_duration.is_zero() {
            return Err(QueueError::validation(
                "task_valid_duration must be greater than zero",
            ));
        }
        Ok(())
    }
}
