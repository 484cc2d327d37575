//! Worker pool pulling task submissions from a broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::QueueError;
use crate::backend::{ResultBackend, TaskOutcome};
use crate::broker::Broker;
use crate::task::{TaskSignature, TaskType};

/// Task types keyed by the name they are submitted under.
pub type TaskRegistry = HashMap<String, Arc<dyn TaskType>>;

/// A fixed-size pool of workers.
pub struct WorkerPool {
    /// Number of workers to spawn.
    num_workers: usize,
    /// How long an idle worker sleeps before polling the broker again.
    poll_interval: Duration,
    /// Workers currently running a task.
    active_workers: Arc<AtomicUsize>,
    /// Cancellation token.
    cancellation_token: CancellationToken,
    /// Task set for workers.
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(num_workers: usize, poll_interval: Duration) -> Self {
        Self {
            num_workers,
            poll_interval,
            active_workers: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers.
    pub fn start(
        &self,
        broker: Arc<dyn Broker>,
        backend: Arc<dyn ResultBackend>,
        registry: Arc<TaskRegistry>,
    ) {
        info!(
            "Starting queue worker pool with {} workers ({} task types)",
            self.num_workers,
            registry.len()
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Worker pool was already stopped, not starting workers");
            return;
        };

        for worker in 0..self.num_workers {
            join_set.spawn(worker_loop(
                worker,
                broker.clone(),
                backend.clone(),
                registry.clone(),
                self.cancellation_token.clone(),
                self.poll_interval,
                self.active_workers.clone(),
            ));
        }
    }

    /// Stop the worker pool and wait for every worker to exit.
    pub async fn stop(&self) {
        info!("Stopping queue worker pool");
        self.cancellation_token.cancel();

        // Take the join set out of the mutex before awaiting
        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while let Some(res) = join_set.join_next().await {
                if let Err(e) = res {
                    error!("Queue worker exited abnormally: {}", e);
                }
            }
        }

        info!("Queue worker pool stopped");
    }

    /// Number of workers currently running a task.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

async fn worker_loop(
    worker: usize,
    broker: Arc<dyn Broker>,
    backend: Arc<dyn ResultBackend>,
    registry: Arc<TaskRegistry>,
    cancellation_token: CancellationToken,
    poll_interval: Duration,
    active_workers: Arc<AtomicUsize>,
) {
    debug!(worker, "Queue worker started");
    let notifier = broker.notifier();

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            _ = notifier.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }

        // Drain whatever is waiting before going back to sleep.
        while !cancellation_token.is_cancelled() {
            let signature = match broker.next_task().await {
                Ok(Some(signature)) => signature,
                Ok(None) => break,
                Err(e) => {
                    error!(worker, "Error taking task from broker: {}", e);
                    break;
                }
            };

            let task_id = signature.id.clone();
            active_workers.fetch_add(1, Ordering::SeqCst);
            let outcome = execute(worker, &registry, signature).await;
            active_workers.fetch_sub(1, Ordering::SeqCst);

            if let Err(e) = backend.set_result(&task_id, outcome).await {
                warn!(worker, task_id = %task_id, "Failed to store task outcome: {}", e);
            }
        }
    }

    debug!(worker, "Queue worker shutting down");
}

/// Run one submission, bounded by what is left of its validity window.
async fn execute(worker: usize, registry: &TaskRegistry, signature: TaskSignature) -> TaskOutcome {
    let task_id = signature.id.to_string();

    let Some(task) = registry.get(&signature.name).cloned() else {
        warn!(
            worker,
            task_id = %task_id,
            "No task type registered for '{}'",
            signature.name
        );
        return Err(QueueError::UnknownTask(signature.name));
    };

    let Some(remaining) = signature.remaining() else {
        warn!(worker, task_id = %task_id, task = %signature.name, "Task expired before it was picked up");
        return Err(QueueError::Expired { task_id });
    };

    debug!(worker, task_id = %task_id, task = %signature.name, "Running task");
    let started = Instant::now();
    let params = signature.params;
    // Own task so a panicking implementation cannot take the worker down.
    let mut handle = tokio::spawn(async move { task.run(params).await });

    match tokio::time::timeout(remaining, &mut handle).await {
        Ok(Ok(Ok(value))) => {
            debug!(
                worker,
                task_id = %task_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Task completed"
            );
            Ok(value)
        }
        Ok(Ok(Err(e))) => {
            warn!(worker, task_id = %task_id, task = %signature.name, "Task failed: {}", e);
            Err(QueueError::task_failed(signature.name, e.to_string()))
        }
        Ok(Err(join_err)) => {
            error!(worker, task_id = %task_id, task = %signature.name, "Task panicked: {}", join_err);
            Err(QueueError::task_failed(signature.name, "task panicked"))
        }
        Err(_) => {
            handle.abort();
            warn!(worker, task_id = %task_id, task = %signature.name, "Task outlived its validity window");
            Err(QueueError::Expired { task_id })
        }
    }
}
