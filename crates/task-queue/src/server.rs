//! The queue server: task type registry plus broker, backend and workers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{InMemoryBackend, ResultBackend};
use crate::broker::{Broker, InMemoryBroker};
use crate::config::QueueConfig;
use crate::params::TaskParams;
use crate::result::TaskResult;
use crate::task::{TaskSignature, TaskType};
use crate::worker_pool::{TaskRegistry, WorkerPool};
use crate::{QueueError, Result};

/// Anything that can accept named task submissions.
#[async_trait]
pub trait TaskQueuer: Send + Sync {
    /// Submit `task_name` with `params`, returning a handle on its outcome.
    async fn enqueue_job(&self, task_name: &str, params: TaskParams) -> Result<TaskResult>;
}

/// Everything that exists only while the server is running.
struct Runtime {
    broker: Arc<dyn Broker>,
    backend: Arc<dyn ResultBackend>,
    pool: WorkerPool,
    registry: Arc<TaskRegistry>,
}

#[derive(Default)]
struct ServerState {
    task_types: Vec<(String, Arc<dyn TaskType>)>,
    runtime: Option<Runtime>,
    started: bool,
}

/// Background task execution independent of job tracking.
///
/// Task types are registered up front, [`QueueServer::start`] brings up the
/// broker and worker pool and holds them until its cancellation token fires.
/// A single lock guards the registry and runtime: enqueues share it, while
/// registration and lifecycle transitions take it exclusively.
pub struct QueueServer {
    config: QueueConfig,
    state: RwLock<ServerState>,
}

impl QueueServer {
    pub const NAME: &'static str = "QueueServer";

    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ServerState::default()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Register a task type under `name`. Only allowed before start.
    ///
    /// `name` must match [`TaskType::name`] so submissions and logs agree on
    /// what a task is called.
    pub async fn register_task_type(
        &self,
        name: impl Into<String>,
        task: Arc<dyn TaskType>,
    ) -> Result<()> {
        let name = name.into();
        let mut state = self.state.write().await;
        if state.started {
            return Err(QueueError::AlreadyStarted);
        }
        if task.name() != name {
            return Err(QueueError::validation(format!(
                "task type '{}' cannot be registered as '{}'",
                task.name(),
                name
            )));
        }
        debug!(task = %name, "Registered task type");
        state.task_types.push((name, task));
        Ok(())
    }

    /// Run the server until `cancel` fires.
    ///
    /// Startup failures are reported on `startup_err` and the call returns
    /// immediately. A server can only be started once.
    pub async fn start(&self, cancel: CancellationToken, startup_err: mpsc::Sender<QueueError>) {
        {
            let mut state = self.state.write().await;
            if state.started {
                let _ = startup_err.send(QueueError::AlreadyStarted).await;
                return;
            }
            if let Err(e) = self.config.validate() {
                error!("Queue server configuration rejected: {}", e);
                let _ = startup_err.send(e).await;
                return;
            }

            let mut registry: TaskRegistry = HashMap::with_capacity(state.task_types.len());
            for (name, task) in &state.task_types {
                if registry.insert(name.clone(), task.clone()).is_some() {
                    warn!(task = %name, "Task type registered twice, keeping the latest");
                }
            }
            let registry = Arc::new(registry);

            let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
            let backend: Arc<dyn ResultBackend> = Arc::new(InMemoryBackend::new());
            let pool = WorkerPool::new(self.config.num_workers, self.config.worker_wait_time());
            pool.start(broker.clone(), backend.clone(), registry.clone());

            state.runtime = Some(Runtime {
                broker,
                backend,
                pool,
                registry,
            });
            state.started = true;
        }

        info!("Queue server started");
        cancel.cancelled().await;

        let runtime = self.state.write().await.runtime.take();
        if let Some(runtime) = runtime {
            runtime.pool.stop().await;
            let closed = close_pending(runtime.broker.as_ref(), runtime.backend.as_ref()).await;
            if closed > 0 {
                info!("Closed {} queued tasks that never ran", closed);
            }
        }
        info!("Queue server stopped");
    }

    /// Whether the broker and workers are currently up.
    pub async fn is_running(&self) -> bool {
        self.state.read().await.runtime.is_some()
    }

    /// Submit a registered task type for execution.
    pub async fn enqueue_job(&self, task_name: &str, params: TaskParams) -> Result<TaskResult> {
        let state = self.state.read().await;
        let runtime = state.runtime.as_ref().ok_or(QueueError::NotInitialised)?;

        if !runtime.registry.contains_key(task_name) {
            return Err(QueueError::UnknownTask(task_name.to_string()));
        }

        let signature = TaskSignature::new(task_name, params, self.config.task_valid_duration);
        let task_id = signature.id.clone();
        runtime.broker.send_task(signature).await?;
        debug!(task = task_name, task_id = %task_id, "Enqueued task");

        Ok(TaskResult::new(task_id, runtime.backend.clone()))
    }
}

/// Fail every submission still waiting in `broker` with [`QueueError::Closed`].
///
/// Only called once the workers are gone, so nothing else takes from the
/// broker concurrently.
async fn close_pending(broker: &dyn Broker, backend: &dyn ResultBackend) -> usize {
    let mut closed = 0;
    loop {
        let signature = match broker.next_task().await {
            Ok(Some(signature)) => signature,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to drain broker on shutdown: {}", e);
                break;
            }
        };
        if let Err(e) = backend.set_result(&signature.id, Err(QueueError::Closed)).await {
            warn!(task_id = %signature.id, "Failed to close queued task: {}", e);
        }
        closed += 1;
    }
    closed
}

#[async_trait]
impl TaskQueuer for QueueServer {
    async fn enqueue_job(&self, task_name: &str, params: TaskParams) -> Result<TaskResult> {
        QueueServer::enqueue_job(self, task_name, params).await
    }
}

impl std::fmt::Debug for QueueServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
