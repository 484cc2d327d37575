//! Task queue: named background tasks executed by a worker pool.
//!
//! This crate runs generic background work that is independent of any
//! per-account job tracking. Callers register [`TaskType`] implementations,
//! start the [`QueueServer`], then submit tasks by name and collect their
//! outcome through a [`TaskResult`] handle.
//!
//! ## Component Overview
//!
//! - `server`: registry, lifecycle and task submission
//! - `worker_pool`: fixed-size pool of workers pulling from the broker
//! - `broker`: transport between submission and execution
//! - `backend`: storage for task outcomes
//! - `params`: keyword-style parameter bags
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use serde_json::Value;
//! use task_queue::{QueueConfig, QueueServer, TaskError, TaskParams, TaskType};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Ping;
//!
//! #[async_trait]
//! impl TaskType for Ping {
//!     fn name(&self) -> &str {
//!         "ping"
//!     }
//!
//!     async fn run(&self, params: TaskParams) -> Result<Value, TaskError> {
//!         Ok(Value::from(params.get::<i64>("n")? + 1))
//!     }
//! }
//!
//! # async fn demo() -> task_queue::Result<()> {
//! let server = Arc::new(QueueServer::new(QueueConfig::default()));
//! server.register_task_type("ping", Arc::new(Ping)).await?;
//!
//! let cancel = CancellationToken::new();
//! let (err_tx, _err_rx) = mpsc::channel(1);
//! tokio::spawn({
//!     let server = server.clone();
//!     let cancel = cancel.clone();
//!     async move { server.start(cancel, err_tx).await }
//! });
//!
//! let result = server.enqueue_job("ping", TaskParams::new().with("n", 1)).await?;
//! let value = result.get(Duration::from_secs(5)).await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod broker;
pub mod config;
pub mod error;
pub mod params;
pub mod result;
pub mod server;
pub mod task;
pub mod worker_pool;

pub use backend::{InMemoryBackend, ResultBackend, TaskOutcome};
pub use broker::{Broker, InMemoryBroker};
pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use params::{TIMEOUT_PARAM, TaskParams};
pub use result::TaskResult;
pub use server::{QueueServer, TaskQueuer};
pub use task::{TaskError, TaskId, TaskSignature, TaskType};
pub use worker_pool::{TaskRegistry, WorkerPool};
