//! anchord: runs long-lived background work on behalf of accounts.
//!
//! The node tracks every unit of work as a durable [`jobs::Job`], races it
//! against cancellation, and notifies external systems when it completes.
//! Generic background tasks that need no per-account tracking go through the
//! [`task_queue`] server instead.
//!
//! ## Component Overview
//!
//! - `jobs`: job model and the [`jobs::Manager`]
//! - `database`: SQLite pool, migrations and job repositories
//! - `notification`: completion messages and the webhook sender
//! - `node`: server lifecycle and startup error propagation
//! - `tasks`: built-in queue task types
//! - `config`, `logging`, `shutdown`: process plumbing

pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod node;
pub mod notification;
pub mod shutdown;
pub mod tasks;

pub use error::{Error, Result};
