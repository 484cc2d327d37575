//! Retries for writes that lose the SQLite write lock.
//!
//! Every connection already waits up to its `busy_timeout` inside SQLite, so
//! a busy error that reaches us means the lock stayed contended for that
//! long. Job saves are small single-row upserts: a few quick retries absorb
//! a checkpoint or a burst of finalizers, anything longer is reported.

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use rand::random;
use tracing::debug;

use crate::{Error, Result};

/// Backoff schedule for busy retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyRetry {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// Schedule used for job record upserts.
pub const JOB_SAVE_RETRY: BusyRetry = BusyRetry {
    max_retries: 5,
    base_delay: Duration::from_millis(5),
    max_delay: Duration::from_millis(250),
};

impl BusyRetry {
    /// Delay before retry `attempt` (zero based): doubling from
    /// `base_delay`, plus up to a quarter of jitter, never above `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let doubled = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = doubled.min(self.max_delay);
        let jitter_range = capped.as_micros() as u64 / 4 + 1;
        let jitter = Duration::from_micros(random::<u64>() % jitter_range);
        (capped + jitter).min(self.max_delay)
    }

    /// Run `op`, retrying while SQLite reports the database busy or locked.
    pub async fn run<T, F, Fut>(&self, op_name: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= self.max_retries || !is_busy(&err) {
                return Err(err);
            }

            let delay = self.delay(attempt);
            attempt += 1;
            debug!(
                op = op_name,
                attempt,
                max_retries = self.max_retries,
                "Database busy, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), by code or by message.
fn is_busy(err: &Error) -> bool {
    let message = match err {
        Error::DatabaseSqlx(sqlx::Error::Database(db_err)) => {
            let code = db_err.code().map(Cow::into_owned);
            if matches!(code.as_deref(), Some("5" | "6")) {
                return true;
            }
            db_err.message().to_ascii_lowercase()
        }
        Error::DatabaseSqlx(other) => other.to_string().to_ascii_lowercase(),
        _ => return false,
    };
    message.contains("database is locked") || message.contains("database is busy")
}
