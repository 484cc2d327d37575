//! Node configuration.
//!
//! Every setting has a default; `NodeConfig::from_env` overrides them from
//! environment variables. Malformed values are rejected rather than silently
//! replaced by the default.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use task_queue::QueueConfig;

use crate::notification::WebhookConfig;
use crate::{Error, Result};

/// Default database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:anchord.db?mode=rwc";

/// Job manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Validity window for tasks started on behalf of a job.
    pub task_valid_duration: Duration,
    /// Sleep between status checks in `wait_for_job`.
    pub wait_poll_interval: Duration,
    /// Upper bound on a single completion notification.
    pub notification_timeout: Duration,
    /// Notifications allowed in flight at once; further ones wait for a slot.
    pub max_inflight_notifications: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            task_valid_duration: Duration::from_secs(3600),
            wait_poll_interval: Duration::from_millis(10),
            notification_timeout: Duration::from_secs(30),
            max_inflight_notifications: 64,
        }
    }
}

/// Everything the `anchord` binary needs to boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub database_url: String,
    /// Directory for rolling log files; console only when unset.
    pub log_dir: Option<String>,
    pub jobs: JobsConfig,
    pub queue: QueueConfig,
    pub webhook: WebhookConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: None,
            jobs: JobsConfig::default(),
            queue: QueueConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }
        config.log_dir = get("LOG_DIR");

        if let Some(v) = get("QUEUE_NUM_WORKERS") {
            config.queue.num_workers = parse_number("QUEUE_NUM_WORKERS", &v)?;
        }
        if let Some(v) = get("QUEUE_WORKER_WAIT_MS") {
            config.queue.worker_wait_time_ms = parse_number("QUEUE_WORKER_WAIT_MS", &v)?;
        }
        if let Some(v) = get("TASK_VALID_DURATION") {
            let validity = parse_duration(&v)?;
            // One validity window for both the queue and job-level tasks.
            config.queue.task_valid_duration = validity;
            config.jobs.task_valid_duration = validity;
        }
        if let Some(v) = get("JOB_WAIT_POLL_INTERVAL") {
            config.jobs.wait_poll_interval = parse_duration(&v)?;
        }
        if let Some(v) = get("NOTIFICATION_TIMEOUT") {
            config.jobs.notification_timeout = parse_duration(&v)?;
        }
        if let Some(url) = get("WEBHOOK_URL") {
            config.webhook.url = url;
        }
        if let Some(v) = get("WEBHOOK_TIMEOUT_SECS") {
            config.webhook.timeout_secs = parse_number("WEBHOOK_TIMEOUT_SECS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(Error::config("database_url must not be empty"));
        }
        if self.jobs.wait_poll_interval.is_zero() {
            return Err(Error::config("wait_poll_interval must be greater than zero"));
        }
        if self.jobs.max_inflight_notifications == 0 {
            return Err(Error::config(
                "max_inflight_notifications must be greater than zero",
            ));
        }
        self.queue
            .validate()
            .map_err(|e| Error::config(e.to_string()))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::validation(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

/// Parse a duration written as `<n>ms`, `<n>s`, `<n>m` or `<n>h`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| Error::validation(format!("invalid duration '{}'", value)))?;

    let duration = match unit {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        "h" => Duration::from_secs(amount.saturating_mul(3600)),
        _ => {
            return Err(Error::validation(format!(
                "invalid duration '{}': expected a unit of ms, s, m or h",
                value
            )));
        }
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10ms").unwrap(), Duration::from_millis(10));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration(" 1h ").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_rejects_malformed() {
        for bad in ["", "10", "ms", "1.5s", "-1s", "10d", "s10"] {
            assert!(
                matches!(parse_duration(bad), Err(Error::Validation(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_defaults_without_env() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert!(config.log_dir.is_none());
        assert_eq!(config.jobs, JobsConfig::default());
        assert_eq!(config.queue, QueueConfig::default());
        assert!(config.webhook.url.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("LOG_DIR", "/var/log/anchord"),
            ("QUEUE_NUM_WORKERS", "8"),
            ("QUEUE_WORKER_WAIT_MS", "250"),
            ("TASK_VALID_DURATION", "5m"),
            ("JOB_WAIT_POLL_INTERVAL", "50ms"),
            ("NOTIFICATION_TIMEOUT", "5s"),
            ("WEBHOOK_URL", "http://localhost:9000/hook"),
            ("WEBHOOK_TIMEOUT_SECS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.log_dir.as_deref(), Some("/var/log/anchord"));
        assert_eq!(config.queue.num_workers, 8);
        assert_eq!(config.queue.worker_wait_time_ms, 250);
        assert_eq!(config.queue.task_valid_duration, Duration::from_secs(300));
        assert_eq!(config.jobs.task_valid_duration, Duration::from_secs(300));
        assert_eq!(config.jobs.wait_poll_interval, Duration::from_millis(50));
        assert_eq!(config.jobs.notification_timeout, Duration::from_secs(5));
        assert_eq!(config.webhook.url, "http://localhost:9000/hook");
        assert_eq!(config.webhook.timeout_secs, 3);
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(matches!(
            NodeConfig::from_lookup(lookup(&[("TASK_VALID_DURATION", "soon")])),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            NodeConfig::from_lookup(lookup(&[("QUEUE_NUM_WORKERS", "-2")])),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            NodeConfig::from_lookup(lookup(&[("QUEUE_NUM_WORKERS", "0")])),
            Err(Error::Configuration(_))
        ));
    }
}
