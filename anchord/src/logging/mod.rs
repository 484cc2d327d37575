//! Logging setup with a reloadable filter.
//!
//! Console output always; a daily-rolling file when a log directory is
//! configured. Timestamps use the local timezone.

use std::path::PathBuf;

use chrono::Local;
#[cfg(unix)]
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "anchord=info,task_queue=info,sqlx=warn";

/// Variable holding the filter directive, in `.env` or the environment.
const FILTER_ENV: &str = "RUST_LOG";

/// Prefix of rolling log file names.
const LOG_FILE_PREFIX: &str = "anchord.log";

/// Timer formatting timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// How logging should be set up.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for rolling log files; console only when unset.
    pub log_dir: Option<PathBuf>,
    /// Filter directive, falling back to `RUST_LOG` and then
    /// [`DEFAULT_LOG_FILTER`].
    pub filter: Option<String>,
    /// Emit JSON lines on the console instead of text.
    pub json: bool,
}

/// Live logging state. Keep it alive for the lifetime of the process, the
/// file writer stops flushing once it is dropped.
pub struct LoggingHandle {
    handle: FilterHandle,
    _guard: Option<WorkerGuard>,
}

impl LoggingHandle {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the filter directive.
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        apply_filter(&self.handle, directive)
    }

    /// Re-read `RUST_LOG` on every SIGHUP until `cancel` fires.
    ///
    /// The `.env` file is consulted first so operators can change the
    /// level of a running node without restarting it. An invalid directive
    /// is logged and the current filter stays in place.
    #[cfg(unix)]
    pub fn reload_on_hangup(&self, cancel: CancellationToken) -> Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = signal(SignalKind::hangup())?;
        let handle = self.handle.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = hangup.recv() => {
                        if received.is_none() {
                            break;
                        }
                        let directive =
                            configured_directive(dotenv_directive(), std::env::var(FILTER_ENV).ok());
                        if let Err(e) = apply_filter(&handle, &directive) {
                            warn!("Keeping current log filter: {}", e);
                        }
                    }
                }
            }
        });
        Ok(())
    }
}

fn apply_filter(handle: &FilterHandle, directive: &str) -> Result<()> {
    let new_filter = parse_filter(directive)?;
    handle
        .reload(new_filter)
        .map_err(|e| Error::Other(format!("Failed to reload filter: {}", e)))?;

    info!(directive = %directive, "Log filter updated");
    Ok(())
}

/// `RUST_LOG` as written in the `.env` file, if there is one.
fn dotenv_directive() -> Option<String> {
    dotenvy::dotenv_iter()
        .ok()?
        .filter_map(|item| item.ok())
        .find(|(key, _)| key == FILTER_ENV)
        .map(|(_, value)| value)
}

/// Pick the filter to apply: `.env` wins over the process environment,
/// then the built-in default.
fn configured_directive(from_file: Option<String>, from_env: Option<String>) -> String {
    from_file
        .or(from_env)
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| Error::config(format!("Invalid filter directive: {}", e)))
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingHandle> {
    let initial_filter = match &config.filter {
        Some(directive) => parse_filter(directive)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = config
        .json
        .then(|| fmt::layer().json().with_timer(LocalTimer));
    let text_layer = (!config.json).then(|| fmt::layer().with_ansi(true).with_timer(LocalTimer));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(LoggingHandle {
        handle: filter_handle,
        _guard: guard,
    })
}
