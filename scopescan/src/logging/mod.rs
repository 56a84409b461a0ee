//! Logging setup with a reloadable filter and a non-blocking file writer.
//!
//! This module provides:
//! - Runtime log level changes via `tracing_subscriber::reload`
//! - Daily rolling log files written off the caller's thread
//! - Log file retention cleanup
//! - Local timezone timestamps for logs

use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "scopescan=info,sqlx=warn";

/// Log file name prefix inside the log directory.
const LOG_FILE_PREFIX: &str = "scopescan.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Custom timer that uses the local timezone via chrono.
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

/// Options for [`init_logging`].
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub log_dir: PathBuf,
    /// Filter used when `RUST_LOG` is not set.
    pub filter: String,
    /// Also write to stdout.
    pub console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            filter: DEFAULT_LOG_FILTER.to_string(),
            console: true,
        }
    }
}

/// Handle to the installed logging stack.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Set a new filter directive (e.g. `scopescan=debug,sqlx=warn`).
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Start the daily log retention cleanup task.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {
                        if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                            warn!(error = %e, "Failed to cleanup old logs");
                        }
                    }
                }
            }
        });
    }
}

/// Delete rolled log files older than the specified number of days.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();
    let prefix = format!("{LOG_FILE_PREFIX}.");

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        // scopescan.log.YYYY-MM-DD
        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(prefix.as_str()))
        else {
            continue;
        };

        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

/// Initialize logging.
///
/// Returns the [`LoggingConfig`] handle and the appender's [`WorkerGuard`];
/// keep the guard alive for the lifetime of the process or buffered lines are lost.
pub fn init_logging(options: &LoggingOptions) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    std::fs::create_dir_all(&options.log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&options.log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    let console_layer = options
        .console
        .then(|| fmt::layer().with_ansi(true).with_timer(LocalTimer));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_dir: options.log_dir.clone(),
    });

    Ok((config, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("scopescan=info"));
        assert!(DEFAULT_LOG_FILTER.contains("sqlx=warn"));
    }

    #[tokio::test]
    async fn test_cleanup_old_logs() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("scopescan.log.2000-01-01");
        let fresh_name = format!("scopescan.log.{}", Utc::now().format("%Y-%m-%d"));
        let fresh = dir.path().join(fresh_name);
        let unrelated = dir.path().join("other.txt");
        for path in [&old, &fresh, &unrelated] {
            std::fs::write(path, b"x").unwrap();
        }

        let deleted = cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
    }
}
