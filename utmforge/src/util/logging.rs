//! Tracing setup for build hosts.

use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};

pub const LOG_FILE_NAME: &str = "utmforge.log";

/// Initialize tracing with file logging.
///
/// Logs are written to `{logs_dir}/utmforge.log` with daily rotation. The
/// filter comes from `RUST_LOG` and defaults to `info`.
///
/// Returns the `WorkerGuard` that must be kept alive to flush the background
/// writer.
pub fn init_logging(logs_dir: &Path) -> UtmforgeResult<WorkerGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        UtmforgeError::Storage(format!(
            "failed to create logs directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    register_to_tracing(non_blocking, default_env_filter());
    Ok(guard)
}

/// `RUST_LOG`, or `info` when unset or invalid.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a global subscriber writing plain text to `non_blocking`.
///
/// A no-op when a global subscriber is already set.
pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}
