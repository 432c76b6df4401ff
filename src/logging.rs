//! Structured logging init (§10.3). Follows the `main.rs::init_logging`
//! shape (`fmt().with_env_filter(..).with_target(false).compact()`), extended
//! with an optional non-blocking file sink for `LOG_FILE` — the original
//! Python worker's rotating file handler (`src/utils/logger.py`) generalized
//! to the `tracing_appender` equivalent.

use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Must be held for the lifetime of the process if `LOG_FILE` is set; the
/// non-blocking writer stops flushing once its guard drops.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr).compact();

    match &config.log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("launcher.log"));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_target(false).with_ansi(false).with_writer(non_blocking);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr_layer).init();
            None
        }
    }
}
