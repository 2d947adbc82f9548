//! Logging initialization for the worker host
//!
//! Supports JSON or human-readable formats, an optional daily-rotated log
//! file, and `RUST_LOG` overrides.

use std::ffi::OsStr;
use std::path::Path;

use ferrum_jobs::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Guard for the non-blocking file writer.
/// Must be kept alive for the duration of the program.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(env_filter);

    let file_guard = match &config.file_path {
        Some(path) => {
            let path = Path::new(path);
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| OsStr::new("worker.log"));
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            if config.json {
                registry.with(fmt::layer().json().with_writer(writer)).init();
            } else {
                registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .init();
            }
            Some(guard)
        }
        None => {
            if config.json {
                registry.with(fmt::layer().json()).init();
            } else {
                registry.with(fmt::layer()).init();
            }
            None
        }
    };

    tracing::info!(level = %config.level, json = config.json, "Logging initialized");

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
