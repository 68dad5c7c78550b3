//! Logging setup for the `spec-metrics` binary.
//!
//! Events go to stderr and to a daily file under `~/.spec-metrics/logs/`.
//! stdout carries protocol output only, so nothing here ever writes to it.
//!
//! `RUST_LOG` controls the filter; `SPEC_METRICS_DEBUG_LOG=1` forces `debug`.

use std::env;

use fs_err as fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use spec_metrics_core::config::app_dir;

const LOG_FILE_PREFIX: &str = "spec-metrics.log";

/// Installs the global subscriber. Hold the returned guard until exit so the
/// file writer flushes.
pub fn init() -> Option<WorkerGuard> {
    let filter = if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match file_writer() {
        Some((writer, guard)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}

fn debug_enabled() -> bool {
    env::var("SPEC_METRICS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn file_writer() -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = app_dir()?.join("logs");
    // Logging is best effort; without a writable home we keep stderr only.
    fs::create_dir_all(&dir).ok()?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}
