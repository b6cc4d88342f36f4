//! File and console logging
//!
//! Writes logs under a caller-chosen directory, split by log type:
//! - `<dir>/main` - every event, JSON lines
//! - `<dir>/error` - WARN and ERROR only
//! - `<dir>/ws` - transport events (target `ws`)
//!
//! The transport itself only emits `tracing` events; installing a
//! subscriber is left to the application.

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target used by every transport event
pub const WS_TARGET: &str = "ws";

/// Initialize console plus rolling file logging under `dir`
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Returned guards
/// flush the background writers and must be kept alive for the program's
/// lifetime.
pub fn init_logging(dir: impl AsRef<Path>) -> io::Result<Vec<WorkerGuard>> {
    let dir = dir.as_ref();
    for log_type in ["main", "error", WS_TARGET] {
        fs::create_dir_all(dir.join(log_type))?;
    }

    let (main_appender, main_guard) = create_appender(dir, "main");
    let (error_appender, error_guard) = create_appender(dir, "error");
    let (ws_appender, ws_guard) = create_appender(dir, WS_TARGET);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let ws_layer = tracing_subscriber::fmt::layer()
        .with_writer(ws_appender)
        .with_ansi(false)
        .with_target(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() == WS_TARGET
        }));

    let console_layer = tracing_subscriber::fmt::layer().with_target(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(main_layer)
        .with(error_layer)
        .with(ws_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    tracing::info!(dir = %dir.display(), "Logging initialized");

    Ok(vec![main_guard, error_guard, ws_guard])
}

/// Create a daily rolling, non-blocking file appender
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir.join(name), name);
    tracing_appender::non_blocking(appender)
}

/// Emit a transport event under the `ws` target
#[macro_export]
macro_rules! log_ws {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "ws", $level, $($arg)+)
    };
}
