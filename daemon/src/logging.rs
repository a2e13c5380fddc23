//! Logging setup.
//!
//! Every task logs through `tracing`. The file layer goes through
//! `tracing_appender::non_blocking`, whose single worker owns the file handle,
//! so no task ever writes to it directly.
//!
//! - `<data-local-dir>/RunLights/logs/runlights.log`, truncated on each start
//! - stdout for anyone tailing a console
//! - `RUST_LOG` overrides the default filter

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "runlights.log";

/// Flushes and closes the log file when dropped. Keep it alive in `main`.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Default filter directive: `debug` when the config asks for it, else `info`.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Creates `log_dir`, truncates the previous log and installs the global subscriber.
pub fn init_logging(log_dir: &Path, log_file: &str, debug: bool) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard { _file_guard: file_guard })
}

/// Console-only logging on stderr, for the trigger CLI or when the log
/// directory cannot be prepared.
pub fn init_stderr_logging(default: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
