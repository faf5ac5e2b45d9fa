//! Logging and tracing configuration
//!
//! All diagnostics go through `tracing`. The subscriber is installed once
//! at the start of a run and the returned [`LogGuard`] flushes any buffered
//! file output when it is dropped at the end of the run.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer alive; dropping it flushes the log
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    file: Option<PathBuf>,
    _worker: Option<WorkerGuard>,
}

impl LogGuard {
    /// Path of the log file, if file logging is active
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("beacon_probe=info,warn"))
}

/// Initialize tracing for a run
///
/// Logs go to stderr in compact form. When `log_file` is given, the same
/// events are also appended to that file without ANSI colours.
/// Controlled by `RUST_LOG`; the default is INFO for this crate and WARN
/// for dependencies.
pub fn init(log_file: Option<&Path>) -> LogGuard {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    if let Some(path) = log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Warning: Could not create log directory: {}", e);
            }
        }

        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let (writer, worker) = tracing_appender::non_blocking(file);
                let file_layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_line_number(true);

                tracing_subscriber::registry()
                    .with(filter())
                    .with(stderr_layer)
                    .with(file_layer)
                    .init();

                return LogGuard {
                    file: Some(path.to_path_buf()),
                    _worker: Some(worker),
                };
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file: {}", e);
            }
        }
    }

    // Fallback: stderr only
    tracing_subscriber::registry()
        .with(filter())
        .with(stderr_layer)
        .init();

    LogGuard {
        file: None,
        _worker: None,
    }
}
