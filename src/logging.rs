//! Logging initialization for the CLI.
//!
//! Without a log file, human-readable lines go to stderr so they never mix
//! with results printed on stdout. With a log file, JSON lines are appended
//! through a non-blocking writer.

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Map the `-v` count to a level: 0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `verbosity`. The returned guard must be
/// kept alive until exit so buffered file output is flushed.
pub fn init(verbosity: u8, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let level = level_for(verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,version_resolve={level}")));

    let subscriber = tracing_subscriber::registry().with(filter);

    let file_writer = log_file.and_then(|path| {
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let file_name = path.file_name()?.to_str()?;
        std::fs::create_dir_all(dir).ok()?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(dir)
            .ok()?;
        Some(tracing_appender::non_blocking(appender))
    });

    match file_writer {
        Some((writer, guard)) => {
            let _ = subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(false)
                        .with_writer(writer),
                )
                .try_init();
            Some(guard)
        }
        None => {
            let _ = subscriber
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .try_init();
            None
        }
    }
}
