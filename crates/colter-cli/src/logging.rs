//! Tracing setup: console on stderr plus a daily rolling log file.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Rotated log files kept on disk
const MAX_LOG_FILES: usize = 5;

/// The file always records the full run at this level
const FILE_FILTER: &str = "info,colter_core=debug,colter=debug";

/// Console filter: `RUST_LOG` wins, otherwise warnings (debug with `-v`)
fn console_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "warn" })
    })
}

/// Install the global subscriber. Keep the returned guard alive for the
/// whole of `main` so buffered file output is flushed on exit.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("colter")
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)
        .context("Failed to create log file")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(verbose)
                .with_filter(console_filter(verbose)),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(EnvFilter::new(FILE_FILTER)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
