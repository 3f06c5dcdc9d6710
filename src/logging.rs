//! File-based tracing. The TUI owns the terminal, so nothing is logged to stderr.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive (e.g. `aiterm=debug`).
pub const LOG_ENV: &str = "AITERM_LOG";

pub fn log_path() -> PathBuf {
    crate::config::data_dir().join("aiterm.log")
}

/// Filter from `AITERM_LOG`, else `debug` when verbose, else `warn`.
fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }))
}

/// Install the global subscriber, appending to the log file.
pub fn init(verbose: bool) -> Result<PathBuf> {
    let path = log_path();
    let file = open_log(&path)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(path)
}

fn open_log(path: &Path) -> Result<fs::File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}
