// File: manager/src/logging.rs
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::artifact::format_timestamp;

/// Used when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVES: &str = "backup_manager=info,sqlx=warn,reqwest=warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Path of the per-run log file for `operation`
pub fn run_log_path(logs_dir: &Path, operation: &str) -> PathBuf {
    logs_dir.join(format!("{}_{}.log", operation, format_timestamp(Utc::now())))
}

/// Console logging plus, when `logs_dir` is given, an append-only log file
/// for this run. Returns the log file path.
pub fn init(logs_dir: Option<&Path>, operation: &str) -> Result<Option<PathBuf>> {
    let console = fmt::layer().with_target(false);

    let Some(logs_dir) = logs_dir else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(console)
            .try_init()
            .context("Failed to initialize logging")?;
        return Ok(None);
    };

    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create log directory {}", logs_dir.display()))?;
    let path = run_log_path(logs_dir, operation);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(Some(path))
}
