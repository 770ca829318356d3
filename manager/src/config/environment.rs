//! Pre-flight readiness checks run before any backup or restore touches disk
//! or the database.

use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::Config;
use crate::errors::EnvironmentError;

const PROBE_FILE: &str = ".write_probe";

/// What the environment supports for this run
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentReport {
    pub encryption_enabled: bool,
    pub remote_enabled: bool,
    pub notifications_enabled: bool,
    pub available_bytes: u64,
    pub warnings: Vec<String>,
}

/// Create the backup layout, prove it is writable, check free space in the
/// staging area and locate the external tools.
///
/// `required_tools` are the engine's primitives; missing any of them is fatal.
/// `gpg` is required once a key is configured; a missing `aws` only disables
/// offsite copies.
pub fn validate_environment(
    config: &Config,
    required_tools: &[String],
) -> Result<EnvironmentReport, EnvironmentError> {
    let mut warnings = Vec::new();

    for dir in config.layout_dirs() {
        fs::create_dir_all(&dir).map_err(|e| EnvironmentError::DirectoryNotWritable {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        probe_writable(&dir)?;
    }
    info!(
        "✓ Backup layout ready under {}",
        config.storage.backup_dir.display()
    );

    for tool in required_tools {
        if which::which(tool).is_err() {
            return Err(EnvironmentError::ToolMissing { tool: tool.clone() });
        }
    }

    let staging = config.staging_dir();
    let available_bytes =
        fs2::available_space(&staging).map_err(|e| EnvironmentError::DirectoryNotWritable {
            path: staging.clone(),
            reason: format!("cannot stat free space: {}", e),
        })?;
    if available_bytes < config.min_free_space_bytes {
        return Err(EnvironmentError::InsufficientSpace {
            path: staging,
            available: available_bytes,
            required: config.min_free_space_bytes,
        });
    }

    // A configured key must never silently produce plaintext artifacts
    let encryption_enabled = config.encryption.key.is_some();
    if encryption_enabled && which::which(&config.encryption.gpg_binary).is_err() {
        return Err(EnvironmentError::ToolMissing {
            tool: config.encryption.gpg_binary.clone(),
        });
    } else if !encryption_enabled {
        info!("No encryption key configured; encryption disabled");
    }

    let mut remote_enabled = config.remote.bucket.is_some();
    if remote_enabled && which::which(&config.remote.aws_binary).is_err() {
        let message = format!(
            "remote bucket configured but '{}' not found; offsite copies disabled",
            config.remote.aws_binary
        );
        warn!("{}", message);
        warnings.push(message);
        remote_enabled = false;
    }

    let notifications_enabled = config.notifications.is_configured();
    if !notifications_enabled {
        warn!("No notification channel configured; outcomes will only be logged");
    }

    info!(
        "✓ Environment validated ({} MiB free in staging)",
        available_bytes / (1024 * 1024)
    );

    Ok(EnvironmentReport {
        encryption_enabled,
        remote_enabled,
        notifications_enabled,
        available_bytes,
        warnings,
    })
}

fn probe_writable(dir: &Path) -> Result<(), EnvironmentError> {
    let probe = dir.join(PROBE_FILE);
    fs::write(&probe, b"probe")
        .and_then(|_| fs::remove_file(&probe))
        .map_err(|e| EnvironmentError::DirectoryNotWritable {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })
}
