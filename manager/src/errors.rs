//! Error taxonomy for the backup manager
//!
//! Each pipeline stage owns an error type. Pre-flight errors (`ConfigError`,
//! `EnvironmentError`, `LockError`) abort before anything is touched;
//! `NotificationError` is only ever logged.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::restore::RestoreStatus;

/// Main error type for the backup manager
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Dump error: {0}")]
    Dump(#[from] DumpError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Restore error: {0}")]
    Restore(#[from] RestoreError),

    #[error("{0}")]
    Other(String),
}

/// Configuration error variants
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config from '{path}': {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Failed to parse config: {reason}")]
    ParseError { reason: String },
}

/// Pre-flight environment error variants
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Required tool '{tool}' not found in PATH")]
    ToolMissing { tool: String },

    #[error("Directory {} is not writable: {reason}", path.display())]
    DirectoryNotWritable { path: PathBuf, reason: String },

    #[error(
        "Insufficient free space in {}: {available} bytes available, {required} required",
        path.display()
    )]
    InsufficientSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },
}

/// Advisory run lock error variants
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Database '{database}' is busy: {holder}")]
    Busy { database: String, holder: String },

    #[error("Lock file {} unusable: {reason}", path.display())]
    Io { path: PathBuf, reason: String },
}

/// Failures of the database primitives (dump, restore, SQL channel)
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("SQL {operation} failed: {reason}")]
    Sql { operation: String, reason: String },

    #[error("Invalid database identifier '{name}'")]
    InvalidIdentifier { name: String },

    #[error("Database '{name}' does not exist")]
    UnknownDatabase { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Dump stage error variants
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("dump primitive failed: {0}")]
    Engine(#[from] EngineError),

    #[error("dump produced no output at {}", path.display())]
    MissingOutput { path: PathBuf },

    #[error("dump output at {} is empty", path.display())]
    EmptyOutput { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Compression / encryption stage error variants
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Compression of {} failed: {reason}", path.display())]
    Compression { path: PathBuf, reason: String },

    #[error("Decompression of {} failed: {reason}", path.display())]
    Decompression { path: PathBuf, reason: String },

    #[error("Encryption of {} failed: {reason}", path.display())]
    Encryption { path: PathBuf, reason: String },

    #[error("Decryption of {} failed: {reason}", path.display())]
    Decryption { path: PathBuf, reason: String },

    #[error("{} is encrypted but no encryption key is configured", path.display())]
    MissingKey { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Integrity error variants
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Artifact {} failed verification: {}", path.display(), failed_checks.join(", "))]
    VerificationFailed {
        path: PathBuf,
        failed_checks: Vec<String>,
    },

    #[error("No artifact matches '{reference}'")]
    NotFound { reference: String },

    #[error("'{reference}' is ambiguous: {}", candidates.join(", "))]
    Ambiguous {
        reference: String,
        candidates: Vec<String>,
    },

    #[error("Checksum of {} could not be written: {reason}", path.display())]
    ChecksumWrite { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Restore error variants
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Artifact rejected as restore source: {0}")]
    ArtifactRejected(#[from] IntegrityError),

    #[error("Restore target busy: {0}")]
    Lock(#[from] LockError),

    #[error("Invalid restore transition {from} -> {to}")]
    InvalidTransition { from: RestoreStatus, to: RestoreStatus },

    #[error("Refusing to swap '{database}' without a pre-restore snapshot")]
    SnapshotRequired { database: String },

    #[error("Operator declined the restore of '{database}'")]
    ConfirmationDeclined { database: String },

    #[error("Restore step '{step}' failed: {reason}")]
    StepFailed { step: RestoreStatus, reason: String },

    #[error(
        "Rollback of '{database}' failed ({reason}) after: {original}. \
         Production is in an undefined state; manual recovery required"
    )]
    RollbackFailed {
        database: String,
        reason: String,
        original: String,
    },

    #[error(
        "Restore of '{database}' failed after production was modified ({reason}) \
         and no rollback is possible; manual recovery required"
    )]
    ManualRecoveryRequired { database: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Notification delivery error variants (never propagated)
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("{channel} delivery failed: {reason}")]
    Delivery { channel: String, reason: String },

    #[error("{channel} returned HTTP {status}")]
    Status { channel: String, status: u16 },

    #[error("{channel} delivery timed out")]
    Timeout { channel: String },
}

// Conversions from anyhow::Error for CLI glue
impl From<anyhow::Error> for ManagerError {
    fn from(err: anyhow::Error) -> Self {
        ManagerError::Other(err.to_string())
    }
}

impl ManagerError {
    /// Pipeline step a failure belongs to, used for notifications and logs
    pub fn step(&self) -> &'static str {
        match self {
            ManagerError::Config(_) | ManagerError::Environment(_) | ManagerError::Lock(_) => {
                "preflight"
            }
            ManagerError::Dump(_) => "dump",
            ManagerError::Pipeline(_) => "seal",
            ManagerError::Integrity(_) => "verify",
            ManagerError::Restore(_) => "restore",
            ManagerError::Other(_) => "unknown",
        }
    }
}
