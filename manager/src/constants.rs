//! Central repository for thresholds, defaults and on-disk layout names
//!
//! This module organizes constants by category to improve maintainability
//! and provide a single source of truth for limits, windows, and file names.

use std::time::Duration;

/// Integrity verification thresholds
pub mod integrity {
    /// Artifacts smaller than this are certainly corrupt
    pub const MIN_ARTIFACT_BYTES: u64 = 1024;

    /// Age after which an artifact triggers the (advisory) staleness warning
    pub const DEFAULT_STALE_AFTER_HOURS: i64 = 48;
}

/// Pre-flight environment requirements
pub mod environment {
    /// Hard free-space floor in the staging area (1 GiB)
    pub const MIN_FREE_SPACE_BYTES: u64 = 1024 * 1024 * 1024;
}

/// Retention windows for files outside the tiered policy
pub mod retention {
    /// Scratch files in the staging area are removed after this age
    pub const STAGING_MAX_AGE_HOURS: i64 = 24;

    /// Per-run log files are removed after this age
    pub const LOG_RETENTION_DAYS: i64 = 30;

    /// Month length used for monthly window arithmetic
    pub const DAYS_PER_MONTH: i64 = 30;
}

/// Default configuration values
pub mod defaults {
    pub const DB_HOST: &str = "localhost";
    pub const DB_PORT: u16 = 5432;
    pub const DB_USER: &str = "postgres";
    pub const MAINTENANCE_DATABASE: &str = "postgres";
    pub const CONNECT_TIMEOUT_SECONDS: u64 = 30;

    pub const BACKUP_DIR: &str = "/var/backups/postgres";
    pub const BACKUP_PREFIX: &str = "db_backup";

    pub const RETENTION_DAILY_DAYS: u32 = 7;
    pub const RETENTION_WEEKLY_WEEKS: u32 = 4;
    pub const RETENTION_MONTHLY_MONTHS: u32 = 6;

    pub const COMPRESSION_LEVEL: u32 = 6;
    pub const PARALLEL_JOBS: u32 = 2;

    pub const TIMEZONE: &str = "UTC";
    pub const LAST_DAY_OF_WEEK: &str = "sunday";

    pub const PG_DUMP_BINARY: &str = "pg_dump";
    pub const PG_RESTORE_BINARY: &str = "pg_restore";
    pub const GPG_BINARY: &str = "gpg";
    pub const AWS_BINARY: &str = "aws";
    pub const SENDMAIL_BINARY: &str = "sendmail";
    pub const REMOTE_PREFIX: &str = "postgres-backups";

    pub const CONFIG_PATH: &str = "config/backup.toml";
    pub const SECRETS_FILE: &str = "secrets.toml";
}

/// Notification delivery constants
pub mod notifications {
    use super::Duration;

    /// Per-channel delivery timeout
    pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Backup root layout and file naming
pub mod layout {
    pub const PRE_RESTORE_DIR: &str = "pre_restore";
    pub const STAGING_DIR: &str = "staging";
    pub const LOGS_DIR: &str = "logs";
    pub const REPORTS_DIR: &str = "reports";
    pub const LOCKS_DIR: &str = ".locks";
    pub const PINS_DIR: &str = ".pins";

    pub const PRE_RESTORE_PREFIX: &str = "pre_restore";
    pub const DUMP_SUFFIX: &str = ".dump";
    pub const GZIP_SUFFIX: &str = ".gz";
    pub const GPG_SUFFIX: &str = ".gpg";
    pub const CHECKSUM_SUFFIX: &str = ".sha256";
    pub const PARTIAL_SUFFIX: &str = ".partial";

    /// Timestamp embedded in artifact names; also the artifact id
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
    pub const TIMESTAMP_LEN: usize = 15;
}

/// Process exit codes for the ternary run outcome
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const SUCCESS_WITH_WARNINGS: i32 = 3;
}
