// File: manager/src/config/mod.rs
pub mod environment;
pub mod manager;
pub mod secrets;

use chrono::{Duration, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::artifact::Tier;
use crate::constants::{defaults, environment as env_limits, integrity, layout, retention};

pub use environment::{validate_environment, EnvironmentReport};
pub use manager::ConfigManager;
pub use secrets::{Secret, SecretsLoader};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub retention: RetentionPolicy,
    /// gzip level, 1-9
    pub compression_level: u32,
    /// Worker count handed to pg_dump / pg_restore
    pub parallel_jobs: u32,
    /// IANA zone used for the calendar date that decides an artifact's tier
    pub timezone: String,
    pub last_day_of_week: String,
    pub stale_after_hours: i64,
    pub min_free_space_bytes: u64,
    /// Separate secrets file; defaults to `secrets.toml` next to the config file
    pub secrets_file: Option<PathBuf>,
    pub tools: ToolsConfig,
    pub encryption: EncryptionConfig,
    pub remote: RemoteConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    /// Production database; empty means unresolved
    pub name: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret>,
    /// Database the SQL channel connects to for DDL
    pub maintenance_database: String,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backup_dir: PathBuf,
    pub prefix: String,
}

/// Retention windows per tier; immutable for the duration of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub daily_days: u32,
    pub weekly_weeks: u32,
    pub monthly_months: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub pg_dump: String,
    pub pg_restore: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Secret>,
    pub gpg_binary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub bucket: Option<String>,
    pub prefix: String,
    pub endpoint_url: Option<String>,
    pub aws_binary: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub email_to: Option<String>,
    pub sendmail_binary: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            retention: RetentionPolicy::default(),
            compression_level: defaults::COMPRESSION_LEVEL,
            parallel_jobs: defaults::PARALLEL_JOBS,
            timezone: defaults::TIMEZONE.to_string(),
            last_day_of_week: defaults::LAST_DAY_OF_WEEK.to_string(),
            stale_after_hours: integrity::DEFAULT_STALE_AFTER_HOURS,
            min_free_space_bytes: env_limits::MIN_FREE_SPACE_BYTES,
            secrets_file: None,
            tools: ToolsConfig::default(),
            encryption: EncryptionConfig::default(),
            remote: RemoteConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: defaults::DB_HOST.to_string(),
            port: defaults::DB_PORT,
            name: String::new(),
            user: defaults::DB_USER.to_string(),
            password: None,
            maintenance_database: defaults::MAINTENANCE_DATABASE.to_string(),
            connect_timeout_seconds: defaults::CONNECT_TIMEOUT_SECONDS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(defaults::BACKUP_DIR),
            prefix: defaults::BACKUP_PREFIX.to_string(),
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily_days: defaults::RETENTION_DAILY_DAYS,
            weekly_weeks: defaults::RETENTION_WEEKLY_WEEKS,
            monthly_months: defaults::RETENTION_MONTHLY_MONTHS,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pg_dump: defaults::PG_DUMP_BINARY.to_string(),
            pg_restore: defaults::PG_RESTORE_BINARY.to_string(),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key: None,
            gpg_binary: defaults::GPG_BINARY.to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: defaults::REMOTE_PREFIX.to_string(),
            endpoint_url: None,
            aws_binary: defaults::AWS_BINARY.to_string(),
        }
    }
}

impl RetentionPolicy {
    /// Maximum age an artifact of `tier` may reach before it is pruned
    pub fn window(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Daily => Duration::days(i64::from(self.daily_days)),
            Tier::Weekly => Duration::weeks(i64::from(self.weekly_weeks)),
            Tier::Monthly => {
                Duration::days(i64::from(self.monthly_months) * retention::DAYS_PER_MONTH)
            }
        }
    }
}

impl NotificationConfig {
    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some() || self.slack_webhook_url.is_some() || self.email_to.is_some()
    }
}

impl Config {
    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.storage.backup_dir.join(tier.dir_name())
    }

    pub fn pre_restore_dir(&self) -> PathBuf {
        self.storage.backup_dir.join(layout::PRE_RESTORE_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.storage.backup_dir.join(layout::STAGING_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.storage.backup_dir.join(layout::LOGS_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.storage.backup_dir.join(layout::REPORTS_DIR)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.storage.backup_dir.join(layout::LOCKS_DIR)
    }

    pub fn pins_dir(&self) -> PathBuf {
        self.storage.backup_dir.join(layout::PINS_DIR)
    }

    /// Every directory the manager writes into
    pub fn layout_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Tier::ALL.iter().map(|tier| self.tier_dir(*tier)).collect();
        dirs.extend([
            self.pre_restore_dir(),
            self.staging_dir(),
            self.logs_dir(),
            self.reports_dir(),
            self.locks_dir(),
            self.pins_dir(),
        ]);
        dirs
    }

    /// Calendar timezone; validated at load time
    pub fn calendar_timezone(&self) -> Tz {
        self.timezone.parse::<Tz>().unwrap_or(Tz::UTC)
    }

    /// Weekday that marks an artifact as weekly; validated at load time
    pub fn week_end(&self) -> Weekday {
        self.last_day_of_week.parse::<Weekday>().unwrap_or(Weekday::Sun)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::hours(self.stale_after_hours)
    }
}
