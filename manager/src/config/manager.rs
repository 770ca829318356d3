use super::{Config, Secret, SecretsLoader};
use crate::constants::defaults;
use crate::engine::validate_identifier;
use crate::errors::ConfigError;
use chrono::Weekday;
use chrono_tz::Tz;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Resolves the effective configuration: defaults, then the TOML config
/// file, then secrets.toml, then environment variables.
pub struct ConfigManager {
    current_config: Arc<Config>,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load using the process environment. An explicit `config_path` must
    /// exist; without one the default path is used when present.
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok()).await
    }

    pub async fn load_with_env<F>(config_path: Option<PathBuf>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = match config_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::LoadFailed {
                        path: path.display().to_string(),
                        reason: "file does not exist".to_string(),
                    });
                }
                Some(path)
            }
            None => {
                let default_path = PathBuf::from(defaults::CONFIG_PATH);
                default_path.exists().then_some(default_path)
            }
        };

        let config = Self::load_configuration(source.as_deref(), &env).await?;
        Ok(Self {
            current_config: Arc::new(config),
            source,
        })
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        validate(&config)?;
        Ok(Self {
            current_config: Arc::new(config),
            source: None,
        })
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    async fn load_configuration<F>(path: Option<&Path>, env: &F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                let content =
                    fs::read_to_string(path)
                        .await
                        .map_err(|e| ConfigError::LoadFailed {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        })?;
                debug!("Loading config file: {}", path.display());
                toml::from_str::<Config>(&content).map_err(|e| ConfigError::ParseError {
                    reason: format!("{}: {}", path.display(), e),
                })?
            }
            None => {
                debug!("No config file, starting from defaults");
                Config::default()
            }
        };

        let secrets_path = config.secrets_file.clone().or_else(|| {
            path.and_then(Path::parent)
                .map(|dir| dir.join(defaults::SECRETS_FILE))
        });
        if let Some(secrets_path) = secrets_path {
            let secrets = SecretsLoader::load(&secrets_path).map_err(|e| ConfigError::LoadFailed {
                path: secrets_path.display().to_string(),
                reason: e.to_string(),
            })?;
            if config.database.password.is_none() {
                config.database.password = secrets.database_password().cloned();
            }
            if config.encryption.key.is_none() {
                config.encryption.key = secrets.encryption_key().cloned();
            }
        }

        apply_env_overrides(&mut config, env)?;
        validate(&config)?;

        info!(
            "Configuration loaded: database '{}' on {}:{}, backups in {}, retention {}d/{}w/{}m",
            config.database.name,
            config.database.host,
            config.database.port,
            config.storage.backup_dir.display(),
            config.retention.daily_days,
            config.retention.weekly_weeks,
            config.retention.monthly_months
        );

        Ok(config)
    }
}

fn apply_env_overrides<F>(config: &mut Config, env: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let string = |key: &str| env(key).filter(|value| !value.trim().is_empty());

    if let Some(value) = string("DB_HOST") {
        config.database.host = value;
    }
    parse_into(env, "DB_PORT", &mut config.database.port)?;
    if let Some(value) = string("DB_NAME") {
        config.database.name = value;
    }
    if let Some(value) = string("DB_USER") {
        config.database.user = value;
    }
    if let Some(value) = string("DB_PASSWORD") {
        config.database.password = Some(Secret::new(value));
    }
    if let Some(value) = string("BACKUP_DIR") {
        config.storage.backup_dir = PathBuf::from(value);
    }
    if let Some(value) = string("BACKUP_PREFIX") {
        config.storage.prefix = value;
    }
    parse_into(env, "RETENTION_DAILY_DAYS", &mut config.retention.daily_days)?;
    parse_into(env, "RETENTION_WEEKLY_WEEKS", &mut config.retention.weekly_weeks)?;
    parse_into(env, "RETENTION_MONTHLY_MONTHS", &mut config.retention.monthly_months)?;
    parse_into(env, "COMPRESSION_LEVEL", &mut config.compression_level)?;
    parse_into(env, "PARALLEL_JOBS", &mut config.parallel_jobs)?;
    parse_into(env, "MIN_FREE_SPACE_BYTES", &mut config.min_free_space_bytes)?;
    if let Some(value) = string("BACKUP_ENCRYPTION_KEY") {
        config.encryption.key = Some(Secret::new(value));
    }
    if let Some(value) = string("BACKUP_TIMEZONE") {
        config.timezone = value;
    }
    if let Some(value) = string("S3_BUCKET") {
        config.remote.bucket = Some(value);
    }
    if let Some(value) = string("S3_PREFIX") {
        config.remote.prefix = value;
    }
    if let Some(value) = string("S3_ENDPOINT_URL") {
        config.remote.endpoint_url = Some(value);
    }
    if let Some(value) = string("NOTIFY_WEBHOOK_URL") {
        config.notifications.webhook_url = Some(value);
    }
    if let Some(value) = string("NOTIFY_SLACK_WEBHOOK_URL") {
        config.notifications.slack_webhook_url = Some(value);
    }
    if let Some(value) = string("NOTIFY_EMAIL_TO") {
        config.notifications.email_to = Some(value);
    }
    Ok(())
}

fn parse_into<F, T>(env: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = env(key).filter(|value| !value.trim().is_empty()) {
        *target = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            field: key.to_string(),
            reason: format!("'{}': {}", raw, e),
        })?;
    }
    Ok(())
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.database.name.trim().is_empty() {
        return Err(ConfigError::MissingRequired {
            field: "database.name (DB_NAME)".to_string(),
        });
    }
    validate_identifier(&config.database.name).map_err(|e| ConfigError::InvalidValue {
        field: "database.name".to_string(),
        reason: e.to_string(),
    })?;

    if !(1..=9).contains(&config.compression_level) {
        return Err(invalid(
            "compression_level",
            format!("{} is outside 1-9", config.compression_level),
        ));
    }
    if config.parallel_jobs == 0 {
        return Err(invalid("parallel_jobs", "must be at least 1"));
    }

    let retention = &config.retention;
    if retention.daily_days == 0 || retention.weekly_weeks == 0 || retention.monthly_months == 0 {
        return Err(invalid("retention", "every window must be at least 1"));
    }

    if config.timezone.parse::<Tz>().is_err() {
        return Err(invalid("timezone", format!("unknown zone '{}'", config.timezone)));
    }
    if config.last_day_of_week.parse::<Weekday>().is_err() {
        return Err(invalid(
            "last_day_of_week",
            format!("'{}' is not a weekday", config.last_day_of_week),
        ));
    }
    if config.stale_after_hours <= 0 {
        return Err(invalid("stale_after_hours", "must be positive"));
    }

    if config.storage.backup_dir.as_os_str().is_empty() {
        return Err(ConfigError::MissingRequired {
            field: "storage.backup_dir (BACKUP_DIR)".to_string(),
        });
    }
    let prefix = &config.storage.prefix;
    if prefix.is_empty()
        || !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid(
            "storage.prefix",
            "must be non-empty and contain only [A-Za-z0-9_-]",
        ));
    }

    if let Some(key) = &config.encryption.key {
        if key.is_empty() {
            return Err(invalid("encryption.key", "must not be empty when set"));
        }
    }

    Ok(())
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}
