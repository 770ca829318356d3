//! Test configuration builder for creating isolated backup roots

use backup_manager::config::{Config, Secret};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_DATABASE: &str = "shop";
pub const TEST_PREFIX: &str = "db_backup";

/// Builder for a `Config` rooted in a fresh temp directory
pub struct TestConfigBuilder {
    temp_dir: TempDir,
    config: Config,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.database.name = TEST_DATABASE.to_string();
        config.storage.backup_dir = temp_dir.path().join("backups");
        config.storage.prefix = TEST_PREFIX.to_string();
        config.min_free_space_bytes = 0;
        config.parallel_jobs = 1;
        Self { temp_dir, config }
    }

    pub fn with_retention(mut self, daily_days: u32, weekly_weeks: u32, monthly_months: u32) -> Self {
        self.config.retention.daily_days = daily_days;
        self.config.retention.weekly_weeks = weekly_weeks;
        self.config.retention.monthly_months = monthly_months;
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.config.timezone = timezone.to_string();
        self
    }

    /// Encrypt with `key` through the shell stand-in for gpg
    pub fn with_fake_encryption(mut self, key: &str) -> Self {
        let gpg = super::fake_gpg::install(self.temp_dir.path());
        self.config.encryption.key = Some(Secret::new(key));
        self.config.encryption.gpg_binary = gpg.to_string_lossy().to_string();
        self
    }

    pub fn with_webhook(mut self, url: &str) -> Self {
        self.config.notifications.webhook_url = Some(url.to_string());
        self
    }

    pub fn with_config<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Config),
    {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> TestConfig {
        fs::create_dir_all(&self.config.storage.backup_dir).expect("Failed to create backup root");
        TestConfig {
            config: Arc::new(self.config),
            _temp_dir: self.temp_dir,
        }
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Built configuration; the backing directory lives as long as this value
pub struct TestConfig {
    pub config: Arc<Config>,
    _temp_dir: TempDir,
}

impl TestConfig {
    pub fn root(&self) -> &Path {
        &self.config.storage.backup_dir
    }

    pub fn workspace(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Files directly inside `sub` (e.g. `daily`), sorted
    pub fn files_in(&self, sub: &str) -> Vec<String> {
        let dir = self.root().join(sub);
        let mut names: Vec<String> = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_file())
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}
