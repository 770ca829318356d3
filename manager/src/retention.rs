//! Calendar tier classification and pruning
//!
//! Tiers are assigned once, when an artifact is created, from the run's
//! calendar date in the configured timezone. Pruning only looks at the tier
//! directory an artifact lives in and its modification time.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::artifact::{ArtifactCatalog, BackupArtifact, Tier};
use crate::config::Config;
use crate::constants::{layout, retention};
use crate::errors::IntegrityError;
use crate::run_lock::PinRegistry;

/// 1st of the month is monthly, the configured last day of the week is
/// weekly, every other day is daily
pub fn classify(date: NaiveDate, week_end: Weekday) -> Tier {
    if date.day() == 1 {
        Tier::Monthly
    } else if date.weekday() == week_end {
        Tier::Weekly
    } else {
        Tier::Daily
    }
}

/// Classify an instant by its calendar date in `timezone`
pub fn classify_at(at: DateTime<Utc>, timezone: Tz, week_end: Weekday) -> Tier {
    classify(at.with_timezone(&timezone).date_naive(), week_end)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneSummary {
    pub deleted: Vec<PathBuf>,
    pub retained: usize,
    pub pinned: Vec<PathBuf>,
    pub scratch_removed: usize,
    pub logs_removed: usize,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

impl PruneSummary {
    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty() && self.scratch_removed == 0 && self.logs_removed == 0
    }

    fn merge(&mut self, other: PruneSummary) {
        self.deleted.extend(other.deleted);
        self.retained += other.retained;
        self.pinned.extend(other.pinned);
        self.scratch_removed += other.scratch_removed;
        self.logs_removed += other.logs_removed;
        self.bytes_freed += other.bytes_freed;
        self.errors.extend(other.errors);
    }
}

pub struct RetentionManager {
    config: Arc<Config>,
    catalog: ArtifactCatalog,
    pins: PinRegistry,
}

impl RetentionManager {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            catalog: ArtifactCatalog::new(config.clone()),
            pins: PinRegistry::new(config.pins_dir()),
            config,
        }
    }

    /// Expired artifacts plus stale scratch files and old logs
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<PruneSummary, IntegrityError> {
        let mut summary = self.prune_expired(now).await?;
        summary.merge(self.prune_scratch(now).await);
        Ok(summary)
    }

    /// Delete artifacts whose age strictly exceeds their tier's window.
    /// Age equal to the window is retained; pinned artifacts are skipped.
    #[instrument(skip(self))]
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<PruneSummary, IntegrityError> {
        let policy = self.config.retention;
        let mut summary = PruneSummary::default();

        let mut candidates: Vec<BackupArtifact> = Vec::new();
        for tier in Tier::ALL {
            candidates.extend(self.catalog.list_tier(tier)?);
        }
        // Pre-restore snapshots follow the daily window
        candidates.extend(self.catalog.list_pre_restore()?);

        for artifact in candidates {
            let window = policy.window(artifact.tier());
            let age = artifact.age(now);
            if age <= window {
                summary.retained += 1;
                continue;
            }
            if self.pins.is_pinned(artifact.path()) {
                info!("Keeping pinned artifact {}", artifact.file_name());
                summary.pinned.push(artifact.path().to_path_buf());
                continue;
            }

            match remove_artifact(&artifact).await {
                Ok(()) => {
                    info!(
                        "Pruned {} artifact {} ({}d old, window {}d)",
                        artifact.tier(),
                        artifact.file_name(),
                        age.num_days(),
                        window.num_days()
                    );
                    summary.bytes_freed += artifact.size_bytes();
                    summary.deleted.push(artifact.path().to_path_buf());
                }
                Err(e) => {
                    warn!("Failed to prune {}: {}", artifact.path().display(), e);
                    summary.errors.push(format!("{}: {}", artifact.path().display(), e));
                }
            }
        }

        if summary.deleted.is_empty() {
            debug!("Nothing to prune ({} artifacts retained)", summary.retained);
        } else {
            info!(
                "✓ Retention pass removed {} artifacts ({} bytes), retained {}",
                summary.deleted.len(),
                summary.bytes_freed,
                summary.retained
            );
        }
        Ok(summary)
    }

    /// Remove staging leftovers older than 24h, abandoned `.partial` files in
    /// the tier directories, and logs and reports older than 30 days
    pub async fn prune_scratch(&self, now: DateTime<Utc>) -> PruneSummary {
        let mut summary = PruneSummary::default();
        let scratch_age = Duration::hours(retention::STAGING_MAX_AGE_HOURS);
        let log_age = Duration::days(retention::LOG_RETENTION_DAYS);

        summary.scratch_removed += remove_older_than(
            &self.config.staging_dir(),
            scratch_age,
            now,
            |_| true,
            &mut summary.errors,
        )
        .await;
        for tier in Tier::ALL {
            summary.scratch_removed += remove_older_than(
                &self.config.tier_dir(tier),
                scratch_age,
                now,
                |name| name.ends_with(layout::PARTIAL_SUFFIX),
                &mut summary.errors,
            )
            .await;
        }
        for dir in [self.config.logs_dir(), self.config.reports_dir()] {
            summary.logs_removed +=
                remove_older_than(&dir, log_age, now, |_| true, &mut summary.errors).await;
        }

        if summary.scratch_removed + summary.logs_removed > 0 {
            info!(
                "✓ Removed {} scratch entries and {} old logs/reports",
                summary.scratch_removed, summary.logs_removed
            );
        }
        summary
    }
}

async fn remove_artifact(artifact: &BackupArtifact) -> std::io::Result<()> {
    tokio::fs::remove_file(artifact.path()).await?;
    let sibling = artifact.checksum_path();
    match tokio::fs::remove_file(&sibling).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn remove_older_than<F>(
    dir: &Path,
    max_age: Duration,
    now: DateTime<Utc>,
    matches: F,
    errors: &mut Vec<String>,
) -> usize
where
    F: Fn(&str) -> bool,
{
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                errors.push(format!("{}: {}", dir.display(), e));
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if !matches(&name) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };
        let modified: DateTime<Utc> = match metadata.modified() {
            Ok(modified) => modified.into(),
            Err(_) => continue,
        };
        if now.signed_duration_since(modified) <= max_age {
            continue;
        }

        let path = entry.path();
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => {
                debug!("Removed stale {}", path.display());
                removed += 1;
            }
            Err(e) => errors.push(format!("{}: {}", path.display(), e)),
        }
    }
    removed
}
