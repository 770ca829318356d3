// File: manager/src/services/backup_service.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::artifact::{artifact_file_name, ArtifactKind, BackupArtifact, Tier};
use crate::config::Config;
use crate::engine::DatabaseEngine;
use crate::errors::ManagerError;
use crate::outcome::RunOutcome;
use crate::pipeline::{Encryptor, Pipeline};
use crate::retention::{classify_at, PruneSummary, RetentionManager};
use crate::run_lock::RunLock;
use crate::services::remote_storage::RemoteStorage;
use crate::verify::{IntegrityVerifier, VerificationReport, VerifyMode};

/// Where a backup run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStep {
    Lock,
    Dump,
    Seal,
    Checksum,
    Verify,
    Upload,
    Prune,
}

impl fmt::Display for BackupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BackupStep::Lock => "lock",
            BackupStep::Dump => "dump",
            BackupStep::Seal => "seal",
            BackupStep::Checksum => "checksum",
            BackupStep::Verify => "verify",
            BackupStep::Upload => "upload",
            BackupStep::Prune => "prune",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub database: String,
    pub outcome: RunOutcome,
    pub tier: Option<Tier>,
    pub artifact: Option<BackupArtifact>,
    pub verification: Option<VerificationReport>,
    pub uploaded: Vec<String>,
    pub prune: Option<PruneSummary>,
    pub warnings: Vec<String>,
    pub failed_step: Option<BackupStep>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BackupReport {
    fn started(database: &str, at: DateTime<Utc>) -> Self {
        Self {
            database: database.to_string(),
            outcome: RunOutcome::Success,
            tier: None,
            artifact: None,
            verification: None,
            uploaded: Vec::new(),
            prune: None,
            warnings: Vec::new(),
            failed_step: None,
            error: None,
            started_at: at,
            finished_at: at,
        }
    }

    pub fn summary(&self) -> String {
        match (&self.artifact, &self.error) {
            (_, Some(error)) => format!("Backup of '{}' failed: {}", self.database, error),
            (Some(artifact), None) => format!(
                "Backup of '{}' stored as {} ({} tier, {} bytes)",
                self.database,
                artifact.file_name(),
                artifact.tier(),
                artifact.size_bytes()
            ),
            (None, None) => format!("Backup of '{}' produced no artifact", self.database),
        }
    }
}

type StepResult<T> = Result<T, (BackupStep, ManagerError)>;

/// The backup pipeline: lock, dump, seal, checksum, verify, copy offsite,
/// prune. Steps run strictly in that order and pruning only happens once
/// the new artifact is durably stored and verified.
pub struct BackupService {
    config: Arc<Config>,
    pipeline: Pipeline,
    verifier: IntegrityVerifier,
    retention: RetentionManager,
    remote: Option<RemoteStorage>,
}

impl BackupService {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<dyn DatabaseEngine>,
        encryptor: Encryptor,
        remote: Option<RemoteStorage>,
    ) -> Self {
        Self {
            pipeline: Pipeline::new(engine.clone(), &config, encryptor.clone()),
            verifier: IntegrityVerifier::new(config.clone(), engine, encryptor),
            retention: RetentionManager::new(config.clone()),
            config,
            remote,
        }
    }

    pub async fn backup(&self) -> BackupReport {
        self.backup_at(Utc::now()).await
    }

    /// Run the pipeline as if the clock read `now`; `now` decides the tier
    /// and the artifact name
    #[instrument(skip(self), fields(database = %self.config.database.name))]
    pub async fn backup_at(&self, now: DateTime<Utc>) -> BackupReport {
        let mut report = BackupReport::started(&self.config.database.name, now);

        match self.run(&mut report, now).await {
            Ok(()) => {
                report.outcome = RunOutcome::from_warnings(&report.warnings);
                info!("✓ {}", report.summary());
            }
            Err((step, e)) => {
                report.outcome = RunOutcome::Failure;
                report.failed_step = Some(step);
                report.error = Some(e.to_string());
                error!("Backup failed during {}: {}", step, e);
            }
        }
        report.finished_at = Utc::now();
        report
    }

    async fn run(&self, report: &mut BackupReport, now: DateTime<Utc>) -> StepResult<()> {
        let database = self.config.database.name.clone();
        let _lease = RunLock::acquire(&self.config.locks_dir(), &database, "backup")
            .map_err(|e| (BackupStep::Lock, e.into()))?;

        let tier = classify_at(now, self.config.calendar_timezone(), self.config.week_end());
        report.tier = Some(tier);
        let dir = self.config.tier_dir(tier);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| (BackupStep::Dump, ManagerError::Other(e.to_string())))?;
        let output = dir.join(artifact_file_name(&self.config.storage.prefix, now));
        info!("Backing up '{}' into the {} tier", database, tier);

        let sealed = self.pipeline.produce(&database, &output).await.map_err(|e| {
            let step = match e {
                ManagerError::Dump(_) => BackupStep::Dump,
                _ => BackupStep::Seal,
            };
            (step, e)
        })?;
        info!("✓ Dump sealed: {}", sealed.path.display());

        let mut artifact = BackupArtifact::from_path(&sealed.path, ArtifactKind::Scheduled, tier)
            .map_err(|e| (BackupStep::Seal, ManagerError::Other(e.to_string())))?;
        if let Err(e) = self.verifier.seal_checksum(&mut artifact).await {
            discard(&artifact).await;
            return Err((BackupStep::Checksum, e.into()));
        }

        let verification = self
            .verifier
            .verify_and_record(&mut artifact, VerifyMode::Light)
            .await;
        if verification.is_failed() {
            discard(&artifact).await;
            let failed = verification.failed_checks();
            report.verification = Some(verification);
            return Err((
                BackupStep::Verify,
                ManagerError::Other(format!(
                    "fresh artifact failed verification ({}) and was removed",
                    failed.join(", ")
                )),
            ));
        }
        info!("✓ Verified {} ({})", artifact.file_name(), verification.overall_status);
        report.verification = Some(verification);
        report.artifact = Some(artifact.clone());

        if let Some(remote) = &self.remote {
            match remote.upload(&artifact).await {
                Ok(uploaded) => report.uploaded = uploaded,
                Err(e) => {
                    warn!("Remote copy failed: {}", e);
                    report
                        .warnings
                        .push(format!("{}: remote copy failed: {}", BackupStep::Upload, e));
                }
            }
        }

        // Local pruning does not wait on the remote copy
        match self.retention.prune(now).await {
            Ok(summary) => {
                for problem in &summary.errors {
                    report.warnings.push(format!("{}: {}", BackupStep::Prune, problem));
                }
                report.prune = Some(summary);
            }
            Err(e) => {
                warn!("Pruning failed: {}", e);
                report.warnings.push(format!("{}: {}", BackupStep::Prune, e));
            }
        }
        Ok(())
    }
}

/// Remove an artifact that must not be kept, with its checksum sibling
async fn discard(artifact: &BackupArtifact) {
    for path in [artifact.path().to_path_buf(), artifact.checksum_path()] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => warn!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!("Failed to remove {}: {}", path.display(), e),
        }
    }
}
