// File: manager/src/restore/mod.rs
//! Restore engine
//!
//! A restore never loads into production directly. The flow is:
//!
//! 1. **pending**: resolve and light-verify the artifact, pin it
//! 2. **snapshotting**: dump live production as the rollback point
//! 3. **staging**: unseal and load into `<target>_restore_<id>`
//! 4. **swapping**: confirm, end sessions, drop production, rename scratch in
//! 5. **verifying**: production must have user tables
//! 6. **committed**
//!
//! Any failure moves to **failed**. When production was already modified,
//! rollback is enabled and a snapshot exists, production is rebuilt from the
//! snapshot (**rolled_back**); otherwise the operator is told that manual
//! recovery is required.

pub mod confirm;
pub mod production;
pub mod session;

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::artifact::{format_timestamp, pre_restore_file_name, ArtifactCatalog, ArtifactKind, BackupArtifact, Tier};
use crate::config::Config;
use crate::engine::{scratch_database_name, validate_identifier, DatabaseEngine};
use crate::errors::{ManagerError, RestoreError};
use crate::outcome::RunOutcome;
use crate::pipeline::{Encryptor, Pipeline};
use crate::run_lock::{PinRegistry, RunLock};
use crate::verify::{require_passed, IntegrityVerifier, VerifyMode};

pub use confirm::{AutoConfirm, Confirmer, TerminalConfirmer};
pub use production::ProductionDatabase;
pub use session::{RestoreSession, RestoreStatus, StatusChange};

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub rollback_enabled: bool,
    pub skip_confirmation: bool,
    /// Defaults to the configured database
    pub target_database: Option<String>,
    /// Proceed without a pre-restore snapshot; the caller has acknowledged
    /// that no rollback will be possible
    pub skip_snapshot: bool,
    pub verify_after_swap: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            rollback_enabled: true,
            skip_confirmation: false,
            target_database: None,
            skip_snapshot: false,
            verify_after_swap: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub session: RestoreSession,
    pub outcome: RunOutcome,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub rolled_back: bool,
    pub manual_recovery_required: bool,
}

impl RestoreReport {
    pub fn final_status(&self) -> RestoreStatus {
        self.session.status()
    }
}

pub struct RestoreEngine {
    config: Arc<Config>,
    engine: Arc<dyn DatabaseEngine>,
    pipeline: Pipeline,
    verifier: IntegrityVerifier,
    catalog: ArtifactCatalog,
    pins: PinRegistry,
    confirmer: Arc<dyn Confirmer>,
}

impl RestoreEngine {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<dyn DatabaseEngine>,
        encryptor: Encryptor,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        Self {
            pipeline: Pipeline::new(engine.clone(), &config, encryptor.clone()),
            verifier: IntegrityVerifier::new(config.clone(), engine.clone(), encryptor),
            catalog: ArtifactCatalog::new(config.clone()),
            pins: PinRegistry::new(config.pins_dir()),
            config,
            engine,
            confirmer,
        }
    }

    /// Restore `reference` (a path or a timestamp id/prefix).
    ///
    /// Returns `Err` only when the restore never started: the target is
    /// busy, the artifact cannot be resolved or fails verification. Once a
    /// session exists its result, including failure, is in the report.
    #[instrument(skip(self, options))]
    pub async fn restore(
        &self,
        reference: &str,
        options: RestoreOptions,
    ) -> Result<RestoreReport, RestoreError> {
        let target = options
            .target_database
            .clone()
            .unwrap_or_else(|| self.config.database.name.clone());
        validate_identifier(&target).map_err(|e| RestoreError::StepFailed {
            step: RestoreStatus::Pending,
            reason: e.to_string(),
        })?;

        let lease = RunLock::acquire(&self.config.locks_dir(), &target, "restore")?;
        let production = lease.production(self.engine.clone());

        let artifact = self.catalog.resolve(reference)?;
        info!(
            "Restore of {} ({} tier) into '{}' requested",
            artifact.file_name(),
            artifact.tier(),
            target
        );
        let _pin = self.pins.pin(artifact.path())?;

        let verification = self.verifier.verify(&artifact, VerifyMode::Light).await;
        if let Err(e) = self.verifier.persist(&verification).await {
            warn!("Could not persist verification report: {}", e);
        }
        require_passed(&verification)?;
        info!("✓ Artifact {} passed verification", artifact.file_name());

        let mut session = RestoreSession::new(artifact, &target, scratch_database_name(&target));
        let mut warnings = Vec::new();

        let report = match self
            .run_session(&mut session, &production, &options, &mut warnings)
            .await
        {
            Ok(()) => {
                info!(
                    "✓ Restore committed: '{}' now holds {}",
                    target,
                    session.target_artifact().file_name()
                );
                RestoreReport {
                    outcome: RunOutcome::from_warnings(&warnings),
                    session,
                    error: None,
                    warnings,
                    rolled_back: false,
                    manual_recovery_required: false,
                }
            }
            Err(err) => {
                self.recover(session, &production, &options, err, warnings)
                    .await
            }
        };

        self.drop_scratch(report.session.scratch_database()).await;
        self.persist(&report).await;
        Ok(report)
    }

    async fn run_session(
        &self,
        session: &mut RestoreSession,
        production: &ProductionDatabase<'_>,
        options: &RestoreOptions,
        warnings: &mut Vec<String>,
    ) -> Result<(), RestoreError> {
        let jobs = self.config.parallel_jobs;
        let target = session.target_database().to_string();

        session.advance(RestoreStatus::Snapshotting)?;
        let exists = production
            .exists()
            .await
            .map_err(step_failed(RestoreStatus::Snapshotting))?;
        if exists {
            let before = production
                .count_user_tables()
                .await
                .map_err(step_failed(RestoreStatus::Snapshotting))?;
            session.record_tables_before(before);
        }

        if options.skip_snapshot {
            let message = format!("restoring '{}' without a pre-restore snapshot", target);
            warn!("{}; rollback will not be possible", message);
            warnings.push(message);
            session.acknowledge_skip();
        } else if !exists {
            info!("Production '{}' does not exist; nothing to snapshot", target);
            session.acknowledge_skip();
        } else {
            let snapshot = self
                .take_snapshot(&target)
                .await
                .map_err(step_failed(RestoreStatus::Snapshotting))?;
            session.attach_snapshot(snapshot);
        }

        session.advance(RestoreStatus::Staging)?;
        let staging = self.config.staging_dir();
        tokio::fs::create_dir_all(&staging).await?;
        let unsealed = self
            .pipeline
            .unseal(session.target_artifact().path(), &staging)
            .await
            .map_err(step_failed(RestoreStatus::Staging))?;
        let scratch = session.scratch_database().to_string();
        self.engine
            .create_database(&scratch)
            .await
            .map_err(step_failed(RestoreStatus::Staging))?;
        self.engine
            .restore(&scratch, unsealed.path(), jobs)
            .await
            .map_err(step_failed(RestoreStatus::Staging))?;
        drop(unsealed);
        info!("✓ Staged artifact into scratch database '{}'", scratch);

        if !options.skip_confirmation {
            let prompt = format!(
                "Production database '{}' will be replaced by {} (created {}).",
                target,
                session.target_artifact().file_name(),
                session.target_artifact().created_at()
            );
            if !self.confirmer.confirm(&target, &prompt).await {
                warn!("Restore of '{}' declined by operator", target);
                return Err(RestoreError::ConfirmationDeclined { database: target });
            }
        }

        session.advance(RestoreStatus::Swapping)?;
        if exists {
            production
                .terminate_connections()
                .await
                .map_err(step_failed(RestoreStatus::Swapping))?;
            session.mark_production_mutated();
            production
                .drop_database()
                .await
                .map_err(step_failed(RestoreStatus::Swapping))?;
        }
        production
            .adopt(&scratch)
            .await
            .map_err(step_failed(RestoreStatus::Swapping))?;
        if !exists {
            session.mark_production_created();
        }

        if options.verify_after_swap {
            session.advance(RestoreStatus::Verifying)?;
            let tables = production
                .count_user_tables()
                .await
                .map_err(step_failed(RestoreStatus::Verifying))?;
            session.record_tables_after(tables);
            if tables <= 0 {
                return Err(RestoreError::StepFailed {
                    step: RestoreStatus::Verifying,
                    reason: "restored database has no user tables".to_string(),
                });
            }
            info!("✓ Post-swap check: {} user tables", tables);
        }

        session.advance(RestoreStatus::Committed)?;
        Ok(())
    }

    async fn take_snapshot(&self, target: &str) -> Result<BackupArtifact, ManagerError> {
        let dir = self.config.pre_restore_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ManagerError::Other(e.to_string()))?;
        let output = dir.join(pre_restore_file_name(target, Utc::now()));

        let sealed = self.pipeline.produce(target, &output).await?;
        let mut snapshot = BackupArtifact::from_path(&sealed.path, ArtifactKind::PreRestore, Tier::Daily)
            .map_err(|e| ManagerError::Other(e.to_string()))?;
        self.verifier.seal_checksum(&mut snapshot).await?;
        info!("✓ Pre-restore snapshot {}", snapshot.path().display());
        Ok(snapshot)
    }

    async fn recover(
        &self,
        mut session: RestoreSession,
        production: &ProductionDatabase<'_>,
        options: &RestoreOptions,
        err: RestoreError,
        warnings: Vec<String>,
    ) -> RestoreReport {
        let failed_at = session.status();
        error!("Restore of '{}' failed during {}: {}", session.target_database(), failed_at, err);
        if !session.status().is_terminal() {
            if let Err(e) = session.advance(RestoreStatus::Failed) {
                error!("{}", e);
            }
        }

        let mut report = RestoreReport {
            outcome: RunOutcome::Failure,
            error: Some(err.to_string()),
            warnings,
            rolled_back: false,
            manual_recovery_required: false,
            session,
        };

        if !report.session.production_mutated() {
            info!(
                "Production '{}' was not modified; no rollback needed",
                report.session.target_database()
            );
            return report;
        }

        let database = report.session.target_database().to_string();
        if !options.rollback_enabled {
            return require_manual_recovery(report, database, err.to_string());
        }

        let rolled_back = if report.session.production_created() {
            // Nothing existed before, so the prior state is no database at all
            warn!("Removing '{}'; it did not exist before this restore", database);
            self.remove_created(production).await.map(|()| None)
        } else if let Some(snapshot) = report.session.pre_restore_snapshot().cloned() {
            warn!("Rolling '{}' back to {}", database, snapshot.file_name());
            self.rollback(&snapshot, production).await.map(Some)
        } else {
            return require_manual_recovery(report, database, err.to_string());
        };

        match rolled_back {
            Ok(tables) => {
                if let Some(tables) = tables {
                    report.session.record_tables_after(tables);
                }
                match report.session.advance(RestoreStatus::RolledBack) {
                    Ok(()) => {
                        match tables {
                            Some(tables) => {
                                info!("✓ '{}' rolled back ({} user tables)", database, tables)
                            }
                            None => info!("✓ '{}' removed, as before the restore", database),
                        }
                        report.rolled_back = true;
                    }
                    Err(e) => error!("{}", e),
                }
            }
            Err(reason) => {
                let fatal = RestoreError::RollbackFailed {
                    database,
                    reason,
                    original: err.to_string(),
                };
                error!("{}", fatal);
                report.error = Some(fatal.to_string());
                report.manual_recovery_required = true;
            }
        }
        report
    }

    async fn remove_created(&self, production: &ProductionDatabase<'_>) -> Result<(), String> {
        production.drop_database().await.map_err(|e| e.to_string())
    }

    async fn rollback(
        &self,
        snapshot: &BackupArtifact,
        production: &ProductionDatabase<'_>,
    ) -> Result<i64, String> {
        let unsealed = self
            .pipeline
            .unseal(snapshot.path(), &self.config.staging_dir())
            .await
            .map_err(|e| e.to_string())?;
        production
            .recreate_from(unsealed.path(), self.config.parallel_jobs)
            .await
            .map_err(|e| e.to_string())?;
        production.count_user_tables().await.map_err(|e| e.to_string())
    }

    async fn drop_scratch(&self, scratch: &str) {
        if let Err(e) = self.engine.drop_database(scratch).await {
            error!("Failed to drop scratch database '{}': {}", scratch, e);
        }
    }

    async fn persist(&self, report: &RestoreReport) {
        let dir = self.config.reports_dir();
        let path = dir.join(format!(
            "restore_{}_{}.json",
            format_timestamp(Utc::now()),
            report.session.id().simple()
        ));
        let written = match serde_json::to_vec_pretty(report) {
            Ok(body) => match tokio::fs::create_dir_all(&dir).await {
                Ok(()) => tokio::fs::write(&path, body).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(std::io::Error::other(e)),
        };
        if let Err(e) = written {
            warn!("Could not persist restore report: {}", e);
        }
    }
}

fn require_manual_recovery(
    mut report: RestoreReport,
    database: String,
    reason: String,
) -> RestoreReport {
    let fatal = RestoreError::ManualRecoveryRequired { database, reason };
    error!("{}", fatal);
    report.error = Some(fatal.to_string());
    report.manual_recovery_required = true;
    report
}

fn step_failed<E: std::fmt::Display>(step: RestoreStatus) -> impl Fn(E) -> RestoreError {
    move |e| RestoreError::StepFailed {
        step,
        reason: e.to_string(),
    }
}
