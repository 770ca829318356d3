// File: manager/src/verify/mod.rs
//! Integrity verification of stored artifacts.
//!
//! Checks run in a fixed order: existence, size floor, age (advisory, audit
//! only), compression self-test, encryption round-trip, checksum and the
//! optional test-restore. When existence or the size floor fails, every
//! later check is recorded as skipped. The verifier never touches the
//! artifact file; it only reads it and writes reports.

pub mod checks;
pub mod checksum;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::artifact::{format_timestamp, ArtifactCatalog, BackupArtifact, VerificationStatus};
use crate::config::Config;
use crate::constants::integrity;
use crate::engine::{throwaway_database_name, DatabaseEngine};
use crate::errors::{EngineError, IntegrityError};
use crate::pipeline::{decompress, test_decompress, Encryptor};

pub use checks::{
    aggregate, CheckOutcome, CheckResult, VerificationReport, VerifyMode, CHECK_AGE,
    CHECK_CHECKSUM, CHECK_COMPRESSION, CHECK_ENCRYPTION, CHECK_EXISTENCE, CHECK_SIZE_FLOOR,
    CHECK_TEST_RESTORE,
};
pub use checksum::{compute_sha256, read_checksum_file, write_checksum_file};

/// Which artifacts a verification run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyTarget {
    One(String),
    All,
    LatestPerTier,
}

/// Aggregate of a verification run over several artifacts
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub mode: VerifyMode,
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,
    pub reports: Vec<VerificationReport>,
}

impl SweepSummary {
    fn from_reports(mode: VerifyMode, reports: Vec<VerificationReport>) -> Self {
        let count = |status: VerificationStatus| {
            reports
                .iter()
                .filter(|report| report.overall_status == status)
                .count()
        };
        Self {
            mode,
            generated_at: Utc::now(),
            total: reports.len(),
            passed: count(VerificationStatus::Passed),
            warnings: count(VerificationStatus::Warning),
            failed: count(VerificationStatus::Failed),
            reports,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failed > 0
    }
}

pub struct IntegrityVerifier {
    config: Arc<Config>,
    engine: Arc<dyn DatabaseEngine>,
    encryptor: Encryptor,
}

impl IntegrityVerifier {
    pub fn new(config: Arc<Config>, engine: Arc<dyn DatabaseEngine>, encryptor: Encryptor) -> Self {
        Self {
            config,
            engine,
            encryptor,
        }
    }

    pub async fn verify(&self, artifact: &BackupArtifact, mode: VerifyMode) -> VerificationReport {
        self.verify_at(artifact, mode, Utc::now()).await
    }

    #[instrument(skip(self, artifact), fields(artifact = %artifact.file_name(), mode = %mode))]
    pub async fn verify_at(
        &self,
        artifact: &BackupArtifact,
        mode: VerifyMode,
        now: DateTime<Utc>,
    ) -> VerificationReport {
        let path = artifact.path();
        let mut results = Vec::new();

        let existence = check_existence(path).await;
        let exists = existence.result == CheckOutcome::Pass;
        results.push(existence);

        let size = if exists {
            check_size(path).await
        } else {
            CheckResult::skip(CHECK_SIZE_FLOOR, "artifact missing")
        };
        let prerequisites_met = exists && size.result == CheckOutcome::Pass;
        results.push(size);

        if !prerequisites_met {
            let mut remaining = Vec::new();
            if mode.checks_age() {
                remaining.push(CHECK_AGE);
            }
            remaining.extend([CHECK_COMPRESSION, CHECK_ENCRYPTION, CHECK_CHECKSUM]);
            if mode.test_restore() {
                remaining.push(CHECK_TEST_RESTORE);
            }
            for name in remaining {
                results.push(CheckResult::skip(name, "prerequisite check failed"));
            }
            return self.finish(artifact, mode, results, now);
        }

        if mode.checks_age() {
            let age = artifact.age(now);
            let stale = age > self.config.stale_after();
            results.push(CheckResult::advisory(
                CHECK_AGE,
                stale,
                format!(
                    "{}h old (threshold {}h)",
                    age.num_hours(),
                    self.config.stale_after_hours
                ),
            ));
        }

        // Encrypted artifacts are decrypted once; the compression self-test
        // then runs on the decrypted stream
        let scratch = if artifact.is_encrypted() || mode.test_restore() {
            self.scratch_dir()
        } else {
            None
        };

        let mut readable: Option<PathBuf> = Some(path.to_path_buf());
        let encryption = if !artifact.is_encrypted() {
            CheckResult::skip(CHECK_ENCRYPTION, "artifact is not encrypted")
        } else if !self.encryptor.is_enabled() {
            readable = None;
            CheckResult::fail(CHECK_ENCRYPTION, "artifact is encrypted but no key is configured")
        } else {
            match &scratch {
                Some(dir) => {
                    let decrypted = dir.path().join("decrypted");
                    match self.encryptor.decrypt(path, &decrypted).await {
                        Ok(()) => {
                            readable = Some(decrypted);
                            CheckResult::pass(CHECK_ENCRYPTION, "decrypted with configured key")
                        }
                        Err(e) => {
                            readable = None;
                            CheckResult::fail(CHECK_ENCRYPTION, e.to_string())
                        }
                    }
                }
                None => {
                    readable = None;
                    CheckResult::fail(CHECK_ENCRYPTION, "no scratch space to decrypt into")
                }
            }
        };

        let compression = match (readable.as_deref(), artifact.is_compressed()) {
            (_, false) => CheckResult::skip(CHECK_COMPRESSION, "artifact is not compressed"),
            (None, true) => CheckResult::skip(CHECK_COMPRESSION, "stream could not be decrypted"),
            (Some(stream), true) => match test_decompress(stream).await {
                Ok(bytes) => CheckResult::pass(
                    CHECK_COMPRESSION,
                    format!("decompressed {} bytes", bytes),
                ),
                Err(e) => CheckResult::fail(CHECK_COMPRESSION, e.to_string()),
            },
        };
        if compression.is_fatal() {
            readable = None;
        }
        results.push(compression);
        results.push(encryption);

        results.push(check_checksum(path).await);

        if mode.test_restore() {
            let check = match (readable.as_deref(), &scratch) {
                (Some(stream), Some(dir)) => {
                    self.test_restore(stream, artifact.is_compressed(), dir.path())
                        .await
                }
                _ => CheckResult::fail(CHECK_TEST_RESTORE, "artifact could not be unsealed"),
            };
            results.push(check);
        }

        self.finish(artifact, mode, results, now)
    }

    fn scratch_dir(&self) -> Option<tempfile::TempDir> {
        let staging = self.config.staging_dir();
        let created = std::fs::create_dir_all(&staging).and_then(|_| {
            tempfile::Builder::new()
                .prefix("verify_")
                .tempdir_in(&staging)
        });
        match created {
            Ok(dir) => Some(dir),
            Err(e) => {
                warn!("No scratch space for verification in {}: {}", staging.display(), e);
                None
            }
        }
    }

    fn finish(
        &self,
        artifact: &BackupArtifact,
        mode: VerifyMode,
        results: Vec<CheckResult>,
        now: DateTime<Utc>,
    ) -> VerificationReport {
        let report = VerificationReport::new(artifact, mode, results, now);
        match report.overall_status {
            VerificationStatus::Failed => error!(
                "✗ {} FAILED: {}",
                artifact.file_name(),
                report.failed_checks().join(", ")
            ),
            VerificationStatus::Warning => {
                warn!("{} passed with warnings", artifact.file_name())
            }
            _ => info!("✓ {} verified ({})", artifact.file_name(), mode),
        }
        report
    }

    /// Load the artifact into a throwaway database that is always dropped
    async fn test_restore(&self, stream: &Path, compressed: bool, scratch: &Path) -> CheckResult {
        let plain = scratch.join("plain.dump");
        let input = if compressed {
            if let Err(e) = decompress(stream, &plain).await {
                return CheckResult::fail(CHECK_TEST_RESTORE, e.to_string());
            }
            plain.as_path()
        } else {
            stream
        };

        let database = throwaway_database_name();
        let result: Result<i64, EngineError> = async {
            self.engine.create_database(&database).await?;
            self.engine
                .restore(&database, input, self.config.parallel_jobs)
                .await?;
            self.engine.count_user_tables(&database).await
        }
        .await;

        if let Err(e) = self.engine.drop_database(&database).await {
            error!("Failed to drop throwaway database {}: {}", database, e);
        }

        match result {
            Ok(tables) if tables > 0 => CheckResult::pass(
                CHECK_TEST_RESTORE,
                format!("restored {} user tables into {}", tables, database),
            ),
            Ok(_) => CheckResult::fail(CHECK_TEST_RESTORE, "restore produced no user tables"),
            Err(e) => CheckResult::fail(CHECK_TEST_RESTORE, e.to_string()),
        }
    }

    /// Apply a report's status to the in-memory artifact
    pub fn record(&self, artifact: &mut BackupArtifact, report: &VerificationReport) {
        artifact.set_verified(report.overall_status);
    }

    /// Verify, record the status on the artifact and persist the report
    pub async fn verify_and_record(
        &self,
        artifact: &mut BackupArtifact,
        mode: VerifyMode,
    ) -> VerificationReport {
        let report = self.verify(artifact, mode).await;
        self.record(artifact, &report);
        if let Err(e) = self.persist(&report).await {
            warn!("Could not persist verification report: {}", e);
        }
        report
    }

    /// Write the sibling checksum file and store the digest on the artifact
    pub async fn seal_checksum(&self, artifact: &mut BackupArtifact) -> Result<String, IntegrityError> {
        let digest = write_checksum_file(artifact.path()).await?;
        debug!("Checksum of {}: {}", artifact.file_name(), digest);
        artifact.set_checksum(digest.clone());
        Ok(digest)
    }

    /// Verify every artifact in turn; a failure never halts the sweep
    pub async fn sweep(&self, artifacts: Vec<BackupArtifact>, mode: VerifyMode) -> SweepSummary {
        info!("Verifying {} artifacts ({})", artifacts.len(), mode);
        let mut reports = Vec::with_capacity(artifacts.len());
        for mut artifact in artifacts {
            reports.push(self.verify_and_record(&mut artifact, mode).await);
        }
        let summary = SweepSummary::from_reports(mode, reports);
        info!(
            "Sweep complete: {} passed, {} warnings, {} failed of {}",
            summary.passed, summary.warnings, summary.failed, summary.total
        );
        summary
    }

    #[instrument(skip(self))]
    pub async fn run(&self, target: VerifyTarget, mode: VerifyMode) -> Result<SweepSummary, IntegrityError> {
        let catalog = ArtifactCatalog::new(self.config.clone());
        let artifacts = match &target {
            VerifyTarget::One(reference) => vec![catalog.resolve(reference)?],
            VerifyTarget::All => catalog.list()?,
            VerifyTarget::LatestPerTier => catalog.latest_per_tier()?,
        };

        let summary = self.sweep(artifacts, mode).await;
        if !matches!(target, VerifyTarget::One(_)) {
            if let Err(e) = self.persist_summary(&summary).await {
                warn!("Could not persist sweep summary: {}", e);
            }
        }
        Ok(summary)
    }

    /// Store a report as JSON under `reports/`
    pub async fn persist(&self, report: &VerificationReport) -> Result<PathBuf, IntegrityError> {
        let file_name = format!(
            "verify_{}_{}.json",
            report
                .artifact
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| report.artifact_id.clone()),
            format_timestamp(report.generated_at)
        );
        self.write_report(&file_name, report).await
    }

    async fn persist_summary(&self, summary: &SweepSummary) -> Result<PathBuf, IntegrityError> {
        let file_name = format!("sweep_{}.json", format_timestamp(summary.generated_at));
        self.write_report(&file_name, summary).await
    }

    async fn write_report<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf, IntegrityError> {
        let dir = self.config.reports_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(file_name);
        let body = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
        tokio::fs::write(&path, body).await?;
        debug!("Report written to {}", path.display());
        Ok(path)
    }
}

/// Refuse an artifact whose report failed
pub fn require_passed(report: &VerificationReport) -> Result<(), IntegrityError> {
    if report.is_failed() {
        Err(IntegrityError::VerificationFailed {
            path: report.artifact.clone(),
            failed_checks: report.failed_checks(),
        })
    } else {
        Ok(())
    }
}

async fn check_existence(path: &Path) -> CheckResult {
    match tokio::fs::File::open(path).await {
        Ok(file) => match file.metadata().await {
            Ok(metadata) if metadata.is_file() => CheckResult::pass(CHECK_EXISTENCE, "readable"),
            Ok(_) => CheckResult::fail(CHECK_EXISTENCE, "not a regular file"),
            Err(e) => CheckResult::fail(CHECK_EXISTENCE, e.to_string()),
        },
        Err(e) => CheckResult::fail(CHECK_EXISTENCE, e.to_string()),
    }
}

async fn check_size(path: &Path) -> CheckResult {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.len() >= integrity::MIN_ARTIFACT_BYTES => CheckResult::pass(
            CHECK_SIZE_FLOOR,
            format!("{} bytes", metadata.len()),
        ),
        Ok(metadata) => CheckResult::fail(
            CHECK_SIZE_FLOOR,
            format!(
                "{} bytes is below the {} byte floor",
                metadata.len(),
                integrity::MIN_ARTIFACT_BYTES
            ),
        ),
        Err(e) => CheckResult::fail(CHECK_SIZE_FLOOR, e.to_string()),
    }
}

async fn check_checksum(path: &Path) -> CheckResult {
    let expected = match read_checksum_file(path).await {
        Ok(Some(expected)) => expected,
        Ok(None) => return CheckResult::skip(CHECK_CHECKSUM, "no checksum file"),
        Err(e) => return CheckResult::fail(CHECK_CHECKSUM, format!("unreadable checksum file: {}", e)),
    };
    match compute_sha256(path).await {
        Ok(actual) if actual == expected => CheckResult::pass(CHECK_CHECKSUM, "sha256 matches"),
        Ok(actual) => CheckResult::fail(
            CHECK_CHECKSUM,
            format!("expected {}, found {}", expected, actual),
        ),
        Err(e) => CheckResult::fail(CHECK_CHECKSUM, e.to_string()),
    }
}
