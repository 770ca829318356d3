//! Integration Tests: Verification sweeps
//!
//! Audit runs over the whole catalog, corrupted artifacts, the size floor
//! short-circuit and the advisory staleness check.

mod common;

use backup_manager::artifact::{ArtifactCatalog, ArtifactKind, BackupArtifact, Tier, VerificationStatus};
use backup_manager::verify::{
    CheckOutcome, VerifyMode, VerifyTarget, CHECK_AGE, CHECK_CHECKSUM, CHECK_COMPRESSION,
    CHECK_ENCRYPTION, CHECK_EXISTENCE, CHECK_SIZE_FLOOR,
};
use chrono::{Duration, Utc};
use common::fixtures::*;
use std::path::Path;
use std::sync::Arc;

const AUDIT: VerifyMode = VerifyMode::Audit {
    test_restore: false,
};

/// Flip a run of bytes in the middle of the file, keeping its size
fn corrupt(path: &Path) {
    let mut bytes = std::fs::read(path).unwrap();
    let middle = bytes.len() / 2;
    for byte in bytes.iter_mut().skip(middle).take(64) {
        *byte ^= 0xA5;
    }
    std::fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn test_sweep_reports_each_corrupted_artifact() {
    let setup = TestConfigBuilder::new().build();
    let engine = Arc::new(FakeEngine::with_database(TEST_DATABASE, 3));
    let ctx = context(&setup, &engine);
    let service = ctx.backup_service();
    for day in 5..=14 {
        let report = service.backup_at(utc(2024, 3, day, 1)).await;
        assert!(!report.outcome.is_failure(), "{:?}", report.error);
    }

    let catalog = ArtifactCatalog::new(setup.config.clone());
    let artifacts = catalog.list().unwrap();
    assert_eq!(artifacts.len(), 10);
    corrupt(artifacts[2].path());
    corrupt(artifacts[7].path());

    let summary = ctx.verifier().run(VerifyTarget::All, AUDIT).await.unwrap();

    assert_eq!(summary.total, 10);
    assert_eq!(summary.passed, 8);
    assert_eq!(summary.failed, 2);
    assert!(summary.is_failure());

    let mut failed: Vec<&str> = summary
        .reports
        .iter()
        .filter(|report| report.is_failed())
        .map(|report| report.artifact_id.as_str())
        .collect();
    failed.sort();
    let mut expected = vec![artifacts[2].id(), artifacts[7].id()];
    expected.sort();
    assert_eq!(failed, expected);

    for report in summary.reports.iter().filter(|report| report.is_failed()) {
        assert_eq!(report.check(CHECK_CHECKSUM).unwrap().result, CheckOutcome::Fail);
        assert_eq!(report.check(CHECK_COMPRESSION).unwrap().result, CheckOutcome::Fail);
    }

    assert!(setup
        .files_in("reports")
        .iter()
        .any(|name| name.starts_with("sweep_") && name.ends_with(".json")));
}

#[tokio::test]
async fn test_sweep_leaves_artifacts_untouched() {
    let setup = TestConfigBuilder::new().build();
    let engine = Arc::new(FakeEngine::with_database(TEST_DATABASE, 3));
    let ctx = context(&setup, &engine);
    ctx.backup_service().backup_at(utc(2024, 3, 5, 1)).await;
    let artifact = ArtifactCatalog::new(setup.config.clone()).resolve("20240305").unwrap();
    corrupt(artifact.path());
    let before = std::fs::read(artifact.path()).unwrap();

    let summary = ctx.verifier().run(VerifyTarget::All, AUDIT).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(std::fs::read(artifact.path()).unwrap(), before);
    assert_eq!(setup.files_in("daily").len(), 2);
}

#[tokio::test]
async fn test_undersized_artifact_skips_every_later_check() {
    let setup = TestConfigBuilder::new().build();
    let engine = Arc::new(FakeEngine::new());
    let ctx = context(&setup, &engine);
    let dir = setup.root().join("daily");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("db_backup_20240305_010000.dump.gz"), vec![7u8; 500]).unwrap();

    let summary = ctx
        .verifier()
        .run(VerifyTarget::One("20240305_010000".to_string()), AUDIT)
        .await
        .unwrap();

    let report = &summary.reports[0];
    assert_eq!(report.overall_status, VerificationStatus::Failed);
    assert_eq!(report.check(CHECK_EXISTENCE).unwrap().result, CheckOutcome::Pass);
    assert_eq!(report.check(CHECK_SIZE_FLOOR).unwrap().result, CheckOutcome::Fail);
    for name in [CHECK_AGE, CHECK_COMPRESSION, CHECK_ENCRYPTION, CHECK_CHECKSUM] {
        assert_eq!(
            report.check(name).unwrap().result,
            CheckOutcome::Skip,
            "{} should be skipped",
            name
        );
    }
    let failed = report.failed_checks();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].starts_with(CHECK_SIZE_FLOOR));
}

#[tokio::test]
async fn test_stale_artifact_only_warns() {
    let setup = TestConfigBuilder::new().build();
    let engine = Arc::new(FakeEngine::with_database(TEST_DATABASE, 3));
    let ctx = context(&setup, &engine);
    ctx.backup_service().backup_at(utc(2024, 3, 5, 1)).await;
    let artifact = ArtifactCatalog::new(setup.config.clone()).resolve("20240305").unwrap();
    let later = Utc::now() + Duration::hours(setup.config.stale_after_hours + 24);

    let report = ctx.verifier().verify_at(&artifact, AUDIT, later).await;

    assert_eq!(report.overall_status, VerificationStatus::Warning);
    let age = report.check(CHECK_AGE).unwrap();
    assert_eq!(age.result, CheckOutcome::Warn);
    assert!(age.advisory);
    assert!(report.failed_checks().is_empty());
}

#[tokio::test]
async fn test_light_mode_omits_age_and_test_restore() {
    let setup = TestConfigBuilder::new().build();
    let engine = Arc::new(FakeEngine::with_database(TEST_DATABASE, 3));
    let ctx = context(&setup, &engine);
    ctx.backup_service().backup_at(utc(2024, 3, 5, 1)).await;
    let artifact = ArtifactCatalog::new(setup.config.clone()).resolve("20240305").unwrap();

    let report = ctx.verifier().verify(&artifact, VerifyMode::Light).await;

    let names: Vec<&str> = report.checks.iter().map(|check| check.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            CHECK_EXISTENCE,
            CHECK_SIZE_FLOOR,
            CHECK_COMPRESSION,
            CHECK_ENCRYPTION,
            CHECK_CHECKSUM
        ]
    );
    assert_eq!(report.overall_status, VerificationStatus::Passed);
}

#[tokio::test]
async fn test_encrypted_artifact_without_key_fails_encryption_check() {
    let encrypted = TestConfigBuilder::new().with_fake_encryption("k3y").build();
    let engine = Arc::new(FakeEngine::with_database(TEST_DATABASE, 3));
    context(&encrypted, &engine)
        .backup_service()
        .backup_at(utc(2024, 3, 5, 1))
        .await;

    // Same backup root, no key configured
    let root = encrypted.root().to_path_buf();
    let keyless = TestConfigBuilder::new()
        .with_config(|config| config.storage.backup_dir = root)
        .build();
    let ctx = context(&keyless, &engine);
    let artifact = ArtifactCatalog::new(keyless.config.clone()).resolve("20240305").unwrap();

    let report = ctx.verifier().verify(&artifact, VerifyMode::Light).await;

    assert_eq!(report.check(CHECK_ENCRYPTION).unwrap().result, CheckOutcome::Fail);
    assert_eq!(report.check(CHECK_COMPRESSION).unwrap().result, CheckOutcome::Skip);
    assert_eq!(report.check(CHECK_CHECKSUM).unwrap().result, CheckOutcome::Pass);
    assert_eq!(report.overall_status, VerificationStatus::Failed);
}

#[tokio::test]
async fn test_latest_per_tier_picks_newest_of_each_tier() {
    let setup = TestConfigBuilder::new().build();
    let engine = Arc::new(FakeEngine::with_database(TEST_DATABASE, 3));
    let ctx = context(&setup, &engine);
    let service = ctx.backup_service();
    // monthly, weekly (Sunday), daily, daily
    for day in [1, 3, 4, 5] {
        service.backup_at(utc(2024, 3, day, 1)).await;
    }

    let summary = ctx
        .verifier()
        .run(VerifyTarget::LatestPerTier, AUDIT)
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.passed, 3);
    let mut seen: Vec<(Tier, String)> = summary
        .reports
        .iter()
        .map(|report| (report.tier, report.artifact_id.clone()))
        .collect();
    seen.sort_by_key(|(_, id)| id.clone());
    assert_eq!(
        seen,
        vec![
            (Tier::Monthly, "20240301_010000".to_string()),
            (Tier::Weekly, "20240303_010000".to_string()),
            (Tier::Daily, "20240305_010000".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_unknown_file_can_be_verified_by_path() {
    let setup = TestConfigBuilder::new().build();
    let engine = Arc::new(FakeEngine::new());
    let ctx = context(&setup, &engine);
    let path = setup.workspace().join("db_backup_20240305_010000.dump");
    std::fs::write(&path, dump_bytes(TEST_DATABASE, &["t".to_string()])).unwrap();
    let artifact = BackupArtifact::from_path(&path, ArtifactKind::Scheduled, Tier::Daily).unwrap();

    let report = ctx.verifier().verify(&artifact, VerifyMode::Light).await;

    assert_eq!(report.overall_status, VerificationStatus::Passed);
    assert_eq!(report.check(CHECK_CHECKSUM).unwrap().result, CheckOutcome::Skip);
}
