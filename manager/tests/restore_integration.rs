//! Integration Tests: Restore engine
//!
//! Staging, swap, post-swap check and rollback against the in-memory
//! engine. Production starts with 8 tables; the stored artifact has 5.

mod common;

use backup_manager::engine::DatabaseEngine;
use backup_manager::errors::{IntegrityError, LockError, RestoreError};
use backup_manager::outcome::RunOutcome;
use backup_manager::restore::{AutoConfirm, RestoreEngine, RestoreOptions, RestoreStatus};
use backup_manager::run_lock::RunLock;
use common::fixtures::*;
use std::sync::Arc;

const ARTIFACT_TABLES: usize = 5;
const PRODUCTION_TABLES: usize = 8;
const ARTIFACT_ID: &str = "20240305_010000";

struct Scenario {
    setup: TestConfig,
    engine: Arc<FakeEngine>,
    restore: RestoreEngine,
}

async fn scenario_with(builder: TestConfigBuilder, confirm: bool) -> Scenario {
    let setup = builder.build();
    let engine = Arc::new(FakeEngine::with_database(TEST_DATABASE, ARTIFACT_TABLES));
    let ctx = context(&setup, &engine);

    let report = ctx.backup_service().backup_at(utc(2024, 3, 5, 1)).await;
    assert_eq!(report.outcome, RunOutcome::Success, "{:?}", report.error);

    // Production moved on after the backup
    engine.seed(TEST_DATABASE, PRODUCTION_TABLES);

    let restore = ctx.restore_engine(Arc::new(AutoConfirm(confirm)));
    Scenario {
        setup,
        engine,
        restore,
    }
}

async fn scenario() -> Scenario {
    scenario_with(TestConfigBuilder::new(), true).await
}

fn unattended() -> RestoreOptions {
    RestoreOptions {
        skip_confirmation: true,
        ..Default::default()
    }
}

fn production_tables(engine: &FakeEngine) -> Option<usize> {
    engine.tables(TEST_DATABASE).map(|tables| tables.len())
}

fn no_scratch_left(engine: &FakeEngine) -> bool {
    engine
        .database_names()
        .iter()
        .all(|name| !name.contains("_restore_") && !name.starts_with("verify_"))
}

#[tokio::test]
async fn test_restore_commits_and_keeps_snapshot() {
    let s = scenario().await;

    let report = s.restore.restore(ARTIFACT_ID, unattended()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Success, "{:?}", report.error);
    assert_eq!(report.final_status(), RestoreStatus::Committed);
    assert_eq!(production_tables(&s.engine), Some(ARTIFACT_TABLES));
    assert_eq!(report.session.tables_before(), Some(PRODUCTION_TABLES as i64));
    assert_eq!(report.session.tables_after(), Some(ARTIFACT_TABLES as i64));
    assert!(report.session.pre_restore_snapshot().is_some());
    assert_eq!(s.setup.files_in("pre_restore").len(), 2, "snapshot and checksum");
    assert!(no_scratch_left(&s.engine));
    assert!(s.setup.files_in("staging").is_empty());

    let visited: Vec<RestoreStatus> = report.session.history().iter().map(|c| c.status).collect();
    assert_eq!(
        visited,
        vec![
            RestoreStatus::Pending,
            RestoreStatus::Snapshotting,
            RestoreStatus::Staging,
            RestoreStatus::Swapping,
            RestoreStatus::Verifying,
            RestoreStatus::Committed,
        ]
    );
}

#[tokio::test]
async fn test_staging_failure_leaves_production_untouched() {
    let s = scenario().await;
    // Truncated, uncompressed dump: passes the light checks, breaks pg_restore
    let mut bytes = dump_bytes(TEST_DATABASE, &["a".to_string()]);
    bytes.truncate(2000);
    std::fs::write(
        s.setup.root().join("daily/db_backup_20240306_010000.dump"),
        bytes,
    )
    .unwrap();

    let report = s.restore.restore("20240306_010000", unattended()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Failure);
    assert_eq!(report.final_status(), RestoreStatus::Failed);
    assert!(report.session.visited(RestoreStatus::Staging));
    assert!(!report.session.visited(RestoreStatus::Swapping));
    assert!(!report.rolled_back);
    assert!(!report.manual_recovery_required);
    assert_eq!(production_tables(&s.engine), Some(PRODUCTION_TABLES));
    assert!(!s.engine.calls().contains(&format!("drop {}", TEST_DATABASE)));
    assert!(no_scratch_left(&s.engine));
}

#[tokio::test]
async fn test_scratch_restore_failure_never_rolls_back() {
    let s = scenario().await;
    s.engine.fail(Failure::RestoreIntoScratch);

    let report = s.restore.restore(ARTIFACT_ID, unattended()).await.unwrap();

    assert_eq!(report.final_status(), RestoreStatus::Failed);
    assert!(!report.rolled_back);
    assert_eq!(production_tables(&s.engine), Some(PRODUCTION_TABLES));
}

#[tokio::test]
async fn test_failed_post_swap_check_rolls_back_to_snapshot() {
    let s = scenario().await;
    s.engine.fail(Failure::EmptyAfterRename);

    let report = s.restore.restore(ARTIFACT_ID, unattended()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Failure);
    assert_eq!(report.final_status(), RestoreStatus::RolledBack);
    assert!(report.rolled_back);
    assert!(report.session.visited(RestoreStatus::Verifying));
    assert_eq!(production_tables(&s.engine), Some(PRODUCTION_TABLES));
    assert_eq!(
        report.session.tables_after(),
        report.session.tables_before(),
        "rollback must restore the pre-restore table count"
    );
    assert!(no_scratch_left(&s.engine));
}

#[tokio::test]
async fn test_failed_swap_rolls_back_after_production_was_dropped() {
    let s = scenario().await;
    s.engine.fail(Failure::Rename);

    let report = s.restore.restore(ARTIFACT_ID, unattended()).await.unwrap();

    assert_eq!(report.final_status(), RestoreStatus::RolledBack);
    assert!(report.session.production_mutated());
    assert_eq!(production_tables(&s.engine), Some(PRODUCTION_TABLES));
    assert!(no_scratch_left(&s.engine));
}

#[tokio::test]
async fn test_failed_swap_without_rollback_requires_manual_recovery() {
    let s = scenario().await;
    s.engine.fail(Failure::Rename);
    let options = RestoreOptions {
        rollback_enabled: false,
        ..unattended()
    };

    let report = s.restore.restore(ARTIFACT_ID, options).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Failure);
    assert_eq!(report.final_status(), RestoreStatus::Failed);
    assert!(report.manual_recovery_required);
    assert!(report
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("manual recovery required"));
}

#[tokio::test]
async fn test_declined_confirmation_aborts_before_swap() {
    let s = scenario_with(TestConfigBuilder::new(), false).await;

    let report = s
        .restore
        .restore(ARTIFACT_ID, RestoreOptions::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Failure);
    assert!(!report.session.visited(RestoreStatus::Swapping));
    assert!(report.error.as_deref().unwrap_or_default().contains("declined"));
    assert_eq!(production_tables(&s.engine), Some(PRODUCTION_TABLES));
    assert!(!s.engine.called(&format!("terminate {}", TEST_DATABASE)));
    assert!(no_scratch_left(&s.engine));
}

#[tokio::test]
async fn test_skipped_snapshot_is_a_warning() {
    let s = scenario().await;
    let options = RestoreOptions {
        skip_snapshot: true,
        ..unattended()
    };

    let report = s.restore.restore(ARTIFACT_ID, options).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::SuccessWithWarnings);
    assert!(report.session.snapshot_skipped());
    assert!(report.session.pre_restore_snapshot().is_none());
    assert!(s.setup.files_in("pre_restore").is_empty());
}

#[tokio::test]
async fn test_restore_into_missing_database_needs_no_snapshot() {
    let s = scenario().await;
    s.engine.drop_database(TEST_DATABASE).await.unwrap();

    let report = s.restore.restore(ARTIFACT_ID, unattended()).await.unwrap();

    assert_eq!(report.final_status(), RestoreStatus::Committed);
    assert!(report.session.snapshot_skipped());
    assert!(report.session.production_created());
    assert_eq!(production_tables(&s.engine), Some(ARTIFACT_TABLES));
}

#[tokio::test]
async fn test_failed_check_removes_production_it_created() {
    let s = scenario().await;
    s.engine.drop_database(TEST_DATABASE).await.unwrap();
    s.engine.fail(Failure::EmptyAfterRename);

    let report = s.restore.restore(ARTIFACT_ID, unattended()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Failure);
    assert!(report.session.visited(RestoreStatus::Verifying));
    assert!(report.session.production_mutated());
    assert_eq!(report.final_status(), RestoreStatus::RolledBack);
    assert!(report.rolled_back);
    assert!(!report.manual_recovery_required);
    assert_eq!(
        production_tables(&s.engine),
        None,
        "an empty database must not be left under the production name"
    );
    assert!(no_scratch_left(&s.engine));
}

#[tokio::test]
async fn test_created_production_without_rollback_requires_manual_recovery() {
    let s = scenario().await;
    s.engine.drop_database(TEST_DATABASE).await.unwrap();
    s.engine.fail(Failure::EmptyAfterRename);
    let options = RestoreOptions {
        rollback_enabled: false,
        ..unattended()
    };

    let report = s.restore.restore(ARTIFACT_ID, options).await.unwrap();

    assert_eq!(report.final_status(), RestoreStatus::Failed);
    assert!(report.manual_recovery_required);
    assert_eq!(production_tables(&s.engine), Some(0));
}

#[tokio::test]
async fn test_swap_survives_client_reconnecting_after_terminate() {
    let s = scenario().await;
    s.engine.fail(Failure::ClientReconnects);

    let report = s.restore.restore(ARTIFACT_ID, unattended()).await.unwrap();

    assert_eq!(report.final_status(), RestoreStatus::Committed, "{:?}", report.error);
    assert!(s.engine.called(&format!("force_drop {}", TEST_DATABASE)));
    assert_eq!(production_tables(&s.engine), Some(ARTIFACT_TABLES));
}

#[tokio::test]
async fn test_encrypted_artifact_restores() {
    let s = scenario_with(TestConfigBuilder::new().with_fake_encryption("k3y"), true).await;

    let report = s.restore.restore(ARTIFACT_ID, unattended()).await.unwrap();

    assert_eq!(report.final_status(), RestoreStatus::Committed, "{:?}", report.error);
    assert!(report
        .session
        .pre_restore_snapshot()
        .map(|snapshot| snapshot.is_encrypted())
        .unwrap_or(false));
    assert!(s.setup.files_in("staging").is_empty());
}

#[tokio::test]
async fn test_undersized_artifact_is_refused_as_source() {
    let s = scenario().await;
    std::fs::write(
        s.setup.root().join("daily/db_backup_20240307_010000.dump.gz"),
        vec![0u8; 500],
    )
    .unwrap();

    let result = s.restore.restore("20240307_010000", unattended()).await;

    assert!(matches!(
        result,
        Err(RestoreError::ArtifactRejected(IntegrityError::VerificationFailed { .. }))
    ));
    assert_eq!(production_tables(&s.engine), Some(PRODUCTION_TABLES));
}

#[tokio::test]
async fn test_unknown_reference_is_rejected() {
    let s = scenario().await;

    let result = s.restore.restore("19990101", unattended()).await;

    assert!(matches!(
        result,
        Err(RestoreError::ArtifactRejected(IntegrityError::NotFound { .. }))
    ));
}

#[tokio::test]
async fn test_restore_refused_while_database_is_locked() {
    let s = scenario().await;
    let _held = RunLock::acquire(&s.setup.config.locks_dir(), TEST_DATABASE, "backup").unwrap();

    let result = s.restore.restore(ARTIFACT_ID, unattended()).await;

    assert!(matches!(result, Err(RestoreError::Lock(LockError::Busy { .. }))));
    assert_eq!(production_tables(&s.engine), Some(PRODUCTION_TABLES));
}

#[tokio::test]
async fn test_restore_report_is_persisted() {
    let s = scenario().await;

    s.restore.restore(ARTIFACT_ID, unattended()).await.unwrap();

    assert!(s
        .setup
        .files_in("reports")
        .iter()
        .any(|name| name.starts_with("restore_") && name.ends_with(".json")));
}
