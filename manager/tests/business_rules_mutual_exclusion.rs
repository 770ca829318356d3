//! Business Rule Tests: Mutual Exclusion
//!
//! Only one backup, restore or prune may run against a database at a time.
//! A second run is refused immediately and told who holds the lock.

mod common;

use backup_manager::errors::LockError;
use backup_manager::outcome::RunOutcome;
use backup_manager::run_lock::RunLock;
use backup_manager::services::BackupStep;
use common::fixtures::*;
use std::sync::Arc;

#[test]
fn test_second_run_is_refused_with_holder_details() {
    let setup = TestConfigBuilder::new().build();
    let locks = setup.config.locks_dir();

    let _first = RunLock::acquire(&locks, TEST_DATABASE, "restore").expect("First run should lock");

    match RunLock::acquire(&locks, TEST_DATABASE, "backup") {
        Err(LockError::Busy { database, holder }) => {
            assert_eq!(database, TEST_DATABASE);
            assert!(holder.contains("restore"), "holder should name the running operation: {}", holder);
            assert!(
                holder.contains(&std::process::id().to_string()),
                "holder should name the pid: {}",
                holder
            );
        }
        Err(other) => panic!("expected Busy, got {}", other),
        Ok(_) => panic!("second run must be refused"),
    }
}

#[test]
fn test_every_operation_type_is_blocked() {
    let setup = TestConfigBuilder::new().build();
    let locks = setup.config.locks_dir();
    let _held = RunLock::acquire(&locks, TEST_DATABASE, "prune").unwrap();

    for operation in ["backup", "restore", "prune"] {
        let result = RunLock::acquire(&locks, TEST_DATABASE, operation);
        assert!(
            matches!(result, Err(LockError::Busy { .. })),
            "{} should be blocked",
            operation
        );
    }
}

#[test]
fn test_lock_released_on_drop() {
    let setup = TestConfigBuilder::new().build();
    let locks = setup.config.locks_dir();

    {
        let lease = RunLock::acquire(&locks, TEST_DATABASE, "backup").unwrap();
        assert_eq!(lease.database(), TEST_DATABASE);
        assert_eq!(lease.lease().operation, "backup");
    }

    let again = RunLock::acquire(&locks, TEST_DATABASE, "restore");
    assert!(again.is_ok(), "lock should be free after the lease dropped");
}

#[test]
fn test_different_databases_are_independent() {
    let setup = TestConfigBuilder::new().build();
    let locks = setup.config.locks_dir();

    let _shop = RunLock::acquire(&locks, TEST_DATABASE, "backup").unwrap();
    let other = RunLock::acquire(&locks, "analytics", "backup");

    assert!(other.is_ok(), "a lock on one database must not block another");
}

#[tokio::test]
async fn test_backup_refused_while_locked_leaves_no_artifact() {
    let setup = TestConfigBuilder::new().build();
    let engine = Arc::new(FakeEngine::with_database(TEST_DATABASE, 3));
    let ctx = context(&setup, &engine);
    let held = RunLock::acquire(&setup.config.locks_dir(), TEST_DATABASE, "restore").unwrap();

    let refused = ctx.backup_service().backup_at(utc(2024, 3, 5, 1)).await;

    assert_eq!(refused.outcome, RunOutcome::Failure);
    assert_eq!(refused.failed_step, Some(BackupStep::Lock));
    assert!(!engine.called("dump"), "no dump may start without the lock");
    assert!(setup.files_in("daily").is_empty());

    drop(held);
    let retried = ctx.backup_service().backup_at(utc(2024, 3, 5, 1)).await;
    assert_eq!(retried.outcome, RunOutcome::Success, "{:?}", retried.error);
}
