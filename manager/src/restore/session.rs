// File: manager/src/restore/session.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::artifact::BackupArtifact;
use crate::errors::RestoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Pending,
    Snapshotting,
    Staging,
    Swapping,
    Verifying,
    Committed,
    RolledBack,
    Failed,
}

impl RestoreStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RestoreStatus::Committed | RestoreStatus::RolledBack | RestoreStatus::Failed
        )
    }

    fn allows(&self, next: RestoreStatus) -> bool {
        use RestoreStatus::*;
        match (self, next) {
            (Pending, Snapshotting)
            | (Snapshotting, Staging)
            | (Staging, Swapping)
            | (Swapping, Verifying)
            | (Swapping, Committed)
            | (Verifying, Committed)
            | (Failed, RolledBack) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RestoreStatus::Pending => "pending",
            RestoreStatus::Snapshotting => "snapshotting",
            RestoreStatus::Staging => "staging",
            RestoreStatus::Swapping => "swapping",
            RestoreStatus::Verifying => "verifying",
            RestoreStatus::Committed => "committed",
            RestoreStatus::RolledBack => "rolled_back",
            RestoreStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub status: RestoreStatus,
    pub at: DateTime<Utc>,
}

/// One restore attempt. Moves strictly forward; the failure path may fork
/// to `rolled_back` when a pre-restore snapshot exists.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreSession {
    id: Uuid,
    target_artifact: BackupArtifact,
    target_database: String,
    scratch_database: String,
    pre_restore_snapshot: Option<BackupArtifact>,
    snapshot_skipped: bool,
    production_mutated: bool,
    production_created: bool,
    tables_before: Option<i64>,
    tables_after: Option<i64>,
    status: RestoreStatus,
    history: Vec<StatusChange>,
}

impl RestoreSession {
    pub fn new(target_artifact: BackupArtifact, target_database: &str, scratch_database: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_artifact,
            target_database: target_database.to_string(),
            scratch_database,
            pre_restore_snapshot: None,
            snapshot_skipped: false,
            production_mutated: false,
            production_created: false,
            tables_before: None,
            tables_after: None,
            status: RestoreStatus::Pending,
            history: vec![StatusChange {
                status: RestoreStatus::Pending,
                at: Utc::now(),
            }],
        }
    }

    /// Move to `next`. Entering `swapping` requires a snapshot or an
    /// acknowledged skip; `rolled_back` requires a snapshot, or a production
    /// database this session created and can simply remove again.
    pub fn advance(&mut self, next: RestoreStatus) -> Result<(), RestoreError> {
        if !self.status.allows(next) {
            return Err(RestoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let guarded = match next {
            RestoreStatus::Swapping => {
                self.pre_restore_snapshot.is_none() && !self.snapshot_skipped
            }
            RestoreStatus::RolledBack => {
                self.pre_restore_snapshot.is_none() && !self.production_created
            }
            _ => false,
        };
        if guarded {
            return Err(RestoreError::SnapshotRequired {
                database: self.target_database.clone(),
            });
        }

        self.status = next;
        self.history.push(StatusChange {
            status: next,
            at: Utc::now(),
        });
        Ok(())
    }

    pub fn attach_snapshot(&mut self, snapshot: BackupArtifact) {
        self.pre_restore_snapshot = Some(snapshot);
    }

    /// Proceed without a rollback point
    pub fn acknowledge_skip(&mut self) {
        self.snapshot_skipped = true;
    }

    pub(crate) fn mark_production_mutated(&mut self) {
        self.production_mutated = true;
    }

    /// Production did not exist before this session put the scratch
    /// database in its place
    pub(crate) fn mark_production_created(&mut self) {
        self.production_mutated = true;
        self.production_created = true;
    }

    pub(crate) fn record_tables_before(&mut self, count: i64) {
        self.tables_before = Some(count);
    }

    pub(crate) fn record_tables_after(&mut self, count: i64) {
        self.tables_after = Some(count);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> RestoreStatus {
        self.status
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    pub fn target_artifact(&self) -> &BackupArtifact {
        &self.target_artifact
    }

    pub fn target_database(&self) -> &str {
        &self.target_database
    }

    pub fn scratch_database(&self) -> &str {
        &self.scratch_database
    }

    pub fn pre_restore_snapshot(&self) -> Option<&BackupArtifact> {
        self.pre_restore_snapshot.as_ref()
    }

    pub fn snapshot_skipped(&self) -> bool {
        self.snapshot_skipped
    }

    pub fn production_mutated(&self) -> bool {
        self.production_mutated
    }

    pub fn production_created(&self) -> bool {
        self.production_created
    }

    pub fn tables_before(&self) -> Option<i64> {
        self.tables_before
    }

    pub fn tables_after(&self) -> Option<i64> {
        self.tables_after
    }

    pub fn visited(&self, status: RestoreStatus) -> bool {
        self.history.iter().any(|change| change.status == status)
    }
}
