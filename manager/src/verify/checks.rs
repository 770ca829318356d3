// File: manager/src/verify/checks.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::artifact::{ArtifactKind, BackupArtifact, Tier, VerificationStatus};

pub const CHECK_EXISTENCE: &str = "existence";
pub const CHECK_SIZE_FLOOR: &str = "size_floor";
pub const CHECK_AGE: &str = "age";
pub const CHECK_COMPRESSION: &str = "compression";
pub const CHECK_ENCRYPTION: &str = "encryption";
pub const CHECK_CHECKSUM: &str = "checksum";
pub const CHECK_TEST_RESTORE: &str = "test_restore";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Fail,
    Warn,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub result: CheckOutcome,
    pub detail: String,
    /// Advisory checks can only ever warn
    pub advisory: bool,
}

impl CheckResult {
    pub fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckOutcome::Pass, detail, false)
    }

    pub fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckOutcome::Fail, detail, false)
    }

    pub fn skip(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckOutcome::Skip, detail, false)
    }

    pub fn advisory(name: &str, triggered: bool, detail: impl Into<String>) -> Self {
        let result = if triggered {
            CheckOutcome::Warn
        } else {
            CheckOutcome::Pass
        };
        Self::new(name, result, detail, true)
    }

    fn new(name: &str, result: CheckOutcome, detail: impl Into<String>, advisory: bool) -> Self {
        Self {
            name: name.to_string(),
            result,
            detail: detail.into(),
            advisory,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.result == CheckOutcome::Fail && !self.advisory
    }
}

/// Light runs after every backup; audit is invoked explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    Light,
    Audit { test_restore: bool },
}

impl VerifyMode {
    pub fn checks_age(&self) -> bool {
        matches!(self, VerifyMode::Audit { .. })
    }

    pub fn test_restore(&self) -> bool {
        matches!(self, VerifyMode::Audit { test_restore: true })
    }
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyMode::Light => f.write_str("light"),
            VerifyMode::Audit { test_restore: false } => f.write_str("audit"),
            VerifyMode::Audit { test_restore: true } => f.write_str("audit+test-restore"),
        }
    }
}

/// Outcome of one verification run over one artifact; never mutated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub artifact: PathBuf,
    pub artifact_id: String,
    pub kind: ArtifactKind,
    pub tier: Tier,
    pub mode: VerifyMode,
    pub checks: Vec<CheckResult>,
    pub overall_status: VerificationStatus,
    pub generated_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn new(
        artifact: &BackupArtifact,
        mode: VerifyMode,
        checks: Vec<CheckResult>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let overall_status = aggregate(&checks);
        Self {
            artifact: artifact.path().to_path_buf(),
            artifact_id: artifact.id().to_string(),
            kind: artifact.kind(),
            tier: artifact.tier(),
            mode,
            checks,
            overall_status,
            generated_at,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.overall_status == VerificationStatus::Failed
    }

    pub fn failed_checks(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|check| check.is_fatal())
            .map(|check| format!("{} ({})", check.name, check.detail))
            .collect()
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|check| check.name == name)
    }
}

/// FAILED if any non-advisory check failed, WARNING if only advisory checks
/// fired, PASSED otherwise
pub fn aggregate(checks: &[CheckResult]) -> VerificationStatus {
    if checks.iter().any(CheckResult::is_fatal) {
        VerificationStatus::Failed
    } else if checks.iter().any(|c| c.result == CheckOutcome::Warn) {
        VerificationStatus::Warning
    } else {
        VerificationStatus::Passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate() {
        let passing = vec![
            CheckResult::pass(CHECK_EXISTENCE, "ok"),
            CheckResult::skip(CHECK_ENCRYPTION, "not encrypted"),
        ];
        assert_eq!(aggregate(&passing), VerificationStatus::Passed);

        let mut stale = passing.clone();
        stale.push(CheckResult::advisory(CHECK_AGE, true, "72h old"));
        assert_eq!(aggregate(&stale), VerificationStatus::Warning);

        let mut broken = stale.clone();
        broken.push(CheckResult::fail(CHECK_CHECKSUM, "mismatch"));
        assert_eq!(aggregate(&broken), VerificationStatus::Failed);
    }

    #[test]
    fn test_advisory_never_fatal() {
        let check = CheckResult::advisory(CHECK_AGE, true, "old");
        assert!(!check.is_fatal());
        assert_eq!(check.result, CheckOutcome::Warn);
    }
}
