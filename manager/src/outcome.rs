use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::exit_codes;

/// Ternary result of every operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failure,
    SuccessWithWarnings,
}

impl RunOutcome {
    /// Success, downgraded when there were warnings
    pub fn from_warnings(warnings: &[String]) -> Self {
        if warnings.is_empty() {
            RunOutcome::Success
        } else {
            RunOutcome::SuccessWithWarnings
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => exit_codes::SUCCESS,
            RunOutcome::Failure => exit_codes::FAILURE,
            RunOutcome::SuccessWithWarnings => exit_codes::SUCCESS_WITH_WARNINGS,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failure)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunOutcome::Success => "success",
            RunOutcome::Failure => "failure",
            RunOutcome::SuccessWithWarnings => "success_with_warnings",
        };
        f.write_str(label)
    }
}
