//! Shared types for the orchestration pipeline.
//!
//! These types define stable contracts between pipeline stages. They carry no
//! I/O and serialize deterministically into run transcripts.

use serde::{Deserialize, Serialize};

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Plan,
    Implement,
    Validate,
    Repair,
    Document,
    Publish,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Implement => "implement",
            Stage::Validate => "validate",
            Stage::Repair => "repair",
            Stage::Document => "document",
            Stage::Publish => "publish",
        }
    }
}

/// Terminal status of a completed run.
///
/// Every run that reaches publish ends in exactly one of these; the status
/// drives the wording of the single terminal notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Implementation produced files and validation passed first try.
    Success,
    /// Implementation produced no files; validation was skipped.
    NoFiles,
    /// Validation failed, then passed after repair.
    Repaired,
    /// Repair attempts were exhausted without validation passing.
    RepairFailed,
    /// Nothing landed in the working tree, so no commit was made.
    NoChanges,
}

impl RunStatus {
    pub fn describe(self) -> &'static str {
        match self {
            RunStatus::Success => "validation passed",
            RunStatus::NoFiles => "no implementation files produced",
            RunStatus::Repaired => "repaired after failed validation",
            RunStatus::RepairFailed => "repair attempts exhausted, needs human review",
            RunStatus::NoChanges => "nothing to commit",
        }
    }
}

/// Outcome of one test-suite invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub passed: bool,
    pub log: String,
}
