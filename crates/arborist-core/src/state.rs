//! Observable state of an in-flight operation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::OperationKind;

/// Position of an operation in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
pub enum Stage {
    Init,
    Validated,
    BackedUp,
    Executing,
    Completed,
    Failed,
    Restored,
}

impl Stage {
    /// Short label for status displays.
    pub fn description(self) -> &'static str {
        match self {
            Self::Init => "Preparing",
            Self::Validated => "Validated",
            Self::BackedUp => "Backed up",
            Self::Executing => "Executing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Restored => "Restored",
        }
    }

    /// Whether `next` is a legal successor of this stage.
    ///
    /// Stages only move forward; `BackedUp` is skipped for copies and
    /// `Restored` is only reachable from `Failed`.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Init, Validated)
                | (Init, Failed)
                | (Validated, BackedUp)
                | (Validated, Executing)
                | (Validated, Failed)
                | (BackedUp, Executing)
                | (BackedUp, Failed)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Failed, Restored)
        )
    }
}

/// How a finished operation left the user's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum Outcome {
    /// The pipeline has not returned yet.
    InProgress,
    /// The operation succeeded.
    Completed,
    /// The operation failed before anything was changed.
    FailedUnchanged,
    /// The operation failed and the source was restored from its backup.
    Restored,
    /// The operation failed and restoring the backup failed as well.
    FailedUnrecovered,
}

/// Snapshot of one operation's progress through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationState {
    /// The kind of operation.
    pub kind: OperationKind,
    /// Current pipeline stage.
    pub stage: Stage,
    /// Location of the source snapshot, while one exists.
    pub backup_path: Option<PathBuf>,
    /// Number of execution attempts made so far.
    pub retry_count: u32,
    /// Attempt limit for this operation.
    pub max_retries: u32,
    /// Rendered message of the most recent failure.
    pub last_error: Option<String>,
    /// When the operation was created.
    pub start_time: DateTime<Utc>,
    /// Overall progress, 0.0 to 100.0.
    pub progress: f64,
    /// Set once the pipeline has returned to its caller.
    pub finished: bool,
}

impl OperationState {
    /// Create the initial state for an operation.
    pub fn new(kind: OperationKind, max_retries: u32) -> Self {
        Self {
            kind,
            stage: Stage::Init,
            backup_path: None,
            retry_count: 0,
            max_retries,
            last_error: None,
            start_time: Utc::now(),
            progress: 0.0,
            finished: false,
        }
    }

    /// Classify the state into one of the user-facing outcomes.
    pub fn outcome(&self) -> Outcome {
        if !self.finished {
            return Outcome::InProgress;
        }
        match self.stage {
            Stage::Completed => Outcome::Completed,
            Stage::Restored => Outcome::Restored,
            Stage::Failed if self.backup_path.is_some() => Outcome::FailedUnrecovered,
            _ => Outcome::FailedUnchanged,
        }
    }

    /// Time since the operation was created.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.start_time)
    }

    /// Human-readable status line for the current stage.
    pub fn status_message(&self) -> String {
        match self.stage {
            Stage::Init => "Preparing operation...".to_string(),
            Stage::Validated => "Permissions validated".to_string(),
            Stage::BackedUp => "Backup created".to_string(),
            Stage::Executing => format!(
                "Executing {} operation (attempt {}/{})",
                self.kind,
                self.retry_count.max(1),
                self.max_retries
            ),
            Stage::Completed => "Operation completed successfully".to_string(),
            Stage::Failed => match (&self.backup_path, &self.last_error) {
                (Some(backup), Some(err)) if self.finished => format!(
                    "Operation failed and could not be rolled back, backup kept at {}: {}",
                    backup.display(),
                    err
                ),
                (_, Some(err)) => format!("Operation failed: {}", err),
                (_, None) => "Operation failed".to_string(),
            },
            Stage::Restored => "Operation failed, backup restored".to_string(),
        }
    }
}
