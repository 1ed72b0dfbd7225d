//! File operation pipeline for arborist.
//!
//! This crate executes move, copy, delete, and rename requests one at a
//! time. Each request is checked for permissions, the source is backed up
//! before destructive work, the mutation is retried with linear backoff, and
//! a failed mutation is rolled back from the backup. Progress and stage
//! changes are published as snapshots for a status display.

mod backup;
mod controller;
mod copy;
mod fs;
mod progress;
mod retry;
mod validate;

pub use backup::{BackupManager, backup_path_for, is_backup_path};
pub use controller::OperationController;
pub use copy::{Copier, CopyStats, count_entries};
pub use fs::{FileSystem, StdFs, remove_path};
pub use progress::{
    BACKED_UP_PROGRESS, COMPLETED_PROGRESS, EXECUTING_CEILING, EXECUTING_PROGRESS,
    VALIDATED_PROGRESS,
};
pub use retry::{RetryError, RetryPolicy};
pub use validate::validate;
