//! Error types for file operations.

use std::path::PathBuf;

use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::OperationKind;

/// Reasons an operation is rejected before anything is touched.
#[derive(Debug, Error)]
pub enum PermissionError {
    /// The source cannot be stat'ed.
    #[error("Cannot access source {path}: {source}")]
    SourceUnreachable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The caller cannot read the source.
    #[error("No read permission on source {path}: {errno}")]
    NoReadAccess {
        path: PathBuf,
        #[source]
        errno: Errno,
    },

    /// The caller cannot modify the directory holding the source.
    #[error("No write permission on source directory {path}: {errno}")]
    NoWriteAccessSource {
        path: PathBuf,
        #[source]
        errno: Errno,
    },

    /// The directory the destination would live in does not exist.
    #[error("Destination directory does not exist: {path}")]
    DestinationDirMissing { path: PathBuf },

    /// The destination (or its directory) cannot be stat'ed for another reason.
    #[error("Cannot access destination {path}: {source}")]
    DestinationUnreachable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The caller cannot write into the destination directory.
    #[error("No write permission on destination directory {path}: {errno}")]
    NoWriteAccessDestination {
        path: PathBuf,
        #[source]
        errno: Errno,
    },

    /// Something already exists at the destination.
    #[error("Destination already exists: {path}")]
    DestinationCollision { path: PathBuf },

    /// The destination lies inside the source directory.
    #[error("Cannot put {path} inside itself at {destination}")]
    DestinationInsideSource { path: PathBuf, destination: PathBuf },
}

impl PermissionError {
    /// The path the check failed on.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::SourceUnreachable { path, .. }
            | Self::NoReadAccess { path, .. }
            | Self::NoWriteAccessSource { path, .. }
            | Self::DestinationDirMissing { path }
            | Self::DestinationUnreachable { path, .. }
            | Self::NoWriteAccessDestination { path, .. }
            | Self::DestinationCollision { path }
            | Self::DestinationInsideSource { path, .. } => path,
        }
    }
}

/// Fieldless tag for [`OperationError`], for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Permission,
    Backup,
    Execution,
    Cancelled,
    RolledBack,
    Restore,
    AlreadyStarted,
    InvalidName,
}

/// Errors surfaced by the operation pipeline.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Validation rejected the operation. Nothing was modified.
    #[error("Permission check failed: {0}")]
    Permission(#[from] PermissionError),

    /// Snapshotting the source failed. Nothing was modified.
    #[error("Failed to create backup of {path}: {source}")]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The mutation kept failing until the attempt limit was reached.
    #[error("{kind} failed after {attempts} attempt(s): {source}")]
    Execution {
        kind: OperationKind,
        attempts: u32,
        source: std::io::Error,
    },

    /// The operation was cancelled before it could succeed.
    ///
    /// `last` holds the failure of the final attempt, if one was made.
    #[error("{kind} cancelled after {attempts} attempt(s){}", last_failure(.last))]
    Cancelled {
        kind: OperationKind,
        attempts: u32,
        #[source]
        last: Option<std::io::Error>,
    },

    /// Execution failed, and the source was reinstated from its backup.
    #[error("{source}; original state restored from backup")]
    RolledBack {
        #[source]
        source: Box<OperationError>,
    },

    /// Execution failed and reinstating the backup failed too.
    ///
    /// The source may be in a partial state. The backup is left in place.
    #[error(
        "Restore of {original_path} from {backup_path} failed: {restore} (original failure: {original})"
    )]
    Restore {
        backup_path: PathBuf,
        original_path: PathBuf,
        #[source]
        restore: std::io::Error,
        original: Box<OperationError>,
    },

    /// `execute` was called on a controller that already ran.
    #[error("Operation has already been started")]
    AlreadyStarted,

    /// A rename target name is not a valid file name.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

impl OperationError {
    /// The kind tag of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Permission(_) => FailureKind::Permission,
            Self::Backup { .. } => FailureKind::Backup,
            Self::Execution { .. } => FailureKind::Execution,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::RolledBack { .. } => FailureKind::RolledBack,
            Self::Restore { .. } => FailureKind::Restore,
            Self::AlreadyStarted => FailureKind::AlreadyStarted,
            Self::InvalidName { .. } => FailureKind::InvalidName,
        }
    }

    /// The failure that started the recovery, for rolled-back and restore errors.
    pub fn original(&self) -> Option<&OperationError> {
        match self {
            Self::RolledBack { source } => Some(source),
            Self::Restore { original, .. } => Some(original),
            _ => None,
        }
    }

    /// Whether the user's data is known to be as it was before the operation.
    pub fn is_recovered(&self) -> bool {
        !matches!(self, Self::Restore { .. })
    }
}

fn last_failure(last: &Option<std::io::Error>) -> String {
    last.as_ref()
        .map(|err| format!(" (last failure: {err})"))
        .unwrap_or_default()
}

/// Errors reading or writing the pipeline configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No per-user configuration directory could be determined.
    #[error("No configuration directory available")]
    NoConfigDir,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}
