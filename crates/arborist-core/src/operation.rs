//! File operation requests.

use std::path::{Path, PathBuf};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::OperationError;

/// The kind of mutation an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Move,
    Copy,
    Delete,
    Rename,
}

impl OperationKind {
    /// Whether the operation removes or renames the source entry.
    ///
    /// Destructive operations need write access on the source's parent and
    /// get a backup before they run.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Move | Self::Delete | Self::Rename)
    }

    /// Whether the destination directory is checked before running.
    pub fn checks_destination_dir(self) -> bool {
        matches!(self, Self::Move | Self::Copy)
    }
}

/// The filesystem entry an operation acts on, as the browser saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File/directory name (not full path).
    pub name: CompactString,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Whether the entry is a symbolic link.
    pub is_symlink: bool,
}

impl FileEntry {
    /// Create an entry description.
    pub fn new(name: impl Into<CompactString>, is_dir: bool) -> Self {
        Self {
            name: name.into(),
            is_dir,
            is_symlink: false,
        }
    }

    /// Describe the entry at `path` without following symlinks.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::symlink_metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self {
            name: name.into(),
            is_dir: metadata.is_dir(),
            is_symlink: metadata.file_type().is_symlink(),
        })
    }
}

/// An immutable, confirmed file operation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    kind: OperationKind,
    source: PathBuf,
    destination: Option<PathBuf>,
    entry: FileEntry,
}

impl Operation {
    /// Create a copy operation. `destination` is the full target path.
    pub fn copy(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, entry: FileEntry) -> Self {
        Self {
            kind: OperationKind::Copy,
            source: source.into(),
            destination: Some(destination.into()),
            entry,
        }
    }

    /// Create a move operation. `destination` is the full target path.
    pub fn move_to(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        entry: FileEntry,
    ) -> Self {
        Self {
            kind: OperationKind::Move,
            source: source.into(),
            destination: Some(destination.into()),
            entry,
        }
    }

    /// Create a delete operation.
    pub fn delete(source: impl Into<PathBuf>, entry: FileEntry) -> Self {
        Self {
            kind: OperationKind::Delete,
            source: source.into(),
            destination: None,
            entry,
        }
    }

    /// Create a rename operation targeting `new_name` in the source's directory.
    pub fn rename(
        source: impl Into<PathBuf>,
        new_name: &str,
        entry: FileEntry,
    ) -> Result<Self, OperationError> {
        validate_filename(new_name).map_err(|reason| OperationError::InvalidName {
            name: new_name.to_string(),
            reason,
        })?;

        let source = source.into();
        let parent = source.parent().unwrap_or(Path::new(""));
        let destination = parent.join(new_name);

        Ok(Self {
            kind: OperationKind::Rename,
            source,
            destination: Some(destination),
            entry,
        })
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The target path; `None` for deletions.
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn entry(&self) -> &FileEntry {
        &self.entry
    }
}

/// Validate a filename for cross-platform compatibility.
pub fn validate_filename(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name cannot be empty".into());
    }

    if name.len() > 255 {
        return Err("Name is too long (max 255 bytes)".into());
    }

    for c in ['/', '\0'] {
        if name.contains(c) {
            return Err(format!("Name cannot contain '{}'", c.escape_default()));
        }
    }

    if name == "." || name == ".." {
        return Err("'.' and '..' are reserved names".into());
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return Err("Name cannot start or end with spaces".into());
    }

    if name.ends_with('.') {
        return Err("Name cannot end with a dot".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename_valid() {
        assert!(validate_filename("test.txt").is_ok());
        assert!(validate_filename("my-file").is_ok());
        assert!(validate_filename(".hidden").is_ok());
        assert!(validate_filename("file with spaces").is_ok());
    }

    #[test]
    fn test_validate_filename_invalid() {
        assert!(validate_filename("").is_err());
        assert!(validate_filename("test/file").is_err());
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("file ").is_err());
        assert!(validate_filename(" file").is_err());
        assert!(validate_filename("file.").is_err());
        assert!(validate_filename(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_rename_targets_sibling() {
        let op = Operation::rename("/home/user/old.txt", "new.txt", FileEntry::new("old.txt", false))
            .unwrap();
        assert_eq!(op.kind(), OperationKind::Rename);
        assert_eq!(op.destination(), Some(Path::new("/home/user/new.txt")));
    }

    #[test]
    fn test_rename_rejects_bad_name() {
        let err = Operation::rename("/home/user/old.txt", "a/b", FileEntry::new("old.txt", false))
            .unwrap_err();
        assert!(matches!(err, OperationError::InvalidName { .. }));
    }

    #[test]
    fn test_kind_classification() {
        assert!(OperationKind::Move.is_destructive());
        assert!(OperationKind::Delete.is_destructive());
        assert!(OperationKind::Rename.is_destructive());
        assert!(!OperationKind::Copy.is_destructive());

        assert!(OperationKind::Copy.checks_destination_dir());
        assert!(!OperationKind::Rename.checks_destination_dir());
        assert_eq!(OperationKind::Move.to_string(), "move");
    }

    #[test]
    fn test_delete_has_no_destination() {
        let op = Operation::delete("/tmp/x", FileEntry::new("x", true));
        assert!(op.destination().is_none());
        assert!(op.entry().is_dir);
    }
}
