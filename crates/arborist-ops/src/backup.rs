//! Backups taken before destructive operations.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::copy::Copier;
use crate::fs::{FileSystem, remove_path};

/// Marker between the original name and the backup suffix.
const BACKUP_MARKER: &str = ".bak.";

/// Fresh names to try before giving up on finding a free backup path.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Build a sibling backup path: `<name>.bak.<unix nanos>.<random hex>`.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let suffix: u64 = rand::random();

    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(OsString::new);
    name.push(format!("{BACKUP_MARKER}{nanos}.{suffix:016x}"));
    path.with_file_name(name)
}

/// Whether `path` names a transient backup, so listings can hide it.
pub fn is_backup_path(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    let mut parts = name.rsplitn(3, '.');
    let (Some(suffix), Some(nanos), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    suffix.len() == 16
        && suffix.bytes().all(|b| b.is_ascii_hexdigit())
        && !nanos.is_empty()
        && nanos.bytes().all(|b| b.is_ascii_digit())
        && rest.len() > ".bak".len()
        && rest.ends_with(".bak")
}

/// Creates, restores, and discards source snapshots.
#[derive(Debug, Clone)]
pub struct BackupManager {
    fs: Arc<dyn FileSystem>,
    chunk_size: usize,
}

impl BackupManager {
    pub fn new(fs: Arc<dyn FileSystem>, chunk_size: usize) -> Self {
        Self { fs, chunk_size }
    }

    /// Copy `path` recursively into a fresh sibling backup path.
    ///
    /// On failure the partial backup is removed and nothing is left behind.
    pub fn create_backup(
        &self,
        path: &Path,
        on_progress: &mut dyn FnMut(f64),
    ) -> io::Result<PathBuf> {
        let backup = std::iter::repeat_with(|| backup_path_for(path))
            .take(MAX_NAME_ATTEMPTS)
            .find(|candidate| std::fs::symlink_metadata(candidate).is_err())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("No free backup name next to {}", path.display()),
                )
            })?;

        let mut copier = Copier::new(self.fs.as_ref(), self.chunk_size, on_progress);
        if let Err(err) = copier.copy(path, &backup) {
            if let Err(cleanup) = remove_path(self.fs.as_ref(), &backup) {
                warn!(
                    backup = %backup.display(),
                    error = %cleanup,
                    "Failed to remove partial backup"
                );
            }
            return Err(err);
        }

        debug!(source = %path.display(), backup = %backup.display(), "Backup created");
        Ok(backup)
    }

    /// Replace whatever is at `original` with the backup.
    ///
    /// The current contents of `original` are discarded unconditionally.
    pub fn restore_backup(&self, backup: &Path, original: &Path) -> io::Result<()> {
        remove_path(self.fs.as_ref(), original).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to remove partial result {}: {e}", original.display()),
            )
        })?;

        self.fs.rename(backup, original).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to move backup {} into place: {e}", backup.display()),
            )
        })?;

        debug!(original = %original.display(), "Backup restored");
        Ok(())
    }

    /// Delete a backup that is no longer needed.
    pub fn discard_backup(&self, backup: &Path) -> io::Result<()> {
        remove_path(self.fs.as_ref(), backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFs;
    use std::fs;
    use tempfile::TempDir;

    fn manager() -> BackupManager {
        BackupManager::new(Arc::new(StdFs), 1024)
    }

    #[test]
    fn test_backup_path_shape() {
        let path = PathBuf::from("/tmp/report.txt");
        let backup = backup_path_for(&path);

        assert_eq!(backup.parent(), path.parent());
        let name = backup.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("report.txt.bak."));
        assert!(is_backup_path(&backup));
    }

    #[test]
    fn test_backup_names_are_unique() {
        let path = PathBuf::from("/tmp/report.txt");
        assert_ne!(backup_path_for(&path), backup_path_for(&path));
    }

    #[test]
    fn test_is_backup_path_rejects_lookalikes() {
        assert!(!is_backup_path(Path::new("/tmp/report.txt")));
        assert!(!is_backup_path(Path::new("/tmp/report.bak")));
        assert!(!is_backup_path(Path::new("/tmp/report.bak.123")));
        assert!(!is_backup_path(Path::new("/tmp/.bak.1.00000000000000ff")));
        assert!(!is_backup_path(Path::new("/tmp/a.bak.x1.00000000000000ff")));
        assert!(is_backup_path(Path::new("/tmp/a.bak.1.00000000000000ff")));
    }

    #[test]
    fn test_create_and_restore_directory() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("project");
        fs::create_dir_all(source.join("src")).unwrap();
        fs::write(source.join("src").join("main.rs"), b"fn main() {}").unwrap();

        let backup = manager().create_backup(&source, &mut |_| {}).unwrap();
        assert!(backup.is_dir());
        assert_eq!(
            fs::read(backup.join("src").join("main.rs")).unwrap(),
            b"fn main() {}"
        );

        // Mangle the original, then roll back.
        fs::remove_file(source.join("src").join("main.rs")).unwrap();
        fs::write(source.join("junk"), b"partial").unwrap();

        manager().restore_backup(&backup, &source).unwrap();
        assert!(!backup.exists());
        assert!(!source.join("junk").exists());
        assert_eq!(
            fs::read(source.join("src").join("main.rs")).unwrap(),
            b"fn main() {}"
        );
    }

    #[test]
    fn test_restore_when_original_is_gone() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("notes.txt");
        fs::write(&source, b"notes").unwrap();

        let backup = manager().create_backup(&source, &mut |_| {}).unwrap();
        fs::remove_file(&source).unwrap();

        manager().restore_backup(&backup, &source).unwrap();
        assert_eq!(fs::read(&source).unwrap(), b"notes");
    }

    #[test]
    fn test_failed_backup_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing");

        assert!(manager().create_backup(&missing, &mut |_| {}).is_err());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_discard_backup() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("notes.txt");
        fs::write(&source, b"notes").unwrap();

        let backup = manager().create_backup(&source, &mut |_| {}).unwrap();
        manager().discard_backup(&backup).unwrap();
        assert!(!backup.exists());
        assert!(source.exists());
    }
}
