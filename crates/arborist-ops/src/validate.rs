//! Permission pre-checks.
//!
//! Checks are pure: they stat and call `access(2)` but never modify
//! anything, so they are safe to repeat.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use arborist_core::{Operation, OperationKind, PermissionError};
use nix::unistd::{AccessFlags, access};

/// Check that `op` can be performed, stopping at the first failed check.
///
/// In order: the source exists, the source is readable, the source's
/// directory is writable (destructive kinds), the destination's directory
/// exists, is not inside the source, and is writable (move and copy), and
/// nothing exists at the destination. Overwriting is never allowed.
pub fn validate(op: &Operation) -> Result<(), PermissionError> {
    let source = op.source();

    fs::metadata(source).map_err(|source_err| PermissionError::SourceUnreachable {
        path: source.to_path_buf(),
        source: source_err,
    })?;

    access(source, AccessFlags::R_OK).map_err(|errno| PermissionError::NoReadAccess {
        path: source.to_path_buf(),
        errno,
    })?;

    if op.kind().is_destructive() {
        let parent = parent_dir(source);
        access(&parent, AccessFlags::W_OK)
            .map_err(|errno| PermissionError::NoWriteAccessSource { path: parent, errno })?;
    }

    let Some(destination) = op.destination() else {
        return Ok(());
    };

    if op.kind().checks_destination_dir() {
        let parent = parent_dir(destination);

        match fs::metadata(&parent) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(PermissionError::DestinationDirMissing { path: parent }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PermissionError::DestinationDirMissing { path: parent });
            }
            Err(e) => {
                return Err(PermissionError::DestinationUnreachable {
                    path: parent,
                    source: e,
                });
            }
        }

        if is_within_source(source, &parent)? {
            return Err(PermissionError::DestinationInsideSource {
                path: source.to_path_buf(),
                destination: destination.to_path_buf(),
            });
        }

        access(&parent, AccessFlags::W_OK)
            .map_err(|errno| PermissionError::NoWriteAccessDestination { path: parent, errno })?;
    }

    // Renames are checked too: rename(2) would silently replace the target.
    if matches!(
        op.kind(),
        OperationKind::Move | OperationKind::Copy | OperationKind::Rename
    ) {
        match fs::symlink_metadata(destination) {
            Ok(_) => {
                return Err(PermissionError::DestinationCollision {
                    path: destination.to_path_buf(),
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PermissionError::DestinationUnreachable {
                    path: destination.to_path_buf(),
                    source: e,
                });
            }
        }
    }

    Ok(())
}

/// Whether `dest_dir` is the source directory or lies below it.
///
/// Both sides are canonicalized so `..` components and symlinked parents
/// cannot hide the nesting. A symlink source is never followed.
fn is_within_source(source: &Path, dest_dir: &Path) -> Result<bool, PermissionError> {
    let is_dir = fs::symlink_metadata(source)
        .map(|m| m.is_dir())
        .map_err(|e| PermissionError::SourceUnreachable {
            path: source.to_path_buf(),
            source: e,
        })?;
    if !is_dir {
        return Ok(false);
    }

    let source_real = fs::canonicalize(source).map_err(|e| PermissionError::SourceUnreachable {
        path: source.to_path_buf(),
        source: e,
    })?;
    let dest_real =
        fs::canonicalize(dest_dir).map_err(|e| PermissionError::DestinationUnreachable {
            path: dest_dir.to_path_buf(),
            source: e,
        })?;

    Ok(dest_real.starts_with(&source_real))
}

/// The directory containing `path`, with `.` for bare file names.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arborist_core::FileEntry;
    use tempfile::TempDir;

    fn entry() -> FileEntry {
        FileEntry::new("file.txt", false)
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir(Path::new("/a/b")), PathBuf::from("/a"));
        assert_eq!(parent_dir(Path::new("b")), PathBuf::from("."));
    }

    #[test]
    fn test_valid_operations_pass() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("file.txt");
        fs::write(&source, b"data").unwrap();

        let copy = Operation::copy(&source, temp.path().join("copy.txt"), entry());
        assert!(validate(&copy).is_ok());

        let delete = Operation::delete(&source, entry());
        assert!(validate(&delete).is_ok());

        let rename = Operation::rename(&source, "renamed.txt", entry()).unwrap();
        assert!(validate(&rename).is_ok());
    }

    #[test]
    fn test_missing_source() {
        let temp = TempDir::new().unwrap();
        let op = Operation::delete(temp.path().join("ghost"), entry());
        assert!(matches!(
            validate(&op),
            Err(PermissionError::SourceUnreachable { .. })
        ));
    }

    #[test]
    fn test_missing_destination_dir() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("file.txt");
        fs::write(&source, b"data").unwrap();

        let op = Operation::move_to(&source, temp.path().join("nope").join("file.txt"), entry());
        match validate(&op) {
            Err(PermissionError::DestinationDirMissing { path }) => {
                assert_eq!(path, temp.path().join("nope"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_destination_parent_is_a_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("file.txt");
        fs::write(&source, b"data").unwrap();
        fs::write(temp.path().join("plain"), b"").unwrap();

        let op = Operation::copy(&source, temp.path().join("plain").join("x"), entry());
        assert!(matches!(
            validate(&op),
            Err(PermissionError::DestinationDirMissing { .. })
                | Err(PermissionError::DestinationUnreachable { .. })
        ));
    }

    #[test]
    fn test_collision_for_every_targeted_kind() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("file.txt");
        let taken = temp.path().join("taken.txt");
        fs::write(&source, b"data").unwrap();
        fs::write(&taken, b"other").unwrap();

        let ops = [
            Operation::copy(&source, &taken, entry()),
            Operation::move_to(&source, &taken, entry()),
            Operation::rename(&source, "taken.txt", entry()).unwrap(),
        ];
        for op in &ops {
            assert!(matches!(
                validate(op),
                Err(PermissionError::DestinationCollision { .. })
            ));
        }
    }

    #[test]
    fn test_destination_inside_source_dir() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("f.txt"), b"data").unwrap();
        let dir_entry = FileEntry::new("a", true);

        let targets = [
            source.join("b"),
            source.join("nested").join("deeper"),
            // `..` does not hide the nesting.
            temp.path().join("a").join("nested").join("..").join("b"),
        ];
        for target in &targets {
            for op in [
                Operation::copy(&source, target, dir_entry.clone()),
                Operation::move_to(&source, target, dir_entry.clone()),
            ] {
                match validate(&op) {
                    Err(PermissionError::DestinationInsideSource { path, destination }) => {
                        assert_eq!(path, source);
                        assert_eq!(&destination, target);
                    }
                    other => panic!("unexpected result for {target:?}: {other:?}"),
                }
            }
        }

        // A sibling whose name shares the prefix is fine.
        let sibling = Operation::copy(&source, temp.path().join("ab"), dir_entry);
        assert!(validate(&sibling).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_destination_inside_source_through_symlink() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a");
        fs::create_dir(&source).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&source, &link).unwrap();

        let op = Operation::copy(&source, link.join("b"), FileEntry::new("a", true));
        assert!(matches!(
            validate(&op),
            Err(PermissionError::DestinationInsideSource { .. })
        ));

        // Copying the link itself recreates a link, so nesting is harmless.
        let op = Operation::copy(&link, source.join("link"), FileEntry::new("link", false));
        assert!(validate(&op).is_ok());
    }

    #[test]
    fn test_unwritable_source_dir() {
        use std::os::unix::fs::PermissionsExt;

        if nix::unistd::geteuid().is_root() {
            // access(2) grants everything to root.
            return;
        }

        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        let source = locked.join("file.txt");
        fs::write(&source, b"data").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let delete = validate(&Operation::delete(&source, entry()));
        // Copy only reads the source, so the locked directory is fine.
        let copy = validate(&Operation::copy(&source, temp.path().join("out.txt"), entry()));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(
            delete,
            Err(PermissionError::NoWriteAccessSource { .. })
        ));
        assert!(copy.is_ok());
    }
}
