//! Copy with progress reporting.

use std::fs::{self, Metadata};
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;

use jwalk::WalkDir;
use tracing::trace;

use crate::fs::FileSystem;

/// Totals for a finished copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Regular files written.
    pub files: u64,
    /// Directories created, including the top-level one.
    pub directories: u64,
    /// Symlinks recreated.
    pub symlinks: u64,
    /// File content bytes written.
    pub bytes: u64,
}

/// Copies a file or directory tree, reporting percentage progress.
///
/// A single file reports bytes written against its size; a directory
/// reports entries processed against a count taken by walking the tree
/// first. Reported values are clamped to 0..=100.
pub struct Copier<'a> {
    fs: &'a dyn FileSystem,
    chunk_size: usize,
    on_progress: &'a mut dyn FnMut(f64),
}

impl<'a> Copier<'a> {
    /// Create a copier that streams in `chunk_size` pieces.
    pub fn new(
        fs: &'a dyn FileSystem,
        chunk_size: usize,
        on_progress: &'a mut dyn FnMut(f64),
    ) -> Self {
        Self {
            fs,
            chunk_size: chunk_size.max(1),
            on_progress,
        }
    }

    /// Copy `source` to `dest`. `dest` must not exist.
    pub fn copy(&mut self, source: &Path, dest: &Path) -> io::Result<CopyStats> {
        let metadata = fs::symlink_metadata(source)?;
        let mut stats = CopyStats::default();

        if metadata.is_dir() {
            let total = count_entries(source).max(1);
            let mut processed = 0;
            self.report(0.0);
            self.copy_dir(source, dest, &metadata, total, &mut processed, &mut stats)?;
        } else if metadata.file_type().is_symlink() {
            copy_symlink(source, dest)?;
            stats.symlinks += 1;
        } else {
            stats.bytes += self.copy_file(source, dest, &metadata, true)?;
            stats.files += 1;
        }

        self.report(100.0);
        Ok(stats)
    }

    fn report(&mut self, percent: f64) {
        (self.on_progress)(percent.clamp(0.0, 100.0));
    }

    /// Stream one file into a newly created `dest`, then apply the source mode.
    fn copy_file(
        &mut self,
        source: &Path,
        dest: &Path,
        metadata: &Metadata,
        track_bytes: bool,
    ) -> io::Result<u64> {
        // Read once up front; a file growing mid-copy overshoots and is clamped.
        let total = metadata.len();
        let mut reader = self.fs.open(source)?;
        let mut writer = self.fs.create(dest)?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut written = 0u64;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            writer.write_all(&buf[..n])?;
            written += n as u64;

            if track_bytes && total > 0 {
                self.report(written as f64 / total as f64 * 100.0);
            }
        }

        writer.flush()?;
        drop(writer);

        fs::set_permissions(dest, metadata.permissions())?;
        trace!(source = %source.display(), bytes = written, "Copied file");
        Ok(written)
    }

    fn copy_dir(
        &mut self,
        source: &Path,
        dest: &Path,
        metadata: &Metadata,
        total: u64,
        processed: &mut u64,
        stats: &mut CopyStats,
    ) -> io::Result<()> {
        self.fs.create_dir(dest)?;
        stats.directories += 1;

        for entry in fs::read_dir(source)? {
            let entry = entry?;
            let path = entry.path();
            let dest_path = dest.join(entry.file_name());
            let child = fs::symlink_metadata(&path)?;

            if child.is_dir() {
                self.copy_dir(&path, &dest_path, &child, total, processed, stats)?;
            } else if child.file_type().is_symlink() {
                copy_symlink(&path, &dest_path)?;
                stats.symlinks += 1;
            } else {
                stats.bytes += self.copy_file(&path, &dest_path, &child, false)?;
                stats.files += 1;
            }

            *processed += 1;
            self.report(*processed as f64 / total as f64 * 100.0);
        }

        // Applied last so a read-only source directory can still be filled.
        fs::set_permissions(dest, metadata.permissions())
    }
}

/// Count the entries below `root`, not including `root` itself.
pub fn count_entries(root: &Path) -> u64 {
    WalkDir::new(root)
        .skip_hidden(false)
        .follow_links(false)
        .into_iter()
        .count()
        .saturating_sub(1) as u64
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    let target = fs::read_link(source)?;
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        ErrorKind::Unsupported,
        format!("Cannot copy symlink {}", source.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFs;
    use tempfile::TempDir;

    #[test]
    fn test_copy_file_reports_byte_progress() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("data.bin");
        let dest = temp.path().join("copy.bin");
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &content).unwrap();

        let mut seen = Vec::new();
        let mut on_progress = |p: f64| seen.push(p);
        let stats = Copier::new(&StdFs, 32 * 1024, &mut on_progress)
            .copy(&source, &dest)
            .unwrap();

        assert_eq!(fs::read(&dest).unwrap(), content);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.bytes, 100_000);
        // At least one report per chunk plus the final one.
        assert!(seen.len() >= 5);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
    }

    #[test]
    fn test_copy_empty_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("empty");
        let dest = temp.path().join("empty.copy");
        fs::write(&source, b"").unwrap();

        let mut seen = Vec::new();
        let mut on_progress = |p: f64| seen.push(p);
        Copier::new(&StdFs, 1024, &mut on_progress)
            .copy(&source, &dest)
            .unwrap();

        assert!(dest.exists());
        assert_eq!(seen, vec![100.0]);
    }

    #[test]
    fn test_copy_refuses_existing_destination() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a");
        let dest = temp.path().join("b");
        fs::write(&source, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();

        let mut on_progress = |_: f64| {};
        let err = Copier::new(&StdFs, 1024, &mut on_progress)
            .copy(&source, &dest)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&dest).unwrap(), b"old");
    }

    #[test]
    fn test_copy_directory_tree() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        fs::create_dir_all(source.join("sub").join("deeper")).unwrap();
        fs::write(source.join("a.txt"), b"alpha").unwrap();
        fs::write(source.join(".hidden"), b"secret").unwrap();
        fs::write(source.join("sub").join("b.txt"), b"beta").unwrap();
        fs::write(source.join("sub").join("deeper").join("c.txt"), b"gamma").unwrap();

        assert_eq!(count_entries(&source), 6);

        let dest = temp.path().join("dst");
        let mut seen = Vec::new();
        let mut on_progress = |p: f64| seen.push(p);
        let stats = Copier::new(&StdFs, 4, &mut on_progress)
            .copy(&source, &dest)
            .unwrap();

        assert_eq!(stats.files, 4);
        assert_eq!(stats.directories, 3);
        assert_eq!(stats.bytes, 5 + 6 + 4 + 5);
        assert_eq!(fs::read(dest.join(".hidden")).unwrap(), b"secret");
        assert_eq!(
            fs::read(dest.join("sub").join("deeper").join("c.txt")).unwrap(),
            b"gamma"
        );

        // Entry-level progress only: 0, one report per entry, then the final 100.
        assert_eq!(seen.len(), 8);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_preserves_modes_and_symlinks() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        fs::create_dir(&source).unwrap();
        let script = source.join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
        std::os::unix::fs::symlink("run.sh", source.join("link")).unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o555)).unwrap();

        let dest = temp.path().join("dst");
        let mut on_progress = |_: f64| {};
        let stats = Copier::new(&StdFs, 1024, &mut on_progress)
            .copy(&source, &dest)
            .unwrap();

        let mode = |p: &Path| fs::symlink_metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&dest.join("run.sh")), 0o750);
        assert_eq!(mode(&dest), 0o555);
        assert_eq!(stats.symlinks, 1);
        assert_eq!(fs::read_link(dest.join("link")).unwrap(), Path::new("run.sh"));

        // Let TempDir clean up.
        fs::set_permissions(&source, fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
