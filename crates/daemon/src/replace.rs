//! In-place substitution of a source file by its re-encoded output.
//!
//! Primary path: move the output beside the original, then rename it over
//! the original. Fallback path: move the original to `<name>.backup`, move
//! the output into place, delete the backup; if the output cannot be moved
//! in, the backup is renamed back. A crash between moving the original
//! aside and moving the output in leaves only the `.backup` file, which
//! needs manual recovery.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use log::{error, info, warn};
use thiserror::Error;
use crate::sidecar;

#[derive(Debug, Error)]
pub enum ReplaceError {
    /// The original could not be moved aside; nothing was changed
    #[error("failed to back up {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The output could not be moved in; the original was restored
    #[error("failed to move output into {path} (original restored): {source}")]
    Restored {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The original is only available as the backup file
    #[error("failed to restore {backup} to {path} after {cause}: {source}")]
    RollbackFailed {
        path: PathBuf,
        backup: PathBuf,
        cause: io::Error,
        #[source]
        source: io::Error,
    },
}

/// Move a file, copying when a plain rename is not possible (e.g. across filesystems)
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.is_file() || to.is_dir() {
                return Err(rename_err);
            }
            if let Err(e) = fs::copy(from, to) {
                let _ = fs::remove_file(to);
                return Err(e);
            }
            fs::remove_file(from)
        }
    }
}

/// Filesystem steps used by the replace sequence
pub(crate) trait FileOps {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

struct RealFs;

impl FileOps for RealFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        move_file(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Replace `original` with `new_file` so that a file always exists at `original`
pub fn atomic_replace(original: &Path, new_file: &Path) -> Result<(), ReplaceError> {
    atomic_replace_with(&RealFs, original, new_file)
}

pub(crate) fn atomic_replace_with(
    ops: &impl FileOps,
    original: &Path,
    new_file: &Path,
) -> Result<(), ReplaceError> {
    let staging = sidecar::staging_path(original);

    let primary = ops
        .move_file(new_file, &staging)
        .and_then(|_| ops.rename(&staging, original));
    match primary {
        Ok(()) => return Ok(()),
        Err(e) => warn!(
            "Direct replace of {} failed ({}), falling back to backup replace",
            original.display(),
            e
        ),
    }

    let source = if staging.is_file() {
        staging
    } else {
        new_file.to_path_buf()
    };
    backup_replace(ops, original, &source)
}

fn backup_replace(ops: &impl FileOps, original: &Path, source: &Path) -> Result<(), ReplaceError> {
    let backup = sidecar::backup_path(original);

    ops.rename(original, &backup).map_err(|e| ReplaceError::Backup {
        path: original.to_path_buf(),
        source: e,
    })?;

    match ops.move_file(source, original) {
        Ok(()) => {
            if let Err(e) = ops.remove_file(&backup) {
                warn!("Replaced {} but could not delete backup {}: {}", original.display(), backup.display(), e);
            }
            info!("Replaced {} via backup", original.display());
            Ok(())
        }
        Err(cause) => match ops.rename(&backup, original) {
            Ok(()) => Err(ReplaceError::Restored {
                path: original.to_path_buf(),
                source: cause,
            }),
            Err(source) => {
                error!(
                    "CRITICAL: {} is missing, original only available at {} - manual recovery required",
                    original.display(),
                    backup.display()
                );
                Err(ReplaceError::RollbackFailed {
                    path: original.to_path_buf(),
                    backup,
                    cause,
                    source,
                })
            }
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Real filesystem, except that anything written to `target` fails
    pub(crate) struct Unwritable {
        pub target: PathBuf,
    }

    impl Unwritable {
        fn check(&self, to: &Path) -> io::Result<()> {
            if to == self.target {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only target"))
            } else {
                Ok(())
            }
        }
    }

    impl FileOps for Unwritable {
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            self.check(to)?;
            fs::rename(from, to)
        }

        fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
            self.check(to)?;
            move_file(from, to)
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            fs::remove_file(path)
        }
    }

    #[test]
    fn replace_leaves_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        let output = dir.path().join("movie.mkv.temp.mkv");
        fs::write(&original, b"old old old").unwrap();
        fs::write(&output, b"new").unwrap();

        atomic_replace(&original, &output).unwrap();

        assert_eq!(fs::read(&original).unwrap(), b"new");
        assert!(!output.exists());
        assert!(!sidecar::staging_path(&original).exists());
        assert!(!sidecar::backup_path(&original).exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn replace_from_other_directory() {
        let lib = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let original = lib.path().join("movie.mkv");
        let output = scratch.path().join("movie.mkv.hevc.mkv");
        fs::write(&original, b"old").unwrap();
        fs::write(&output, b"new").unwrap();

        atomic_replace(&original, &output).unwrap();
        assert_eq!(fs::read(&original).unwrap(), b"new");
        assert!(!output.exists());
    }

    #[test]
    fn blocked_staging_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        let output = dir.path().join("movie.mkv.temp.mkv");
        fs::write(&original, b"old").unwrap();
        fs::write(&output, b"new").unwrap();
        fs::create_dir(sidecar::staging_path(&original)).unwrap();

        atomic_replace(&original, &output).unwrap();
        assert_eq!(fs::read(&original).unwrap(), b"new");
        assert!(!output.exists());
        assert!(!sidecar::backup_path(&original).exists());
    }

    #[test]
    fn failed_move_restores_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        fs::write(&original, b"old").unwrap();

        let err = atomic_replace(&original, &dir.path().join("missing.mkv")).unwrap_err();
        assert!(matches!(err, ReplaceError::Restored { .. }));
        assert_eq!(fs::read(&original).unwrap(), b"old");
        assert!(!sidecar::backup_path(&original).exists());
    }

    #[test]
    fn missing_original_is_a_backup_error() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("gone.mkv");
        let output = dir.path().join("gone.mkv.temp.mkv");
        fs::write(&output, b"new").unwrap();
        fs::create_dir(sidecar::staging_path(&original)).unwrap();

        let err = atomic_replace(&original, &output).unwrap_err();
        assert!(matches!(err, ReplaceError::Backup { .. }));
        assert!(output.exists());
    }

    #[test]
    fn failed_rollback_keeps_backup_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        let output = dir.path().join("movie.mkv.temp.mkv");
        fs::write(&original, b"old").unwrap();
        fs::write(&output, b"new").unwrap();

        let ops = Unwritable { target: original.clone() };
        let err = atomic_replace_with(&ops, &original, &output).unwrap_err();

        match &err {
            ReplaceError::RollbackFailed { path, backup, .. } => {
                assert_eq!(path, &original);
                assert_eq!(backup, &sidecar::backup_path(&original));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!original.exists());
        assert_eq!(fs::read(sidecar::backup_path(&original)).unwrap(), b"old");
        assert_eq!(fs::read(sidecar::staging_path(&original)).unwrap(), b"new");
    }
}
