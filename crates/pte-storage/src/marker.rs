//! Marker files
//!
//! A marker is a zero-byte file whose presence is the whole message. The
//! lock marker is taken with `create_new`, so two parties racing for it can
//! never both succeed; the loser sees `AlreadyExists` and backs off.

use crate::error::{Result, StorageError};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Held lock marker, removed on drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Atomically create the lock marker, failing if it already exists
    pub fn acquire(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(Self {
                path: path.to_path_buf(),
            }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::LockContention {
                    marker: path.to_path_buf(),
                })
            }
            Err(err) => Err(StorageError::io(path, err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::error!("Cannot remove lock marker {}: {}", self.path.display(), err);
            }
        }
    }
}

/// Whether a marker is present
pub fn is_present(path: &Path) -> bool {
    path.exists()
}

/// Create a marker if absent. Raising an already raised marker is fine.
pub fn raise(path: &Path) -> Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(StorageError::io(path, err)),
    }
}

/// Remove a marker. Clearing an absent marker is fine.
pub fn clear(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StorageError::io(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallets.lock");

        let guard = LockGuard::acquire(&path).unwrap();
        assert!(is_present(&path));

        let err = LockGuard::acquire(&path).unwrap_err();
        assert!(err.is_contention());

        drop(guard);
        assert!(!is_present(&path));
        assert!(LockGuard::acquire(&path).is_ok());
    }

    #[test]
    fn test_lock_marker_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallets.lock");

        let _guard = LockGuard::acquire(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_raise_and_clear_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallets.resync");

        raise(&path).unwrap();
        raise(&path).unwrap();
        assert!(is_present(&path));

        clear(&path).unwrap();
        clear(&path).unwrap();
        assert!(!is_present(&path));
    }
}
