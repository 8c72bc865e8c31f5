//! Persistence gateway
//!
//! Loads and saves the ledger and wallet bindings as pretty JSON. Ledger
//! access from this process is bracketed by the lock marker; an external
//! writer that wants its edits picked up raises the resync marker, and the
//! next accrual tick reloads the ledger before crediting.

use crate::error::{Result, StorageError};
use crate::marker::{self, LockGuard};
use pte_core::{Ledger, WalletBindings};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Every file the gateway touches
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoragePaths {
    /// Address to balance map
    pub ledger: PathBuf,
    /// Participant to address map
    pub wallets: PathBuf,
    /// Present while a ledger read or write is in progress
    pub lock_marker: PathBuf,
    /// Present when an external writer wants the ledger reloaded
    pub resync_marker: PathBuf,
}

impl StoragePaths {
    /// Standard layout under `<root>/Wallets`
    pub fn under(root: &Path) -> Self {
        let dir = root.join("Wallets");
        Self {
            ledger: dir.join("wallets.json"),
            wallets: dir.join("players_wallets.json"),
            lock_marker: dir.join("wallets.lock"),
            resync_marker: dir.join("wallets.resync"),
        }
    }

    fn all(&self) -> [&Path; 4] {
        [
            &self.ledger,
            &self.wallets,
            &self.lock_marker,
            &self.resync_marker,
        ]
    }
}

/// File-backed persistence for the ledger and wallet bindings
#[derive(Clone, Debug)]
pub struct PersistenceGateway {
    paths: StoragePaths,
}

impl PersistenceGateway {
    pub fn new(paths: StoragePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Create the parent directory of every configured path
    pub fn ensure_dirs(&self) -> Result<()> {
        for path in self.paths.all() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|err| StorageError::io(parent, err))?;
            }
        }
        Ok(())
    }

    // ===== Ledger =====

    /// Read the ledger file. A missing file is `Ok(None)`.
    pub fn load_ledger(&self) -> Result<Option<Ledger>> {
        read_json(&self.paths.ledger)
    }

    /// Read the ledger while holding the lock marker
    pub fn load_ledger_locked(&self) -> Result<Option<Ledger>> {
        let _lock = LockGuard::acquire(&self.paths.lock_marker)?;
        self.load_ledger()
    }

    /// Write the ledger under the lock marker.
    ///
    /// Fails fast with `LockContention` when the marker is already present;
    /// in that case the ledger file is not touched.
    pub fn save_ledger(&self, ledger: &Ledger) -> Result<()> {
        self.ensure_dirs()?;
        let _lock = LockGuard::acquire(&self.paths.lock_marker)?;
        write_json(&self.paths.ledger, ledger)?;
        tracing::debug!(
            "Saved {} ledger entries to {}",
            ledger.len(),
            self.paths.ledger.display()
        );
        Ok(())
    }

    /// Reload the ledger if an external writer asked for it.
    ///
    /// Only acts when both the ledger file and the resync marker exist.
    /// The marker is cleared after the reload succeeds; a crash in between
    /// leaves it raised and the next call simply reloads again.
    pub fn service_resync(&self) -> Result<Option<Ledger>> {
        if !self.resync_pending() || !self.paths.ledger.exists() {
            return Ok(None);
        }

        let Some(ledger) = self.load_ledger_locked()? else {
            return Ok(None);
        };
        marker::clear(&self.paths.resync_marker)?;

        tracing::info!(
            "Resync requested, reloaded {} ledger entries from {}",
            ledger.len(),
            self.paths.ledger.display()
        );
        Ok(Some(ledger))
    }

    /// Whether the resync marker is currently raised
    pub fn resync_pending(&self) -> bool {
        marker::is_present(&self.paths.resync_marker)
    }

    /// Raise the resync marker (external writer side)
    pub fn request_resync(&self) -> Result<()> {
        self.ensure_dirs()?;
        marker::raise(&self.paths.resync_marker)
    }

    /// Whether another operation holds the lock marker
    pub fn is_locked(&self) -> bool {
        marker::is_present(&self.paths.lock_marker)
    }

    // ===== Wallet bindings =====

    /// Read the wallet bindings file. A missing file is `Ok(None)`.
    pub fn load_bindings(&self) -> Result<Option<WalletBindings>> {
        read_json(&self.paths.wallets)
    }

    pub fn save_bindings(&self, bindings: &WalletBindings) -> Result<()> {
        self.ensure_dirs()?;
        write_json(&self.paths.wallets, bindings)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StorageError::io(path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Write through a sibling temp file and rename over the target
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, bytes).map_err(|err| StorageError::io(&temp_path, err))?;
    fs::rename(&temp_path, path).map_err(|err| StorageError::io(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pte_core::{Address, ParticipantId, ONE_PTE};
    use tempfile::TempDir;

    fn addr(n: u64) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn gateway(dir: &TempDir) -> PersistenceGateway {
        let gateway = PersistenceGateway::new(StoragePaths::under(dir.path()));
        gateway.ensure_dirs().unwrap();
        gateway
    }

    #[test]
    fn test_missing_ledger_is_none() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);
        assert!(gateway.load_ledger().unwrap().is_none());
        assert!(gateway.load_bindings().unwrap().is_none());
    }

    #[test]
    fn test_ensure_dirs_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);
        gateway.ensure_dirs().unwrap();
        assert!(dir.path().join("Wallets").is_dir());
    }

    #[test]
    fn test_round_trip_empty_single_and_many() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);

        let empty = Ledger::new();
        gateway.save_ledger(&empty).unwrap();
        assert_eq!(gateway.load_ledger().unwrap(), Some(empty));

        let mut single = Ledger::new();
        single.insert(addr(1), 1);
        gateway.save_ledger(&single).unwrap();
        assert_eq!(gateway.load_ledger().unwrap(), Some(single));

        let mut many = Ledger::new();
        many.insert(addr(1), 0);
        many.insert(addr(2), 1);
        many.insert(addr(3), 10 * ONE_PTE);
        many.insert(addr(4), u128::MAX);
        many.insert(addr(5), u128::MAX - 1);
        gateway.save_ledger(&many).unwrap();
        assert_eq!(gateway.load_ledger().unwrap(), Some(many));

        assert!(!gateway.is_locked());
    }

    #[test]
    fn test_save_under_contention_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);

        let mut original = Ledger::new();
        original.insert(addr(1), 42);
        gateway.save_ledger(&original).unwrap();
        let before = fs::read(&gateway.paths().ledger).unwrap();

        let held = LockGuard::acquire(&gateway.paths().lock_marker).unwrap();
        let mut updated = original.clone();
        updated.insert(addr(2), 7);

        let err = gateway.save_ledger(&updated).unwrap_err();
        assert!(err.is_contention());
        assert_eq!(fs::read(&gateway.paths().ledger).unwrap(), before);

        drop(held);
        gateway.save_ledger(&updated).unwrap();
        assert_eq!(gateway.load_ledger().unwrap(), Some(updated));
    }

    #[test]
    fn test_corrupt_ledger_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);
        fs::write(&gateway.paths().ledger, b"{ not json").unwrap();

        let err = gateway.load_ledger().unwrap_err();
        assert!(matches!(err, StorageError::Parse { .. }));
    }

    #[test]
    fn test_resync_noop_without_marker_pair() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);

        // neither file
        for _ in 0..3 {
            assert!(gateway.service_resync().unwrap().is_none());
        }

        // ledger only
        let mut ledger = Ledger::new();
        ledger.insert(addr(9), 9);
        gateway.save_ledger(&ledger).unwrap();
        for _ in 0..3 {
            assert!(gateway.service_resync().unwrap().is_none());
        }

        // marker only
        fs::remove_file(&gateway.paths().ledger).unwrap();
        gateway.request_resync().unwrap();
        assert!(gateway.service_resync().unwrap().is_none());
        assert!(gateway.resync_pending());
    }

    #[test]
    fn test_resync_reloads_and_clears_marker() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);

        let mut external = Ledger::new();
        external.insert(addr(7), 3 * ONE_PTE);
        fs::write(
            &gateway.paths().ledger,
            serde_json::to_vec(&external).unwrap(),
        )
        .unwrap();
        gateway.request_resync().unwrap();

        assert_eq!(gateway.service_resync().unwrap(), Some(external));
        assert!(!gateway.resync_pending());
        assert!(!gateway.is_locked());
        assert!(gateway.service_resync().unwrap().is_none());
    }

    #[test]
    fn test_resync_respects_lock() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);
        gateway.save_ledger(&Ledger::new()).unwrap();
        gateway.request_resync().unwrap();

        let _held = LockGuard::acquire(&gateway.paths().lock_marker).unwrap();
        let err = gateway.service_resync().unwrap_err();
        assert!(err.is_contention());
        assert!(gateway.resync_pending());
    }

    #[test]
    fn test_bindings_round_trip() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);

        let mut bindings = WalletBindings::new();
        bindings.insert(ParticipantId::from("alice"), addr(1));
        bindings.insert(ParticipantId::from("bob"), addr(1));
        gateway.save_bindings(&bindings).unwrap();

        assert_eq!(gateway.load_bindings().unwrap(), Some(bindings));
    }

    #[test]
    fn test_ledger_file_is_flat_object() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);

        let mut ledger = Ledger::new();
        ledger.insert(addr(1), 10 * ONE_PTE);
        gateway.save_ledger(&ledger).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(&gateway.paths().ledger).unwrap()).unwrap();
        let object = raw.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert!(object.contains_key(addr(1).as_str()));
    }
}
