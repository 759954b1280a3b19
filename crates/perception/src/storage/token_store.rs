//! File-based credential store
//!
//! Directory structure:
//! ```text
//! tokens/
//!   00000000-0000-0000-aaaa.9188040d-6c67.token   # one record per account
//! ```
//!
//! Each file holds a JSON [`CredentialRecord`] passed through the store's
//! [`Protector`]. Writes go through a temp file and a rename.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use log::{debug, warn};

use super::{CredentialStore, ProtectionLevel, Protector, select_protector};
use crate::error::StoreError;
use crate::models::{AccountId, CredentialRecord};

/// Extension of a credential record file
const RECORD_EXTENSION: &str = "token";

/// Keyring service name for the master key
const KEYRING_SERVICE: &str = "clairvoyant";

pub struct FileTokenStore {
    dir: PathBuf,
    protector: Arc<dyn Protector>,
}

impl FileTokenStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl AsRef<Path>, protector: Arc<dyn Protector>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            protector,
        }
    }

    /// Store under ~/.config/clairvoyant/tokens with the platform protector
    pub fn open_default() -> anyhow::Result<Self> {
        let dir = config::config_path("tokens").context("Could not determine config directory")?;
        Ok(Self::new(dir, select_protector(KEYRING_SERVICE)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for an account's record
    ///
    /// Characters outside `[A-Za-z0-9-_.~]` are percent-encoded so any id
    /// maps to exactly one file name and back.
    fn record_path(&self, account_id: &AccountId) -> PathBuf {
        let name = urlencoding::encode(account_id.as_str());
        self.dir.join(format!("{}.{}", name, RECORD_EXTENSION))
    }

    /// Read and decode a record, surfacing corruption as an error
    fn read_record(&self, account_id: &AccountId) -> Result<Option<CredentialRecord>, StoreError> {
        let path = self.record_path(account_id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let plaintext = self.protector.unprotect(&data)?;
        let record: CredentialRecord = serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::Corrupt(format!("invalid record JSON: {}", e)))?;

        if record.account_id != *account_id {
            return Err(StoreError::Corrupt(format!(
                "record names account {} instead of {}",
                record.account_id, account_id
            )));
        }
        Ok(Some(record))
    }
}

impl CredentialStore for FileTokenStore {
    fn list_account_ids(&self) -> Result<BTreeSet<AccountId>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut ids = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match urlencoding::decode(stem) {
                Ok(id) => {
                    ids.insert(AccountId::new(id.into_owned()));
                }
                Err(_) => debug!("Skipping unrecognized token file {}", path.display()),
            }
        }
        Ok(ids)
    }

    fn store(&self, account_id: &AccountId, blob: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let record = CredentialRecord::new(account_id.clone(), blob.to_vec());
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| StoreError::Protection(format!("Failed to serialize record: {}", e)))?;
        let sealed = self.protector.protect(&json)?;

        let path = self.record_path(account_id);
        config::write_atomic(&path, &sealed).map_err(|e| StoreError::io(&path, e))?;
        debug!("Stored credential record for {}", account_id);
        Ok(())
    }

    fn load(&self, account_id: &AccountId) -> Result<Option<Vec<u8>>, StoreError> {
        match self.read_record(account_id) {
            Ok(record) => Ok(record.map(|r| r.blob)),
            Err(StoreError::Corrupt(reason)) => {
                warn!(
                    "Ignoring unreadable credential record for {}: {}",
                    account_id, reason
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn remove(&self, account_id: &AccountId) -> Result<(), StoreError> {
        let path = self.record_path(account_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn protection(&self) -> ProtectionLevel {
        self.protector.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NullProtector, OsProtector};
    use tempfile::tempdir;

    fn encrypted_store(dir: &Path) -> FileTokenStore {
        let protector = OsProtector::from_key(&[7u8; 32]).unwrap();
        FileTokenStore::new(dir.join("tokens"), Arc::new(protector))
    }

    #[test]
    fn test_store_then_load_is_byte_identical() {
        let dir = tempdir().unwrap();
        let store = encrypted_store(dir.path());
        let id = AccountId::new("uid.utid");
        let blob: Vec<u8> = (0u8..=255).collect();

        store.store(&id, &blob).unwrap();

        assert_eq!(store.load(&id).unwrap(), Some(blob));
    }

    #[test]
    fn test_load_unknown_account_is_none() {
        let dir = tempdir().unwrap();
        let store = encrypted_store(dir.path());
        assert_eq!(store.load(&AccountId::new("nobody")).unwrap(), None);
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let store = encrypted_store(dir.path());
        assert!(store.list_account_ids().unwrap().is_empty());
    }

    #[test]
    fn test_list_returns_stored_ids() {
        let dir = tempdir().unwrap();
        let store = encrypted_store(dir.path());
        store.store(&AccountId::new("a.1"), b"x").unwrap();
        store.store(&AccountId::new("b/2"), b"y").unwrap();
        fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let ids: Vec<String> = store
            .list_account_ids()
            .unwrap()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["a.1", "b/2"]);
    }

    #[test]
    fn test_store_replaces_previous_record() {
        let dir = tempdir().unwrap();
        let store = encrypted_store(dir.path());
        let id = AccountId::new("a");

        store.store(&id, b"old").unwrap();
        store.store(&id, b"new").unwrap();

        assert_eq!(store.load(&id).unwrap().as_deref(), Some(&b"new"[..]));
        let files: Vec<_> = fs::read_dir(store.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_truncated_record_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = encrypted_store(dir.path());
        let id = AccountId::new("a");
        store.store(&id, b"refresh").unwrap();

        let path = store.record_path(&id);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert_eq!(store.load(&id).unwrap(), None);
    }

    #[test]
    fn test_record_from_other_key_loads_as_none() {
        let dir = tempdir().unwrap();
        let id = AccountId::new("a");
        encrypted_store(dir.path()).store(&id, b"refresh").unwrap();

        let other = FileTokenStore::new(
            dir.path().join("tokens"),
            Arc::new(OsProtector::from_key(&[9u8; 32]).unwrap()),
        );
        assert_eq!(other.load(&id).unwrap(), None);
    }

    #[test]
    fn test_plaintext_record_is_readable_json() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path(), Arc::new(NullProtector));
        let id = AccountId::new("a");
        store.store(&id, b"refresh").unwrap();

        let raw = fs::read_to_string(store.record_path(&id)).unwrap();
        let record: CredentialRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.account_id, id);
        assert_eq!(record.blob, b"refresh");
        assert_eq!(store.protection(), ProtectionLevel::Plaintext);
    }

    #[test]
    fn test_renamed_record_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path(), Arc::new(NullProtector));
        store.store(&AccountId::new("a"), b"refresh").unwrap();
        fs::rename(
            store.record_path(&AccountId::new("a")),
            store.record_path(&AccountId::new("b")),
        )
        .unwrap();

        assert_eq!(store.load(&AccountId::new("b")).unwrap(), None);
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let store = encrypted_store(dir.path());
        let id = AccountId::new("a");
        store.store(&id, b"x").unwrap();

        store.remove(&id).unwrap();
        store.remove(&id).unwrap();

        assert_eq!(store.load(&id).unwrap(), None);
    }
}
