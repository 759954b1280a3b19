//! In-memory credential store
//!
//! Used by tests and anywhere persistence across restarts is not wanted.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{CredentialStore, ProtectionLevel};
use crate::error::StoreError;
use crate::models::{AccountId, CredentialRecord};

#[derive(Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<HashMap<AccountId, CredentialRecord>>,
    writes: AtomicUsize,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `store` calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Full record for an account, including its timestamp
    pub fn record(&self, account_id: &AccountId) -> Option<CredentialRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(account_id)
            .cloned()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn list_account_ids(&self) -> Result<BTreeSet<AccountId>, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.keys().cloned().collect())
    }

    fn store(&self, account_id: &AccountId, blob: &[u8]) -> Result<(), StoreError> {
        let record = CredentialRecord::new(account_id.clone(), blob.to_vec());
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account_id.clone(), record);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn load(&self, account_id: &AccountId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.record(account_id).map(|r| r.blob))
    }

    fn remove(&self, account_id: &AccountId) -> Result<(), StoreError> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(account_id);
        Ok(())
    }

    fn protection(&self) -> ProtectionLevel {
        ProtectionLevel::Plaintext
    }
}
