//! Storage trait definitions

use std::collections::BTreeSet;

use super::ProtectionLevel;
use crate::error::StoreError;
use crate::models::AccountId;

/// Durable per-account credential storage
///
/// Implementations must replace records atomically: a concurrent reader sees
/// either the previous record or the new one, never a partial write.
pub trait CredentialStore: Send + Sync {
    /// Enumerate accounts that have a persisted record
    fn list_account_ids(&self) -> Result<BTreeSet<AccountId>, StoreError>;

    /// Persist `blob` as the current record for `account_id`
    fn store(&self, account_id: &AccountId, blob: &[u8]) -> Result<(), StoreError>;

    /// Load the most recent blob for `account_id`
    ///
    /// Returns `Ok(None)` when there is no record or the record cannot be
    /// decrypted or parsed. Only I/O failures are errors.
    fn load(&self, account_id: &AccountId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete the record for `account_id` if present
    fn remove(&self, account_id: &AccountId) -> Result<(), StoreError>;

    /// How records are protected at rest
    fn protection(&self) -> ProtectionLevel;
}
