//! At-rest protection for credential records
//!
//! Records are encrypted with AES-256-GCM under a per-user master key that
//! lives in the OS credential vault (macOS Keychain, Windows Credential
//! Manager). Platforms without a supported vault store records unprotected;
//! [`select_protector`] logs that case and reports it through
//! [`ProtectionLevel`].

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::prelude::*;
use log::{info, warn};
use rand::Rng;

use crate::error::StoreError;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Vault entry user name under which the master key is kept
const MASTER_KEY_USER: &str = "credential-master-key";

/// How credential records are protected at rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLevel {
    /// Encrypted with a key bound to the current OS user
    Encrypted,
    /// Stored as plain bytes
    Plaintext,
}

/// Reversible transformation applied to a serialized record
pub trait Protector: Send + Sync {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// Undo [`Protector::protect`]. Failure means the record is corrupt.
    fn unprotect(&self, data: &[u8]) -> Result<Vec<u8>, StoreError>;

    fn level(&self) -> ProtectionLevel;
}

/// Pass-through protector for platforms without a credential vault
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProtector;

impl Protector for NullProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        Ok(plaintext.to_vec())
    }

    fn unprotect(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        Ok(data.to_vec())
    }

    fn level(&self) -> ProtectionLevel {
        ProtectionLevel::Plaintext
    }
}

/// AES-256-GCM protector keyed by the OS user's credential vault
///
/// Output layout: `nonce (12 bytes) || ciphertext+tag`.
pub struct OsProtector {
    cipher: Aes256Gcm,
}

impl OsProtector {
    /// Build from raw key bytes
    pub fn from_key(key: &[u8]) -> Result<Self, StoreError> {
        if key.len() != KEY_SIZE {
            return Err(StoreError::Protection(format!(
                "Master key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| StoreError::Protection(format!("Invalid master key: {:?}", e)))?;
        Ok(Self { cipher })
    }

    /// Load the master key from the OS vault, creating it on first use
    ///
    /// # Arguments
    /// * `service` - Vault service name the key is filed under
    pub fn from_keyring(service: &str) -> Result<Self, StoreError> {
        let entry = keyring::Entry::new(service, MASTER_KEY_USER)
            .map_err(|e| StoreError::Protection(format!("Keyring unavailable: {}", e)))?;

        let key = match entry.get_password() {
            Ok(encoded) => BASE64_STANDARD
                .decode(encoded.trim())
                .map_err(|e| StoreError::Protection(format!("Stored master key is invalid: {}", e)))?,
            Err(keyring::Error::NoEntry) => {
                let mut key = vec![0u8; KEY_SIZE];
                rand::rng().fill(&mut key[..]);
                entry
                    .set_password(&BASE64_STANDARD.encode(&key))
                    .map_err(|e| StoreError::Protection(format!("Failed to save master key: {}", e)))?;
                info!("Created credential master key in the OS keyring");
                key
            }
            Err(e) => {
                return Err(StoreError::Protection(format!(
                    "Failed to read master key: {}",
                    e
                )));
            }
        };

        Self::from_key(&key)
    }
}

impl Protector for OsProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill(&mut nonce_bytes[..]);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| StoreError::Protection(format!("Failed to encrypt record: {:?}", e)))?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.append(&mut ciphertext);
        Ok(output)
    }

    fn unprotect(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        if data.len() < NONCE_SIZE {
            return Err(StoreError::Corrupt("ciphertext is too short".to_string()));
        }
        let (nonce_bytes, payload) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), payload)
            .map_err(|_| StoreError::Corrupt("record failed authentication".to_string()))
    }

    fn level(&self) -> ProtectionLevel {
        ProtectionLevel::Encrypted
    }
}

/// Pick the protector for this platform
///
/// Called once at startup. Falls back to [`NullProtector`] when the OS has no
/// supported vault or the vault cannot be reached.
pub fn select_protector(service: &str) -> Arc<dyn Protector> {
    if !cfg!(any(target_os = "macos", target_os = "windows")) {
        warn!(
            "No OS credential vault on {}; credential records will be stored unencrypted",
            std::env::consts::OS
        );
        return Arc::new(NullProtector);
    }

    match OsProtector::from_keyring(service) {
        Ok(protector) => Arc::new(protector),
        Err(e) => {
            warn!("{}; credential records will be stored unencrypted", e);
            Arc::new(NullProtector)
        }
    }
}
