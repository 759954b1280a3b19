//! Error taxonomy shared by the credential and polling subsystems

use std::path::PathBuf;

/// Credential storage failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem or OS failure. Fatal to the operation that hit it.
    #[error("Credential storage I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record unreadable or undecryptable. `load` turns this into a miss.
    #[error("Credential record is corrupt: {0}")]
    Corrupt(String),

    /// The protector could not encrypt or reach its key material
    #[error("Failed to protect credential record: {0}")]
    Protection(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a silent renewal did not produce a token
///
/// Only `InteractionRequired` moves the request on to the interactive grant.
#[derive(Debug, thiserror::Error)]
pub enum SilentError {
    /// Cached material missing, expired, revoked or rejected by the authority
    #[error("Interaction required: {0}")]
    InteractionRequired(String),

    /// Network or server trouble; a later attempt may succeed
    #[error("Silent renewal failed: {0:#}")]
    Transient(anyhow::Error),
}

/// Token acquisition failed on both the silent and the interactive path
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable credential and this client cannot prompt the user
    #[error("Interactive login required")]
    InteractionRequired,

    /// The grant was attempted and failed
    #[error("Authentication failed: {0:#}")]
    Failed(anyhow::Error),

    /// Credential material could not be read from durable storage
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Fetching from the remote source failed
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The bearer token was rejected
    #[error("Fetch rejected the access token")]
    Unauthorized,

    #[error("Fetch failed: {0:#}")]
    Request(anyhow::Error),

    /// The blocking worker running the call panicked or was torn down
    #[error("Fetch task failed: {0}")]
    Task(String),
}
