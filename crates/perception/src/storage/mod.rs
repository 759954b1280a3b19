//! Credential storage traits and implementations
//!
//! Refresh material is persisted per account through the [`CredentialStore`]
//! trait. The file-backed store encrypts records with a [`Protector`] chosen
//! at startup; the in-memory store backs tests.

mod memory;
mod protector;
mod token_store;
mod traits;

pub use memory::InMemoryCredentialStore;
pub use protector::{NullProtector, OsProtector, ProtectionLevel, Protector, select_protector};
pub use token_store::FileTokenStore;
pub use traits::CredentialStore;
