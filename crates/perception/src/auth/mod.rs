//! Credential lifecycle
//!
//! [`CredentialProvider`] turns persisted refresh material into bearer
//! tokens: silent renewal first, then a one-shot interactive or
//! code-exchange grant, persisting whatever the grant changed.

mod identity;
mod provider;

pub use identity::{Grant, IdentityProvider, RedirectContext};
pub use provider::CredentialProvider;
