//! Identity-provider boundary

use crate::error::{AuthError, SilentError};
use crate::models::AccountId;

/// Where the identity provider sent the browser back to
///
/// Supplied by whatever handled the redirect; the redirect URI used for the
/// code exchange must match the one used for the authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectContext {
    pub scheme: String,
    /// Host with optional port, e.g. `localhost:8400`
    pub host: String,
    pub callback_path: String,
}

impl RedirectContext {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        callback_path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            callback_path: callback_path.into(),
        }
    }

    pub fn redirect_uri(&self) -> String {
        let path = if self.callback_path.starts_with('/') || self.callback_path.is_empty() {
            self.callback_path.clone()
        } else {
            format!("/{}", self.callback_path)
        };
        format!("{}://{}{}", self.scheme, self.host, path)
    }
}

/// Result of any successful grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Account the credential belongs to
    pub account_id: AccountId,
    pub access_token: String,
    /// Serialized refresh material as it stands after the grant
    pub credential: Vec<u8>,
}

/// The protocol exchange with the identity provider
///
/// Credential material is opaque outside the implementation: whatever
/// `Grant::credential` holds comes back verbatim as `cached`.
pub trait IdentityProvider: Send + Sync {
    /// Obtain a token from cached material without user interaction
    ///
    /// `force_refresh` skips any still-valid access token in the cache.
    fn renew_silently(
        &self,
        account_id: &AccountId,
        cached: &[u8],
        force_refresh: bool,
    ) -> Result<Grant, SilentError>;

    /// Full interactive consent. Clients that cannot prompt return
    /// [`AuthError::InteractionRequired`].
    fn acquire_interactive(&self) -> Result<Grant, AuthError>;

    /// Redeem an authorization code received by a protocol handler
    fn redeem_code(
        &self,
        code: &str,
        redirect: &RedirectContext,
        code_verifier: Option<&str>,
    ) -> Result<Grant, AuthError>;
}
