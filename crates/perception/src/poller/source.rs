//! Capabilities the poller depends on

use chrono::{DateTime, Utc};

use crate::error::{AuthError, FetchError};
use crate::models::PerceivedItem;

/// Supplies bearer tokens for the active account
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Result<String, AuthError>;

    /// Drop any cached access token so the next request renews it.
    /// Called after the remote source rejects a token.
    fn invalidate(&self) {}
}

/// Fetches items received at or after a point in time
///
/// Must be safe to call repeatedly with the same watermark.
pub trait Fetcher: Send + Sync {
    fn fetch_since(
        &self,
        access_token: &str,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<PerceivedItem>, FetchError>;
}
