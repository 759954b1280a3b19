//! Silent-first token acquisition with interactive fallback

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, info, warn};

use super::{Grant, IdentityProvider, RedirectContext};
use crate::error::{AuthError, SilentError, StoreError};
use crate::models::AccountId;
use crate::poller::TokenSource;
use crate::storage::CredentialStore;

/// Obtains bearer tokens for the active account
///
/// Each request walks a two-step machine:
/// 1. silent renewal from the stored credential, if there is one;
/// 2. on `SilentError::InteractionRequired` (or no stored credential), one
///    interactive grant.
///
/// Credential material is written back only when a grant changed it. A
/// failed write does not fail the request: the blob is kept, used for
/// silent renewal, and written again before the next request.
pub struct CredentialProvider {
    store: Arc<dyn CredentialStore>,
    identity: Arc<dyn IdentityProvider>,
    active: RwLock<Option<AccountId>>,
    pending: Mutex<Option<(AccountId, Vec<u8>)>>,
    force_refresh: AtomicBool,
}

impl CredentialProvider {
    pub fn new(store: Arc<dyn CredentialStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            active: RwLock::new(None),
            pending: Mutex::new(None),
            force_refresh: AtomicBool::new(false),
        }
    }

    /// Create a provider whose active account is the first one on record
    ///
    /// With no stored accounts the first token request goes straight to the
    /// interactive grant.
    pub fn resume(
        store: Arc<dyn CredentialStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, StoreError> {
        let first = store.list_account_ids()?.into_iter().next();
        let provider = Self::new(store, identity);
        if let Some(account_id) = first {
            info!("Resuming account {}", account_id);
            provider.activate(&account_id);
        }
        Ok(provider)
    }

    pub fn with_account(self, account_id: AccountId) -> Self {
        self.activate(&account_id);
        self
    }

    pub fn active_account(&self) -> Option<AccountId> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn activate(&self, account_id: &AccountId) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(account_id.clone());
    }

    /// Get a bearer token for the active account
    pub fn get_token(&self) -> Result<String, AuthError> {
        self.flush_pending();

        if let Some(account_id) = self.active_account() {
            // An unpersisted grant is newer than anything on disk
            let cached = match self.pending_blob(&account_id) {
                Some(blob) => Some(blob),
                None => self.store.load(&account_id)?,
            };
            match cached {
                Some(cached) => {
                    let force_refresh = self.force_refresh.swap(false, Ordering::SeqCst);
                    debug!("Attempting silent login for {}", account_id);
                    match self
                        .identity
                        .renew_silently(&account_id, &cached, force_refresh)
                    {
                        Ok(grant) => {
                            self.persist(&grant, Some(&cached));
                            return Ok(grant.access_token);
                        }
                        Err(SilentError::InteractionRequired(reason)) => {
                            info!("Interactive login required for {}: {}", account_id, reason);
                        }
                        Err(SilentError::Transient(e)) => {
                            if force_refresh {
                                self.force_refresh.store(true, Ordering::SeqCst);
                            }
                            return Err(AuthError::Failed(e));
                        }
                    }
                }
                None => info!("No stored credential for {}", account_id),
            }
        }

        let grant = checked(self.identity.acquire_interactive()?)?;
        self.activate(&grant.account_id);
        self.persist(&grant, None);
        Ok(grant.access_token)
    }

    /// Redeem an authorization code delivered to the redirect handler
    ///
    /// The resolved account becomes the active one.
    pub fn acquire_from_code(
        &self,
        code: &str,
        redirect: &RedirectContext,
        code_verifier: Option<&str>,
    ) -> Result<AccountId, AuthError> {
        let grant = checked(self.identity.redeem_code(code, redirect, code_verifier)?)?;
        self.activate(&grant.account_id);
        self.persist(&grant, None);
        info!("Account {} connected", grant.account_id);
        Ok(grant.account_id)
    }

    /// Forget the active account and delete its stored credential
    pub fn logout(&self) -> Result<(), StoreError> {
        let account_id = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(account_id) = account_id {
            self.pending_slot().take();
            self.store.remove(&account_id)?;
            info!("Logged out {}", account_id);
        }
        Ok(())
    }

    fn pending_slot(&self) -> std::sync::MutexGuard<'_, Option<(AccountId, Vec<u8>)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Credential still waiting to be written for `account_id`
    fn pending_blob(&self, account_id: &AccountId) -> Option<Vec<u8>> {
        self.pending_slot()
            .as_ref()
            .filter(|(pending, _)| pending == account_id)
            .map(|(_, blob)| blob.clone())
    }

    /// Write the grant's credential if it differs from `previous`
    fn persist(&self, grant: &Grant, previous: Option<&[u8]>) {
        if previous == Some(grant.credential.as_slice()) {
            return;
        }
        if let Err(e) = self.store.store(&grant.account_id, &grant.credential) {
            warn!(
                "Failed to persist credential for {}, will retry: {}",
                grant.account_id, e
            );
            *self.pending_slot() = Some((grant.account_id.clone(), grant.credential.clone()));
        } else {
            self.pending_slot().take();
        }
    }

    /// Retry a write that failed earlier
    fn flush_pending(&self) {
        let mut pending = self.pending_slot();
        let Some((account_id, blob)) = pending.take() else {
            return;
        };
        match self.store.store(&account_id, &blob) {
            Ok(()) => info!("Persisted deferred credential for {}", account_id),
            Err(e) => {
                warn!("Credential for {} still not persisted: {}", account_id, e);
                *pending = Some((account_id, blob));
            }
        }
    }
}

/// Reject grants that name no account; they could never be stored or resumed
fn checked(grant: Grant) -> Result<Grant, AuthError> {
    if grant.account_id.is_blank() {
        return Err(AuthError::Failed(anyhow::anyhow!(
            "identity provider returned a grant without an account id"
        )));
    }
    Ok(grant)
}

impl TokenSource for CredentialProvider {
    fn access_token(&self) -> Result<String, AuthError> {
        self.get_token()
    }

    fn invalidate(&self) {
        self.force_refresh.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryCredentialStore;
    use std::sync::atomic::AtomicUsize;

    /// Identity provider whose responses are set per test
    struct FakeIdentity {
        silent: Mutex<Option<Result<Grant, SilentError>>>,
        interactive: Mutex<Option<Result<Grant, AuthError>>>,
        silent_calls: AtomicUsize,
        interactive_calls: AtomicUsize,
        forced: AtomicBool,
    }

    impl FakeIdentity {
        fn new() -> Self {
            Self {
                silent: Mutex::new(None),
                interactive: Mutex::new(None),
                silent_calls: AtomicUsize::new(0),
                interactive_calls: AtomicUsize::new(0),
                forced: AtomicBool::new(false),
            }
        }

        fn on_silent(self, result: Result<Grant, SilentError>) -> Self {
            *self.silent.lock().unwrap() = Some(result);
            self
        }

        fn on_interactive(self, result: Result<Grant, AuthError>) -> Self {
            *self.interactive.lock().unwrap() = Some(result);
            self
        }
    }

    impl IdentityProvider for FakeIdentity {
        fn renew_silently(
            &self,
            _account_id: &AccountId,
            _cached: &[u8],
            force_refresh: bool,
        ) -> Result<Grant, SilentError> {
            self.silent_calls.fetch_add(1, Ordering::SeqCst);
            self.forced.store(force_refresh, Ordering::SeqCst);
            self.silent
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(SilentError::InteractionRequired("unscripted".into())))
        }

        fn acquire_interactive(&self) -> Result<Grant, AuthError> {
            self.interactive_calls.fetch_add(1, Ordering::SeqCst);
            self.interactive
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(AuthError::InteractionRequired))
        }

        fn redeem_code(
            &self,
            code: &str,
            _redirect: &RedirectContext,
            _code_verifier: Option<&str>,
        ) -> Result<Grant, AuthError> {
            Ok(grant("from-code", &format!("token-{}", code), b"code-blob"))
        }
    }

    fn grant(account: &str, token: &str, blob: &[u8]) -> Grant {
        Grant {
            account_id: AccountId::new(account),
            access_token: token.to_string(),
            credential: blob.to_vec(),
        }
    }

    #[test]
    fn test_silent_success_skips_interactive() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let account = AccountId::new("a");
        store.store(&account, b"cached").unwrap();
        let identity = Arc::new(FakeIdentity::new().on_silent(Ok(grant("a", "t1", b"cached"))));
        let provider = CredentialProvider::new(store.clone(), identity.clone()).with_account(account);

        assert_eq!(provider.get_token().unwrap(), "t1");
        assert_eq!(identity.interactive_calls.load(Ordering::SeqCst), 0);
        // unchanged material is not rewritten
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_silent_renewal_with_new_material_is_persisted() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let account = AccountId::new("a");
        store.store(&account, b"old").unwrap();
        let identity = Arc::new(FakeIdentity::new().on_silent(Ok(grant("a", "t1", b"new"))));
        let provider = CredentialProvider::new(store.clone(), identity).with_account(account.clone());

        provider.get_token().unwrap();

        assert_eq!(store.load(&account).unwrap().as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_interaction_required_falls_back_once() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let account = AccountId::new("a");
        store.store(&account, b"revoked").unwrap();
        let identity = Arc::new(
            FakeIdentity::new()
                .on_silent(Err(SilentError::InteractionRequired("invalid_grant".into())))
                .on_interactive(Ok(grant("a", "t2", b"fresh"))),
        );
        let provider = CredentialProvider::new(store.clone(), identity.clone()).with_account(account.clone());

        assert_eq!(provider.get_token().unwrap(), "t2");
        assert_eq!(identity.interactive_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.load(&account).unwrap().as_deref(), Some(&b"fresh"[..]));
    }

    #[test]
    fn test_no_account_goes_interactive_and_activates() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let identity = Arc::new(FakeIdentity::new().on_interactive(Ok(grant("new", "t", b"blob"))));
        let provider = CredentialProvider::new(store.clone(), identity.clone());

        provider.get_token().unwrap();

        assert_eq!(identity.silent_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.active_account(), Some(AccountId::new("new")));
        assert!(store.list_account_ids().unwrap().contains(&AccountId::new("new")));
    }

    #[test]
    fn test_both_paths_fail() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let provider = CredentialProvider::new(store, Arc::new(FakeIdentity::new()))
            .with_account(AccountId::new("a"));

        assert!(matches!(
            provider.get_token(),
            Err(AuthError::InteractionRequired)
        ));
    }

    #[test]
    fn test_transient_silent_failure_does_not_prompt() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let account = AccountId::new("a");
        store.store(&account, b"cached").unwrap();
        let identity = Arc::new(
            FakeIdentity::new().on_silent(Err(SilentError::Transient(anyhow::anyhow!("timeout")))),
        );
        let provider = CredentialProvider::new(store, identity.clone()).with_account(account);

        assert!(matches!(provider.get_token(), Err(AuthError::Failed(_))));
        assert_eq!(identity.interactive_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalidate_forces_refresh_once() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let account = AccountId::new("a");
        store.store(&account, b"cached").unwrap();
        let identity = Arc::new(FakeIdentity::new().on_silent(Ok(grant("a", "t", b"cached"))));
        let provider = CredentialProvider::new(store, identity.clone()).with_account(account);

        provider.invalidate();
        provider.access_token().unwrap();
        assert!(identity.forced.load(Ordering::SeqCst));

        *identity.silent.lock().unwrap() = Some(Ok(grant("a", "t", b"cached")));
        provider.access_token().unwrap();
        assert!(!identity.forced.load(Ordering::SeqCst));
    }

    #[test]
    fn test_acquire_from_code_persists_and_activates() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let provider = CredentialProvider::new(store.clone(), Arc::new(FakeIdentity::new()));
        let ctx = RedirectContext::new("https", "localhost:5001", "/signin-oidc");

        let account = provider.acquire_from_code("abc", &ctx, Some("verifier")).unwrap();

        assert_eq!(account, AccountId::new("from-code"));
        assert_eq!(provider.active_account(), Some(account.clone()));
        assert_eq!(store.load(&account).unwrap().as_deref(), Some(&b"code-blob"[..]));
    }

    #[test]
    fn test_grant_without_account_rejected() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let identity = Arc::new(FakeIdentity::new().on_interactive(Ok(grant(" ", "t", b"blob"))));
        let provider = CredentialProvider::new(store.clone(), identity);

        assert!(matches!(provider.get_token(), Err(AuthError::Failed(_))));
        assert_eq!(provider.active_account(), None);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_resume_picks_stored_account() {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.store(&AccountId::new("b"), b"x").unwrap();
        store.store(&AccountId::new("a"), b"y").unwrap();

        let provider = CredentialProvider::resume(store, Arc::new(FakeIdentity::new())).unwrap();

        assert_eq!(provider.active_account(), Some(AccountId::new("a")));
    }

    #[test]
    fn test_logout_removes_record() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let account = AccountId::new("a");
        store.store(&account, b"x").unwrap();
        let provider = CredentialProvider::new(store.clone(), Arc::new(FakeIdentity::new()))
            .with_account(account.clone());

        provider.logout().unwrap();

        assert_eq!(provider.active_account(), None);
        assert_eq!(store.load(&account).unwrap(), None);
    }

    /// Store whose writes fail until switched on
    struct FlakyStore {
        inner: InMemoryCredentialStore,
        writable: AtomicBool,
    }

    impl CredentialStore for FlakyStore {
        fn list_account_ids(&self) -> Result<std::collections::BTreeSet<AccountId>, StoreError> {
            self.inner.list_account_ids()
        }

        fn store(&self, account_id: &AccountId, blob: &[u8]) -> Result<(), StoreError> {
            if !self.writable.load(Ordering::SeqCst) {
                return Err(StoreError::io(
                    "/unwritable",
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                ));
            }
            self.inner.store(account_id, blob)
        }

        fn load(&self, account_id: &AccountId) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.load(account_id)
        }

        fn remove(&self, account_id: &AccountId) -> Result<(), StoreError> {
            self.inner.remove(account_id)
        }

        fn protection(&self) -> crate::storage::ProtectionLevel {
            self.inner.protection()
        }
    }

    #[test]
    fn test_failed_persist_is_retried_on_next_request() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryCredentialStore::new(),
            writable: AtomicBool::new(false),
        });
        let identity = Arc::new(FakeIdentity::new().on_interactive(Ok(grant("a", "t", b"fresh"))));
        let provider = CredentialProvider::new(store.clone(), identity.clone());

        // token is still handed out even though the write failed
        assert_eq!(provider.get_token().unwrap(), "t");
        assert_eq!(store.load(&AccountId::new("a")).unwrap(), None);

        store.writable.store(true, Ordering::SeqCst);
        *identity.silent.lock().unwrap() = Some(Ok(grant("a", "t", b"fresh")));
        provider.get_token().unwrap();

        assert_eq!(
            store.load(&AccountId::new("a")).unwrap().as_deref(),
            Some(&b"fresh"[..])
        );
    }

    #[test]
    fn test_unwritable_store_still_renews_silently() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryCredentialStore::new(),
            writable: AtomicBool::new(false),
        });
        let identity = Arc::new(FakeIdentity::new().on_interactive(Ok(grant("a", "t1", b"fresh"))));
        let provider = CredentialProvider::new(store.clone(), identity.clone());

        assert_eq!(provider.get_token().unwrap(), "t1");
        for token in ["t2", "t3"] {
            *identity.silent.lock().unwrap() = Some(Ok(grant("a", token, b"fresh")));
            assert_eq!(provider.get_token().unwrap(), token);
        }

        assert_eq!(identity.interactive_calls.load(Ordering::SeqCst), 1);
        assert_eq!(identity.silent_calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.load(&AccountId::new("a")).unwrap(), None);
    }
}
