//! Microsoft identity platform OAuth2
//!
//! Implements the refresh-token grant for silent renewal and the
//! authorization-code grant (with PKCE) for interactive login and for codes
//! received by an external redirect handler.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::api::{ClientInfo, TokenResponse};
use super::callback::LoopbackListener;
use super::pkce::{PkceChallenge, random_state};
use crate::auth::{Grant, IdentityProvider, RedirectContext};
use crate::config::Settings;
use crate::error::{AuthError, SilentError};
use crate::models::AccountId;

/// Refresh material kept in the credential store
///
/// Serialized as JSON; this is the opaque blob the rest of the crate passes
/// around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCredential {
    pub home_account_id: AccountId,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp when the access token expires
    pub expires_at: Option<i64>,
}

impl CachedCredential {
    /// Seconds of remaining lifetime below which the access token is renewed
    const EXPIRY_MARGIN_SECS: i64 = 300;

    fn access_token_is_fresh(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > Utc::now().timestamp() + Self::EXPIRY_MARGIN_SECS)
    }

    fn to_blob(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize credential")
    }
}

/// Everything needed to redeem a code obtained through the loopback listener
#[derive(Debug, Clone)]
pub struct LoopbackAuthorization {
    pub code: String,
    pub redirect: RedirectContext,
    pub code_verifier: String,
}

/// Identity provider backed by the Microsoft identity platform v2.0 endpoints
pub struct MicrosoftIdentity {
    settings: Settings,
    agent: ureq::Agent,
}

impl MicrosoftIdentity {
    /// Scopes requested for every grant
    const SCOPES: &'static str = "https://graph.microsoft.com/.default openid profile offline_access";

    /// How long the loopback listener waits for the user to finish consent
    const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(settings: Settings) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Self::REQUEST_TIMEOUT))
            .build()
            .into();
        Self { settings, agent }
    }

    fn token_url(&self) -> String {
        format!("{}/token", self.settings.authority())
    }

    /// Build the URL the user's browser is sent to
    pub fn authorization_url(
        &self,
        redirect: &RedirectContext,
        pkce: &PkceChallenge,
        state: &str,
    ) -> Result<url::Url> {
        let redirect_uri = redirect.redirect_uri();
        url::Url::parse_with_params(
            &format!("{}/authorize", self.settings.authority()),
            [
                ("client_id", self.settings.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_mode", "query"),
                ("scope", Self::SCOPES),
                ("state", state),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("prompt", "select_account"),
            ],
        )
        .context("Invalid authority URL")
    }

    /// Run the browser consent flow against a local listener
    ///
    /// The redirect path is the configured callback path, so the same app
    /// registration serves confidential and public clients.
    pub fn authorize_via_loopback(&self) -> Result<LoopbackAuthorization> {
        let listener = LoopbackListener::bind()?;
        let redirect = RedirectContext::new("http", listener.host(), &self.settings.callback_path);
        let pkce = PkceChallenge::generate();
        let state = random_state();
        let auth_url = self.authorization_url(&redirect, &pkce, &state)?;

        info!("Microsoft sign-in required; opening browser");
        info!("If the browser doesn't open, visit: {}", auth_url);
        if let Err(e) = open::that(auth_url.as_str()) {
            warn!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        let code = listener.wait_for_code(&state, Self::CONSENT_TIMEOUT)?;
        Ok(LoopbackAuthorization {
            code,
            redirect,
            code_verifier: pkce.verifier,
        })
    }

    /// POST a form to the token endpoint
    fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ureq::Error> {
        let mut fields: Vec<(&str, &str)> = vec![
            ("client_id", self.settings.client_id.as_str()),
            ("scope", Self::SCOPES),
            ("client_info", "1"),
        ];
        if let Some(secret) = &self.settings.client_secret {
            fields.push(("client_secret", secret.as_str()));
        }
        fields.extend_from_slice(form);

        let mut response = self.agent.post(&self.token_url()).send_form(fields)?;
        response.body_mut().read_json::<TokenResponse>()
    }

    /// Exchange an authorization code for tokens
    fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<Grant> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let token = self
            .request_token(&form)
            .context("Failed to exchange authorization code")?;

        let client_info = token
            .client_info
            .as_deref()
            .context("Token response has no client_info")?;
        let home_account_id = decode_client_info(client_info)?;
        let refresh_token = token
            .refresh_token
            .clone()
            .context("Token response has no refresh token; was offline_access granted?")?;

        let credential = CachedCredential {
            home_account_id,
            access_token: token.access_token,
            refresh_token,
            expires_at: expires_at(token.expires_in),
        };
        grant_from(credential)
    }

    /// Redeem the refresh token in `cached`
    fn refresh(&self, cached: &CachedCredential) -> Result<Grant, SilentError> {
        let result = self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", cached.refresh_token.as_str()),
        ]);

        let token = match result {
            Ok(token) => token,
            Err(ureq::Error::StatusCode(status @ (400 | 401))) => {
                return Err(SilentError::InteractionRequired(format!(
                    "refresh token rejected (HTTP {})",
                    status
                )));
            }
            Err(e) => {
                return Err(SilentError::Transient(
                    anyhow::Error::new(e).context("Failed to refresh access token"),
                ));
            }
        };

        let credential = CachedCredential {
            home_account_id: cached.home_account_id.clone(),
            access_token: token.access_token,
            // Preserve the refresh token if not returned
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| cached.refresh_token.clone()),
            expires_at: expires_at(token.expires_in),
        };
        grant_from(credential).map_err(SilentError::Transient)
    }
}

impl IdentityProvider for MicrosoftIdentity {
    fn renew_silently(
        &self,
        account_id: &AccountId,
        cached: &[u8],
        force_refresh: bool,
    ) -> Result<Grant, SilentError> {
        let credential: CachedCredential = serde_json::from_slice(cached).map_err(|e| {
            SilentError::InteractionRequired(format!("cached credential unreadable: {}", e))
        })?;

        if credential.home_account_id != *account_id {
            return Err(SilentError::InteractionRequired(format!(
                "cached credential belongs to {}",
                credential.home_account_id
            )));
        }

        if !force_refresh && credential.access_token_is_fresh() {
            debug!("Reusing cached access token for {}", account_id);
            return Ok(Grant {
                account_id: credential.home_account_id,
                access_token: credential.access_token,
                credential: cached.to_vec(),
            });
        }

        debug!("Refreshing access token for {}", account_id);
        self.refresh(&credential)
    }

    fn acquire_interactive(&self) -> Result<Grant, AuthError> {
        if self.settings.is_confidential() {
            return Err(AuthError::InteractionRequired);
        }

        let authorization = self.authorize_via_loopback().map_err(AuthError::Failed)?;
        let grant = self
            .exchange_code(
                &authorization.code,
                &authorization.redirect.redirect_uri(),
                Some(&authorization.code_verifier),
            )
            .map_err(AuthError::Failed)?;
        info!("Authentication successful for {}", grant.account_id);
        Ok(grant)
    }

    fn redeem_code(
        &self,
        code: &str,
        redirect: &RedirectContext,
        code_verifier: Option<&str>,
    ) -> Result<Grant, AuthError> {
        self.exchange_code(code, &redirect.redirect_uri(), code_verifier)
            .map_err(AuthError::Failed)
    }
}

/// Absolute expiry; a lifetime that doesn't fit is treated as unknown
fn expires_at(expires_in: Option<u64>) -> Option<i64> {
    let secs = i64::try_from(expires_in?).ok()?;
    Utc::now().timestamp().checked_add(secs)
}

fn grant_from(credential: CachedCredential) -> Result<Grant> {
    let blob = credential.to_blob()?;
    Ok(Grant {
        account_id: credential.home_account_id,
        access_token: credential.access_token,
        credential: blob,
    })
}

/// Decode `client_info` into the home account id `<uid>.<utid>`
fn decode_client_info(client_info: &str) -> Result<AccountId> {
    let json = BASE64_URL_SAFE_NO_PAD
        .decode(client_info.trim_end_matches('='))
        .context("client_info is not base64url")?;
    let info: ClientInfo = serde_json::from_slice(&json).context("client_info is not valid JSON")?;
    Ok(AccountId::new(format!("{}.{}", info.uid, info.utid)))
}
