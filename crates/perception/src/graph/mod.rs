//! Microsoft Graph integration
//!
//! This module provides:
//! - OAuth2 against the Microsoft identity platform (public and confidential clients)
//! - A Graph API client that fetches mailbox messages since a watermark
//! - Response normalization to perceived items

mod callback;
mod client;
mod identity;
mod normalize;
mod pkce;

pub use callback::{CallbackParams, LoopbackListener};
pub use client::GraphFetcher;
pub use identity::{CachedCredential, LoopbackAuthorization, MicrosoftIdentity};
pub use normalize::normalize_message;
pub use pkce::PkceChallenge;

/// Graph and identity platform response types
pub mod api {
    use serde::Deserialize;

    /// One page of `GET /me/messages`
    #[derive(Debug, Deserialize)]
    pub struct ListMessagesResponse {
        #[serde(default)]
        pub value: Vec<GraphMessage>,
        #[serde(rename = "@odata.nextLink")]
        pub next_link: Option<String>,
    }

    /// Message projection selected by the fetcher
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GraphMessage {
        pub id: String,
        pub received_date_time: Option<String>,
        pub subject: Option<String>,
        pub body_preview: Option<String>,
        pub from: Option<Recipient>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Recipient {
        pub email_address: Option<EmailAddress>,
    }

    #[derive(Debug, Deserialize)]
    pub struct EmailAddress {
        pub name: Option<String>,
        pub address: Option<String>,
    }

    /// Token endpoint response
    #[derive(Debug, Deserialize)]
    pub struct TokenResponse {
        pub access_token: String,
        pub refresh_token: Option<String>,
        pub expires_in: Option<u64>,
        /// base64url JSON `{"uid": ..., "utid": ...}`, present when `client_info=1`
        pub client_info: Option<String>,
        #[allow(dead_code)]
        pub token_type: Option<String>,
    }

    /// Decoded `client_info`
    #[derive(Debug, Deserialize)]
    pub struct ClientInfo {
        pub uid: String,
        pub utid: String,
    }
}
