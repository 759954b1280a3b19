//! Perception crate - mailbox polling and credential lifecycle
//!
//! This crate provides:
//! - A watermark-driven poller that buffers newly received items
//! - A consume-and-clear buffer drained by tool calls
//! - Credential acquisition with silent renewal and interactive fallback
//! - Encrypted per-account credential storage
//! - Microsoft Graph and identity platform adapters
//!
//! The poll loop runs on tokio; network adapters are synchronous (ureq) and
//! are moved onto the blocking pool by the poller.

pub mod auth;
pub mod config;
pub mod error;
pub mod graph;
pub mod models;
pub mod poller;
pub mod storage;
pub mod tools;

pub use auth::{CredentialProvider, Grant, IdentityProvider, RedirectContext};
pub use crate::config::Settings;
pub use error::{AuthError, FetchError, SilentError, StoreError};
pub use graph::{GraphFetcher, MicrosoftIdentity};
pub use models::{AccountId, CredentialRecord, ItemId, PerceivedItem};
pub use poller::{
    ConsumeBuffer, Fetcher, PollOptions, Poller, PollerHandle, StatusCounter, TickOutcome,
    TokenSource, Watermark,
};
pub use storage::{
    CredentialStore, FileTokenStore, InMemoryCredentialStore, ProtectionLevel, Protector,
    select_protector,
};
pub use tools::{StatusReport, Tools};
