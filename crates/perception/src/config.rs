//! Configuration loading for the Graph integration
//!
//! Settings are loaded from (in order of priority):
//! 1. Compile-time embedded values (for production builds)
//! 2. JSON file (~/.config/clairvoyant/graph-credentials.json)
//! 3. Runtime environment variables (fallback)

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::poller::PollOptions;

/// Settings filename in the config directory
const SETTINGS_FILE: &str = "graph-credentials.json";

const DEFAULT_INSTANCE: &str = "https://login.microsoftonline.com/";
const DEFAULT_TENANT: &str = "common";
const DEFAULT_CALLBACK_PATH: &str = "/signin-oidc";

/// App registration and polling settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub client_id: String,
    pub tenant_id: String,
    /// Authority host, e.g. `https://login.microsoftonline.com/`
    pub instance: String,
    /// Present only for confidential clients
    pub client_secret: Option<String>,
    pub callback_path: String,
    pub poll_interval: Duration,
    pub watermark_tick: TimeDelta,
}

/// On-disk settings format
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SettingsFile {
    client_id: String,
    tenant_id: Option<String>,
    instance: Option<String>,
    client_secret: Option<String>,
    callback_path: Option<String>,
    poll_interval_secs: Option<u64>,
    watermark_tick_millis: Option<i64>,
}

impl Settings {
    /// Public-client settings with defaults for everything but the client id
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            tenant_id: DEFAULT_TENANT.to_string(),
            instance: DEFAULT_INSTANCE.to_string(),
            client_secret: None,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            poll_interval: PollOptions::DEFAULT_INTERVAL,
            watermark_tick: TimeDelta::seconds(1),
        }
    }

    /// Load settings using the following priority:
    /// 1. Compile-time embedded values
    /// 2. JSON file (~/.config/clairvoyant/graph-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(settings) = Self::from_compile_time() {
            return Ok(settings);
        }

        if config::config_exists(SETTINGS_FILE) {
            let file: SettingsFile = config::load_json(SETTINGS_FILE)?;
            return Self::from_settings_file(file);
        }

        Self::from_env()
    }

    /// Values embedded at build time.
    /// Build with: CLAIRVOYANT_CLIENT_ID=xxx CLAIRVOYANT_TENANT_ID=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("CLAIRVOYANT_CLIENT_ID")?;
        if client_id.is_empty() {
            return None;
        }

        let mut settings = Self::new(client_id);
        if let Some(tenant) = option_env!("CLAIRVOYANT_TENANT_ID").filter(|t| !t.is_empty()) {
            settings.tenant_id = tenant.to_string();
        }
        Some(settings)
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let file: SettingsFile = config::load_json_file(path)?;
        Self::from_settings_file(file)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let file: SettingsFile =
            serde_json::from_str(json).context("Failed to parse settings JSON")?;
        Self::from_settings_file(file)
    }

    fn from_settings_file(file: SettingsFile) -> Result<Self> {
        if file.client_id.trim().is_empty() {
            anyhow::bail!("Settings file has an empty ClientId");
        }

        let mut settings = Self::new(file.client_id);
        if let Some(tenant) = file.tenant_id {
            settings.tenant_id = tenant;
        }
        if let Some(instance) = file.instance {
            settings.instance = instance;
        }
        settings.client_secret = file.client_secret.filter(|s| !s.is_empty());
        if let Some(path) = file.callback_path {
            settings.callback_path = path;
        }
        if let Some(secs) = file.poll_interval_secs {
            settings.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(millis) = file.watermark_tick_millis {
            settings.watermark_tick = TimeDelta::milliseconds(millis.max(1));
        }
        Ok(settings)
    }

    /// Load settings from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("CLAIRVOYANT_CLIENT_ID")
            .context("CLAIRVOYANT_CLIENT_ID environment variable not set")?;

        let mut settings = Self::new(client_id);
        if let Ok(tenant) = std::env::var("CLAIRVOYANT_TENANT_ID") {
            settings.tenant_id = tenant;
        }
        if let Ok(instance) = std::env::var("CLAIRVOYANT_INSTANCE") {
            settings.instance = instance;
        }
        settings.client_secret = std::env::var("CLAIRVOYANT_CLIENT_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        if let Ok(path) = std::env::var("CLAIRVOYANT_CALLBACK_PATH") {
            settings.callback_path = path;
        }
        if let Ok(secs) = std::env::var("CLAIRVOYANT_POLL_INTERVAL_SECS") {
            let secs: u64 = secs
                .parse()
                .context("CLAIRVOYANT_POLL_INTERVAL_SECS must be a whole number of seconds")?;
            settings.poll_interval = Duration::from_secs(secs.max(1));
        }
        Ok(settings)
    }

    /// Get the default settings file path (~/.config/clairvoyant/graph-credentials.json)
    pub fn default_settings_path() -> Option<PathBuf> {
        config::config_path(SETTINGS_FILE)
    }

    /// Check if settings are available (compile-time, file, or env vars)
    pub fn is_available() -> bool {
        Self::from_compile_time().is_some()
            || config::config_exists(SETTINGS_FILE)
            || std::env::var("CLAIRVOYANT_CLIENT_ID").is_ok()
    }

    /// Confidential clients authenticate with a secret and cannot prompt
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    /// OAuth 2.0 endpoint base, e.g. `https://login.microsoftonline.com/common/oauth2/v2.0`
    pub fn authority(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0",
            self.instance.trim_end_matches('/'),
            self.tenant_id
        )
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: self.poll_interval,
            watermark_tick: self.watermark_tick,
        }
    }
}
