//! Clairvoyant - watches a Microsoft 365 mailbox and answers tool calls
//!
//! Usage:
//!   clairvoyant            poll the mailbox and serve MCP tools over stdio
//!   clairvoyant connect    sign in and store the credential
//!   clairvoyant logout     forget the stored credential
//!
//! Logs go to stderr; stdout carries only MCP messages.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use perception::{
    CredentialProvider, CredentialStore, FileTokenStore, GraphFetcher, MicrosoftIdentity, Poller,
    ProtectionLevel, Settings, Tools,
};
use tokio_util::sync::CancellationToken;

mod server;

/// How long shutdown waits for abandoned network calls
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

enum Command {
    Serve,
    Connect,
    Logout,
}

impl Command {
    fn parse(arg: Option<&str>) -> Result<Self> {
        match arg {
            None | Some("serve") => Ok(Self::Serve),
            Some("connect") => Ok(Self::Connect),
            Some("logout") => Ok(Self::Logout),
            Some(other) => anyhow::bail!(
                "Unknown command '{}'. Expected one of: serve, connect, logout",
                other
            ),
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();

    let command = Command::parse(std::env::args().nth(1).as_deref())?;

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(run(command));
    // In-flight HTTP calls are abandoned rather than awaited
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(command: Command) -> Result<()> {
    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Microsoft Graph settings not found: {}", e);
            if let Some(path) = Settings::default_settings_path() {
                warn!(
                    "To configure mailbox access, either:\n\
                     1. Place your app registration at: {}\n\
                     2. Or set environment variables: CLAIRVOYANT_CLIENT_ID and CLAIRVOYANT_TENANT_ID",
                    path.display()
                );
            }
            return Err(e);
        }
    };

    let store = Arc::new(FileTokenStore::open_default()?);
    if store.protection() == ProtectionLevel::Plaintext {
        warn!(
            "Credentials in {} are stored unencrypted on this platform",
            store.dir().display()
        );
    }

    let identity = Arc::new(MicrosoftIdentity::new(settings.clone()));
    let provider = Arc::new(
        CredentialProvider::resume(store.clone(), identity.clone())
            .context("Failed to read stored credentials")?,
    );

    match command {
        Command::Serve => serve(settings, store, provider).await,
        Command::Connect => connect(&settings, identity, provider).await,
        Command::Logout => {
            provider.logout().context("Failed to remove stored credential")?;
            info!("Signed out");
            Ok(())
        }
    }
}

/// Sign in interactively and persist the resulting credential
async fn connect(
    settings: &Settings,
    identity: Arc<MicrosoftIdentity>,
    provider: Arc<CredentialProvider>,
) -> Result<()> {
    let confidential = settings.is_confidential();
    let account = tokio::task::spawn_blocking(move || -> Result<_> {
        if confidential {
            // Confidential clients can't prompt from get_token; run the
            // browser flow here and redeem the code ourselves.
            let authorization = identity.authorize_via_loopback()?;
            let account = provider.acquire_from_code(
                &authorization.code,
                &authorization.redirect,
                Some(&authorization.code_verifier),
            )?;
            Ok(account)
        } else {
            provider.get_token()?;
            provider
                .active_account()
                .context("Sign-in finished without an account")
        }
    })
    .await
    .context("Sign-in task failed")??;

    info!("Connected as {}", account);
    Ok(())
}

/// Poll in the background and answer MCP tool calls until the client disconnects
async fn serve(
    settings: Settings,
    store: Arc<FileTokenStore>,
    provider: Arc<CredentialProvider>,
) -> Result<()> {
    if provider.active_account().is_none() {
        warn!("No stored account; run `clairvoyant connect` to sign in");
    }

    let poller = Poller::new(provider, Arc::new(GraphFetcher::new()), settings.poll_options());
    let tools = Tools::new(poller.handle(), store.protection());
    let cancel = CancellationToken::new();
    let task = poller.spawn(cancel.clone());

    tokio::select! {
        result = server::serve_stdio(tools) => {
            if let Err(e) = result {
                error!("MCP server failed: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    cancel.cancel();
    task.await.context("Poller task failed")?;
    Ok(())
}
