//! The poll loop

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::TimeDelta;
use log::{debug, error, info, warn};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::{ConsumeBuffer, Fetcher, StatusCounter, TokenSource, Watermark};
use crate::error::FetchError;
use crate::models::PerceivedItem;

/// Timing knobs for the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Delay between ticks
    pub interval: Duration,
    /// Amount added past the newest item when advancing the watermark
    pub watermark_tick: TimeDelta,
}

impl PollOptions {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            watermark_tick: TimeDelta::seconds(1),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fetch succeeded; this many new items were buffered
    Perceived(usize),
    /// No token could be obtained
    AuthFailed,
    /// The fetch call failed
    FetchFailed,
    /// Cancellation arrived while a call was in flight; nothing was applied
    Cancelled,
}

/// Read side of a poller, handed to whatever exposes its state
#[derive(Debug, Clone)]
pub struct PollerHandle {
    buffer: ConsumeBuffer,
    counter: StatusCounter,
    watermark: Arc<RwLock<Watermark>>,
}

impl PollerHandle {
    pub fn buffer(&self) -> &ConsumeBuffer {
        &self.buffer
    }

    pub fn counter(&self) -> &StatusCounter {
        &self.counter
    }

    pub fn watermark(&self) -> Watermark {
        *self.watermark.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Watermark-driven poller for one account
///
/// Every tick bumps the counter, asks for a token, fetches since the
/// watermark and buffers what came back. Failures are logged and the loop
/// moves on; only cancellation ends it.
pub struct Poller {
    tokens: Arc<dyn TokenSource>,
    fetcher: Arc<dyn Fetcher>,
    options: PollOptions,
    buffer: ConsumeBuffer,
    counter: StatusCounter,
    watermark: Arc<RwLock<Watermark>>,
}

impl Poller {
    /// Create a poller whose watermark starts at the current time
    pub fn new(tokens: Arc<dyn TokenSource>, fetcher: Arc<dyn Fetcher>, options: PollOptions) -> Self {
        Self {
            tokens,
            fetcher,
            options,
            buffer: ConsumeBuffer::new(),
            counter: StatusCounter::new(),
            watermark: Arc::new(RwLock::new(Watermark::starting_now())),
        }
    }

    /// Start from a specific watermark instead of now
    pub fn with_watermark(self, watermark: Watermark) -> Self {
        *self.watermark.write().unwrap_or_else(PoisonError::into_inner) = watermark;
        self
    }

    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            buffer: self.buffer.clone(),
            counter: self.counter.clone(),
            watermark: Arc::clone(&self.watermark),
        }
    }

    pub fn watermark(&self) -> Watermark {
        *self.watermark.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one poll cycle without the trailing delay
    pub async fn tick(&self, cancel: &CancellationToken) -> TickOutcome {
        self.counter.increment();

        let tokens = Arc::clone(&self.tokens);
        let access_token = match run_blocking(cancel, move || tokens.access_token()).await {
            None => return TickOutcome::Cancelled,
            Some(Ok(Ok(token))) => token,
            Some(Ok(Err(e))) => {
                warn!("Could not obtain an access token: {}", e);
                return TickOutcome::AuthFailed;
            }
            Some(Err(e)) => {
                error!("Token task failed: {}", e);
                return TickOutcome::AuthFailed;
            }
        };

        let since = self.watermark();
        let fetcher = Arc::clone(&self.fetcher);
        let fetched = run_blocking(cancel, move || {
            fetcher.fetch_since(&access_token, since.timestamp())
        })
        .await;

        let items = match fetched {
            None => return TickOutcome::Cancelled,
            Some(Ok(Ok(items))) => items,
            Some(Ok(Err(e))) => {
                if matches!(e, FetchError::Unauthorized) {
                    self.tokens.invalidate();
                }
                warn!("Fetch since {} failed: {}", since.timestamp(), e);
                return TickOutcome::FetchFailed;
            }
            Some(Err(e)) => {
                let e = FetchError::Task(e.to_string());
                error!("{}", e);
                return TickOutcome::FetchFailed;
            }
        };

        TickOutcome::Perceived(self.apply(since, items))
    }

    /// Buffer the items at or after `since` and advance the watermark
    ///
    /// No suspension points: a tick's results are applied entirely or not at all.
    fn apply(&self, since: Watermark, items: Vec<PerceivedItem>) -> usize {
        let fetched = items.len();
        let fresh: Vec<PerceivedItem> = items
            .into_iter()
            .filter(|item| since.admits(item.timestamp))
            .collect();

        if fresh.len() < fetched {
            debug!("Dropped {} items older than the watermark", fetched - fresh.len());
        }

        let Some(latest) = fresh.iter().map(|item| item.timestamp).max() else {
            return 0;
        };
        let count = fresh.len();

        self.buffer.extend(fresh);
        let mut watermark = self.watermark.write().unwrap_or_else(PoisonError::into_inner);
        *watermark = watermark.advanced_past(latest, self.options.watermark_tick);
        debug!("Buffered {} items, watermark now {}", count, watermark.timestamp());
        count
    }

    /// Poll until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        info!("Perception poller is starting");

        while !cancel.is_cancelled() {
            debug!("Perception poller tick {}", self.counter.read() + 1);
            match self.tick(&cancel).await {
                TickOutcome::Perceived(0) => {}
                TickOutcome::Perceived(n) => info!("Perceived {} new items", n),
                TickOutcome::AuthFailed | TickOutcome::FetchFailed => {}
                TickOutcome::Cancelled => break,
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.interval) => {}
            }
        }

        info!("Perception poller is stopping");
    }

    /// Run the loop on a background task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

/// Run a blocking call on the blocking pool, giving up as soon as `cancel` fires
///
/// Returns `None` on cancellation. The abandoned call finishes in the
/// background and its result is dropped.
async fn run_blocking<T, F>(cancel: &CancellationToken, f: F) -> Option<Result<T, JoinError>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        return None;
    }
    let task = tokio::task::spawn_blocking(f);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = task => Some(result),
    }
}
