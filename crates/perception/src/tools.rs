//! Tool-facing surface
//!
//! What an assistant front end may call. Everything here reads through a
//! [`PollerHandle`]; the poll loop itself is never touched.

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;

use crate::poller::PollerHandle;
use crate::storage::ProtectionLevel;

/// Returned by [`Tools::read_mind`] when nothing arrived since the last read
pub const NO_THOUGHTS: &str = "No thoughts detected.";

/// Returned by [`Tools::predict_the_future`]
pub const PREDICTION: &str = "Nine of Hearts";

/// Snapshot of poller liveness
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Ticks started since launch
    pub ticks: u64,
    /// Items waiting to be read
    pub buffered: usize,
    pub watermark: DateTime<Utc>,
    /// How credential records are protected at rest
    pub protection: ProtectionLevel,
}

#[derive(Debug, Clone)]
pub struct Tools {
    handle: PollerHandle,
    protection: ProtectionLevel,
}

impl Tools {
    pub fn new(handle: PollerHandle, protection: ProtectionLevel) -> Self {
        Self { handle, protection }
    }

    /// Drain everything perceived since the last call
    ///
    /// Returns the items as a JSON array, newest first, or [`NO_THOUGHTS`]
    /// when the buffer was empty.
    pub fn read_mind(&self) -> String {
        let items = self.handle.buffer().drain_all();
        if items.is_empty() {
            return NO_THOUGHTS.to_string();
        }
        match serde_json::to_string(&items) {
            Ok(json) => {
                info!("Read {} perceived items; buffer cleared", items.len());
                json
            }
            Err(e) => {
                // Items are already drained; don't lose them silently
                error!("Failed to serialize {} perceived items: {}", items.len(), e);
                self.handle.buffer().extend(items);
                NO_THOUGHTS.to_string()
            }
        }
    }

    pub fn predict_the_future(&self) -> &'static str {
        PREDICTION
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            ticks: self.handle.counter().read(),
            buffered: self.handle.buffer().len(),
            watermark: self.handle.watermark().timestamp(),
            protection: self.protection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, FetchError};
    use crate::models::PerceivedItem;
    use crate::poller::{Fetcher, PollOptions, Poller, TokenSource, Watermark};
    use chrono::{TimeDelta, TimeZone};
    use std::sync::Arc;

    struct NoToken;

    impl TokenSource for NoToken {
        fn access_token(&self) -> Result<String, AuthError> {
            Err(AuthError::InteractionRequired)
        }
    }

    struct NoFetch;

    impl Fetcher for NoFetch {
        fn fetch_since(
            &self,
            _access_token: &str,
            _watermark: DateTime<Utc>,
        ) -> Result<Vec<PerceivedItem>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn tools() -> Tools {
        let poller = Poller::new(Arc::new(NoToken), Arc::new(NoFetch), PollOptions::default())
            .with_watermark(Watermark::at(t0()));
        Tools::new(poller.handle(), ProtectionLevel::Encrypted)
    }

    #[test]
    fn test_read_mind_empty() {
        assert_eq!(tools().read_mind(), NO_THOUGHTS);
    }

    #[test]
    fn test_read_mind_drains_newest_first() {
        let tools = tools();
        tools
            .handle
            .buffer()
            .append(PerceivedItem::new("a", t0() + TimeDelta::seconds(1), "first"));
        tools
            .handle
            .buffer()
            .append(PerceivedItem::new("b", t0() + TimeDelta::seconds(3), "second"));

        let json: serde_json::Value = serde_json::from_str(&tools.read_mind()).unwrap();
        let ids: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(tools.read_mind(), NO_THOUGHTS);
    }

    #[test]
    fn test_prediction() {
        assert_eq!(tools().predict_the_future(), "Nine of Hearts");
    }

    #[test]
    fn test_status() {
        let tools = tools();
        tools.handle.buffer().append(PerceivedItem::new("a", t0(), "x"));
        tools.handle.counter().increment();

        let status = tools.status();
        assert_eq!(status.ticks, 1);
        assert_eq!(status.buffered, 1);
        assert_eq!(status.watermark, t0());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["protection"], "encrypted");
    }
}
