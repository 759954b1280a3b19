//! Time watermark bounding which items count as already seen

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Non-decreasing point in time
///
/// Items with a timestamp at or after the watermark are new. The only way to
/// move it is [`Watermark::advanced_past`], which never goes backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp)
    }

    pub fn starting_now() -> Self {
        Self(Utc::now())
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn admits(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.0
    }

    /// Watermark just past `latest`, one `tick` later, or `self` if that
    /// would move backward
    pub fn advanced_past(self, latest: DateTime<Utc>, tick: TimeDelta) -> Self {
        let candidate = latest.checked_add_signed(tick).unwrap_or(latest);
        Self(self.0.max(candidate))
    }
}
