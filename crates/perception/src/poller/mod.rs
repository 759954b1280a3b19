//! Incremental polling engine
//!
//! A single background task asks the token source for a bearer token, fetches
//! everything at or after the watermark, and appends new items to a shared
//! buffer that external callers drain.

mod buffer;
mod engine;
mod source;
mod status;
mod watermark;

pub use buffer::ConsumeBuffer;
pub use engine::{PollOptions, Poller, PollerHandle, TickOutcome};
pub use source::{Fetcher, TokenSource};
pub use status::StatusCounter;
pub use watermark::Watermark;
