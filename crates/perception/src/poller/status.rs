//! Liveness counter

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic tick counter shared between the poller and readers
#[derive(Debug, Clone, Default)]
pub struct StatusCounter(Arc<AtomicU64>);

impl StatusCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
