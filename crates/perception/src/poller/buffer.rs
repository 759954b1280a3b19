//! Append / snapshot-and-clear buffer

use std::cmp::Reverse;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::PerceivedItem;

/// Thread-safe multiset of perceived items
///
/// Clones share the same storage. `drain_all` swaps the contents out under
/// the lock, so an item is returned by exactly one drain.
#[derive(Debug, Clone, Default)]
pub struct ConsumeBuffer {
    items: Arc<Mutex<Vec<PerceivedItem>>>,
}

impl ConsumeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PerceivedItem>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn append(&self, item: PerceivedItem) {
        self.lock().push(item);
    }

    /// Append a whole batch under one lock
    pub fn extend(&self, items: impl IntoIterator<Item = PerceivedItem>) {
        self.lock().extend(items);
    }

    /// Take everything, newest first, leaving the buffer empty
    pub fn drain_all(&self) -> Vec<PerceivedItem> {
        let mut items = std::mem::take(&mut *self.lock());
        items.sort_by_key(|item| Reverse(item.timestamp));
        items
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
