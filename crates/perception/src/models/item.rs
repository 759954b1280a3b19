//! Perceived item model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a remote item (Graph message id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An item observed by the poller
///
/// Immutable once fetched. Identity is the `id`; the poller itself never
/// compares ids and relies on the watermark instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerceivedItem {
    pub id: ItemId,
    /// When the remote source received the item
    pub timestamp: DateTime<Utc>,
    /// Text content (a preview for mail messages)
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl PerceivedItem {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>, body: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(id),
            timestamp,
            body: body.into(),
            subject: None,
            sender: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}
