//! Graph API response normalization
//!
//! Converts Graph messages to perceived items.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::api::{GraphMessage, Recipient};
use crate::models::PerceivedItem;

/// Normalize a Graph message to a perceived item
///
/// Fails if the message has no parseable `receivedDateTime`; without it the
/// item cannot be placed relative to the watermark.
pub fn normalize_message(message: GraphMessage) -> Result<PerceivedItem> {
    let received = message
        .received_date_time
        .as_deref()
        .context("Message has no receivedDateTime")?;
    let timestamp = DateTime::parse_from_rfc3339(received)
        .with_context(|| format!("Invalid receivedDateTime: {}", received))?
        .with_timezone(&Utc);

    let mut item = PerceivedItem::new(
        message.id,
        timestamp,
        message.body_preview.unwrap_or_default(),
    );
    item.subject = message.subject.filter(|s| !s.is_empty());
    item.sender = message.from.as_ref().and_then(format_sender);
    Ok(item)
}

/// `Name <address>`, or whichever half is present
fn format_sender(from: &Recipient) -> Option<String> {
    let email = from.email_address.as_ref()?;
    let name = email.name.as_deref().filter(|n| !n.is_empty());
    let address = email.address.as_deref().filter(|a| !a.is_empty());
    match (name, address) {
        (Some(name), Some(address)) if name != address => Some(format!("{} <{}>", name, address)),
        (_, Some(address)) => Some(address.to_string()),
        (Some(name), None) => Some(name.to_string()),
        (None, None) => None,
    }
}
