//! Persisted credential envelope

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::AccountId;

/// One account's durable refresh material
///
/// The blob is opaque to everything except the identity provider that
/// produced it. On disk the record is pretty JSON with the blob base64
/// encoded, then passed through the configured protector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub account_id: AccountId,
    #[serde(serialize_with = "encode_blob", deserialize_with = "decode_blob")]
    pub blob: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl CredentialRecord {
    /// Create a record stamped with the current time
    pub fn new(account_id: AccountId, blob: Vec<u8>) -> Self {
        Self {
            account_id,
            blob,
            timestamp: Utc::now(),
        }
    }
}

fn encode_blob<S: Serializer>(blob: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64_STANDARD.encode(blob))
}

fn decode_blob<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64_STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}
