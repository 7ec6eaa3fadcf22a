//! Persisted envelope codec.
//!
//! Entries are stored as `{"data": <T>, "timestamp": <epoch millis>, "refreshCount"?: <n>}`.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// A cached payload with the time of its most recent write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
    #[serde(
        rename = "refreshCount",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_count: Option<u32>,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, timestamp: i64, refresh_count: Option<u32>) -> Self {
        Self {
            data,
            timestamp,
            refresh_count,
        }
    }

    /// Age at `now`, never negative.
    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.timestamp).max(0)
    }
}

/// Envelope metadata without the payload, for sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EntryHeader {
    pub timestamp: i64,
    #[serde(rename = "refreshCount", default)]
    pub refresh_count: Option<u32>,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode cache entry: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode cache entry: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn encode<T: Serialize>(entry: &CacheEntry<T>) -> Result<String, CodecError> {
    serde_json::to_string(entry).map_err(CodecError::Encode)
}

pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<CacheEntry<T>, CodecError> {
    serde_json::from_str(raw).map_err(CodecError::Decode)
}

pub fn decode_header(raw: &str) -> Result<EntryHeader, CodecError> {
    serde_json::from_str(raw).map_err(CodecError::Decode)
}
