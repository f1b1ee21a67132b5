//! Storage record format.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw version marker as persisted: writer id -> counter.
pub type Marker = BTreeMap<String, u64>;

/// The committed state of one key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageRecord {
    pub key: String,
    /// Marker issued when this value was committed.
    pub marker: Marker,
    /// Encoded value bytes. The engine never interprets them.
    pub value: Vec<u8>,
    /// Wall-clock commit time (millis since epoch).
    pub timestamp_ms: u64,
}

impl StorageRecord {
    pub fn new(key: impl Into<String>, value: Vec<u8>, marker: Marker) -> Self {
        Self {
            key: key.into(),
            marker,
            value,
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}
