//! In-memory table of committed records.
//!
//! Unlike a sibling-keeping store, every key maps to a single record: a
//! write either replaces the current version or is refused upstream.

use crate::record::StorageRecord;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Memtable {
    data: HashMap<String, StorageRecord>,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&StorageRecord> {
        self.data.get(key)
    }

    /// Install `record` as the current version of its key, returning the
    /// version it replaced.
    pub fn insert(&mut self, record: StorageRecord) -> Option<StorageRecord> {
        self.data.insert(record.key.clone(), record)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }
}
