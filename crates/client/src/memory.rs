//! In-memory backend: a single lock-guarded map of key histories.

use crate::backend::{BackendError, CasOutcome, StoreBackend, StoredEntry};
use crate::vclock::VersionMarker;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a committed value.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StoreBackend for MemoryBackend {
    async fn fetch(&self, key: &str) -> Result<Option<StoredEntry>, BackendError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn conditional_store(
        &self,
        key: &str,
        entry: StoredEntry,
        expected: &VersionMarker,
    ) -> Result<CasOutcome, BackendError> {
        let mut entries = self.entries.write().await;
        let current = entries.get(key);
        let matches = match current {
            Some(existing) => &existing.marker == expected,
            None => expected.is_empty(),
        };
        if !matches {
            return Ok(CasOutcome::Rejected {
                current: current.cloned(),
            });
        }
        entries.insert(key.to_string(), entry);
        Ok(CasOutcome::Accepted)
    }
}
