//! The store collaborator the client runs against.
//!
//! The client only needs two capabilities: a fresh read of a key's committed
//! state, and an atomic compare-and-set keyed on the marker the caller
//! expects to replace. Implementations: [`crate::memory::MemoryBackend`],
//! [`crate::durable::DurableBackend`], and the [`crate::chaos::ChaosBackend`]
//! wrapper.

use crate::vclock::VersionMarker;
use vkv_storage::StorageError;

/// Committed value bytes and the marker they were committed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub value: Vec<u8>,
    pub marker: VersionMarker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Accepted,
    /// The expectation did not hold. `current` is what the store holds
    /// right now (`None` if the key is absent).
    Rejected { current: Option<StoredEntry> },
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("timeout")]
    Timeout,
}

/// Capability interface over the external store.
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Current committed state of `key`, or `None` if it was never written.
    async fn fetch(&self, key: &str) -> Result<Option<StoredEntry>, BackendError>;

    /// Install `entry` as the new state of `key` only if the key's current
    /// marker equals `expected` (an empty `expected` means "key absent").
    /// Check and write happen atomically.
    async fn conditional_store(
        &self,
        key: &str,
        entry: StoredEntry,
        expected: &VersionMarker,
    ) -> Result<CasOutcome, BackendError>;
}
