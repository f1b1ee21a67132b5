//! Optimistic-concurrency client over a [`StoreBackend`].
//!
//! A put is accepted only when the caller's marker is exactly the marker the
//! store currently holds for the key: the caller saw the latest committed
//! write and nobody committed since. Anything else is rejected with enough
//! context to explain or resolve the conflict. The client never caches
//! markers and never retries.
//!
//! Retrying is the caller's job. The usual loop is:
//!
//! ```no_run
//! # use vkv_client::{KvError, StoreClient, MemoryBackend, FieldMerge, ConflictResolver, Resolution};
//! # use std::collections::BTreeMap;
//! # async fn demo(client: StoreClient<MemoryBackend>) -> Result<(), KvError> {
//! type Book = BTreeMap<String, String>;
//! let snapshot: vkv_client::Versioned<Book> = client.get("potter1").await?;
//! let mut book = snapshot.clone();
//! book.value_mut().insert("author".into(), "J.K. Rowling".into());
//! match client.put("potter1", &book, "c2").await {
//!     Ok(_marker) => {}
//!     Err(KvError::StaleWrite(stale)) => {
//!         let resolver = FieldMerge::with_ancestor(snapshot.into_value());
//!         match resolver.resolve_stale(&stale)? {
//!             Resolution::Merged { versioned, .. } => {
//!                 client.put("potter1", &versioned, "c2").await?;
//!             }
//!             Resolution::Unresolved { .. } => { /* domain-specific decision */ }
//!         }
//!     }
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

use crate::backend::{BackendError, CasOutcome, StoreBackend, StoredEntry};
use crate::error::{KvError, StaleWrite};
use crate::vclock::{Occurred, VersionMarker};
use crate::versioned::Versioned;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use vkv_metrics::{metrics, start_op_timer};

/// Store client. Cheap to clone; clones share the backend.
pub struct StoreClient<B: StoreBackend> {
    backend: Arc<B>,
}

impl<B: StoreBackend> Clone for StoreClient<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B: StoreBackend> std::fmt::Debug for StoreClient<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient").finish_non_exhaustive()
    }
}

impl<B: StoreBackend> StoreClient<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    // -----------------------------------------------------------------------
    // GET
    // -----------------------------------------------------------------------

    /// Read the committed value and marker of `key`.
    ///
    /// Fails with [`KvError::KeyNotFound`] if the key was never written.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Versioned<T>, KvError> {
        let _timer = start_op_timer("get");
        metrics().gets.inc();

        let entry = self.fetch(key).await?.ok_or_else(|| {
            metrics().gets_not_found.inc();
            tracing::debug!("get {}: not found", key);
            KvError::KeyNotFound(key.to_string())
        })?;
        let value = serde_json::from_slice(&entry.value)?;
        tracing::debug!("get {}: marker {}", key, entry.marker);
        Ok(Versioned::wrap(value, entry.marker))
    }

    /// Like [`get`](Self::get), but an absent key reads as `T::default()`
    /// with the empty marker, ready to be put as a create.
    pub async fn get_or_default<T: DeserializeOwned + Default>(
        &self,
        key: &str,
    ) -> Result<Versioned<T>, KvError> {
        match self.get(key).await {
            Err(KvError::KeyNotFound(_)) => Ok(Versioned::new(T::default())),
            other => other,
        }
    }

    // -----------------------------------------------------------------------
    // PUT
    // -----------------------------------------------------------------------

    /// Write `versioned` on behalf of `writer`.
    ///
    /// Returns the newly issued marker, `next(current, writer)`. The caller's
    /// marker must equal the store's current one (empty for a key that does
    /// not exist yet):
    /// - strict ancestor or concurrent: [`KvError::StaleWrite`]
    /// - descendant: [`KvError::InvalidMarker`]
    ///
    /// Backend failures are returned unchanged; after one the write may or
    /// may not have committed.
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        versioned: &Versioned<T>,
        writer: &str,
    ) -> Result<VersionMarker, KvError> {
        let _timer = start_op_timer("put");
        let local_value = serde_json::to_vec(versioned.value())?;
        let local_marker = versioned.marker();

        let current = self.fetch(key).await?;
        let current_marker = current
            .as_ref()
            .map(|e| e.marker.clone())
            .unwrap_or_default();

        match (local_marker.compare(&current_marker), current) {
            (Occurred::Equal, _) => {}
            (ordering @ (Occurred::Before | Occurred::Concurrent), Some(current)) => {
                return Err(self.stale(key, ordering, local_marker, local_value, current));
            }
            (_, _) => return Err(self.invalid(key, local_marker, current_marker)),
        }

        let new_marker = current_marker.next(writer);
        let entry = StoredEntry {
            value: local_value.clone(),
            marker: new_marker.clone(),
        };
        let outcome = self
            .backend
            .conditional_store(key, entry, &current_marker)
            .await
            .map_err(|e| self.backend_failure(key, "conditional_store", e))?;

        match outcome {
            CasOutcome::Accepted => {
                metrics().puts_accepted.inc();
                tracing::info!(
                    "put {} by {}: {} -> {}",
                    key,
                    writer,
                    current_marker,
                    new_marker
                );
                Ok(new_marker)
            }
            // Someone committed between our fetch and the store.
            CasOutcome::Rejected {
                current: Some(current),
            } => {
                let ordering = local_marker.compare(&current.marker);
                Err(self.stale(key, ordering, local_marker, local_value, current))
            }
            CasOutcome::Rejected { current: None } => {
                Err(self.invalid(key, local_marker, VersionMarker::new()))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Always a fresh read: markers are never cached across calls.
    async fn fetch(&self, key: &str) -> Result<Option<StoredEntry>, KvError> {
        self.backend
            .fetch(key)
            .await
            .map_err(|e| self.backend_failure(key, "fetch", e))
    }

    fn stale(
        &self,
        key: &str,
        ordering: Occurred,
        local_marker: &VersionMarker,
        local_value: Vec<u8>,
        current: StoredEntry,
    ) -> KvError {
        metrics().puts_stale.inc();
        tracing::warn!(
            "put {} rejected: caller marker {} is {:?} store marker {}",
            key,
            local_marker,
            ordering,
            current.marker
        );
        KvError::StaleWrite(Box::new(StaleWrite {
            key: key.to_string(),
            ordering,
            local_marker: local_marker.clone(),
            local_value,
            current_marker: current.marker,
            current_value: current.value,
        }))
    }

    fn invalid(&self, key: &str, submitted: &VersionMarker, current: VersionMarker) -> KvError {
        metrics().puts_invalid.inc();
        tracing::warn!(
            "put {} rejected: marker {} is ahead of store marker {}",
            key,
            submitted,
            current
        );
        KvError::InvalidMarker {
            key: key.to_string(),
            submitted: submitted.clone(),
            current,
        }
    }

    fn backend_failure(&self, key: &str, op: &str, err: BackendError) -> KvError {
        metrics().backend_errors.inc();
        tracing::warn!("{} {} failed: {}", op, key, err);
        KvError::Backend(err)
    }
}
