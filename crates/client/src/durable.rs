//! Backend over the WAL-backed [`StorageEngine`].

use crate::backend::{BackendError, CasOutcome, StoreBackend, StoredEntry};
use crate::vclock::VersionMarker;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use vkv_storage::{CasResult, FsyncPolicy, StorageEngine, StorageRecord};

#[derive(Debug, Clone)]
pub struct DurableBackend {
    storage: Arc<RwLock<StorageEngine>>,
}

impl DurableBackend {
    /// Open (or create) the engine under `data_dir`.
    pub fn open(data_dir: &Path, fsync: FsyncPolicy) -> Result<Self, BackendError> {
        let engine = StorageEngine::open(data_dir, fsync)?;
        Ok(Self::from_engine(Arc::new(RwLock::new(engine))))
    }

    pub fn from_engine(storage: Arc<RwLock<StorageEngine>>) -> Self {
        Self { storage }
    }

    /// Fsync the WAL (batch mode).
    pub async fn sync(&self) -> Result<(), BackendError> {
        self.storage.write().await.sync()?;
        Ok(())
    }
}

fn to_entry(record: StorageRecord) -> StoredEntry {
    StoredEntry {
        value: record.value,
        marker: VersionMarker::from_map(record.marker),
    }
}

#[async_trait::async_trait]
impl StoreBackend for DurableBackend {
    async fn fetch(&self, key: &str) -> Result<Option<StoredEntry>, BackendError> {
        let storage = self.storage.read().await;
        Ok(storage.get(key).map(to_entry))
    }

    async fn conditional_store(
        &self,
        key: &str,
        entry: StoredEntry,
        expected: &VersionMarker,
    ) -> Result<CasOutcome, BackendError> {
        let record = StorageRecord::new(key, entry.value, entry.marker.into_map());
        let mut storage = self.storage.write().await;
        match storage.compare_and_put(record, expected.entries())? {
            CasResult::Stored => Ok(CasOutcome::Accepted),
            CasResult::Conflict { current } => Ok(CasOutcome::Rejected {
                current: current.map(to_entry),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_durable_roundtrip_across_reopen() {
        let dir = TempDir::new().unwrap();
        let m1 = VersionMarker::new().next("c1");
        {
            let backend = DurableBackend::open(dir.path(), FsyncPolicy::Always).unwrap();
            let out = backend
                .conditional_store(
                    "k",
                    StoredEntry {
                        value: b"v1".to_vec(),
                        marker: m1.clone(),
                    },
                    &VersionMarker::new(),
                )
                .await
                .unwrap();
            assert_eq!(out, CasOutcome::Accepted);
            backend.sync().await.unwrap();
        }

        let backend = DurableBackend::open(dir.path(), FsyncPolicy::Always).unwrap();
        let entry = backend.fetch("k").await.unwrap().unwrap();
        assert_eq!(entry.value, b"v1");
        assert_eq!(entry.marker, m1);
    }

    #[tokio::test]
    async fn test_durable_rejects_stale_expectation() {
        let dir = TempDir::new().unwrap();
        let backend = DurableBackend::open(dir.path(), FsyncPolicy::None).unwrap();
        let m1 = VersionMarker::new().next("c1");
        backend
            .conditional_store(
                "k",
                StoredEntry {
                    value: b"v1".to_vec(),
                    marker: m1.clone(),
                },
                &VersionMarker::new(),
            )
            .await
            .unwrap();

        let out = backend
            .conditional_store(
                "k",
                StoredEntry {
                    value: b"v2".to_vec(),
                    marker: VersionMarker::new().next("c2"),
                },
                &VersionMarker::new(),
            )
            .await
            .unwrap();
        match out {
            CasOutcome::Rejected { current: Some(cur) } => assert_eq!(cur.marker, m1),
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
