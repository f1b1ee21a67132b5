//! Storage engine: WAL + memtable behind a compare-and-set write path.
//!
//! Every accepted write is appended to the WAL before it becomes visible in
//! the memtable, so a reader never observes a version that would be lost on
//! restart.

use crate::memtable::Memtable;
use crate::record::{Marker, StorageRecord};
use crate::wal::{FsyncPolicy, Wal, WalError};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of [`StorageEngine::compare_and_put`].
#[derive(Debug, Clone, PartialEq)]
pub enum CasResult {
    Stored,
    /// The key's current marker was not the expected one. Carries the
    /// record that is actually committed (`None` if the key is absent).
    Conflict { current: Option<StorageRecord> },
}

/// The storage engine. All operations are synchronous; callers wrap it in a
/// lock to share it across tasks.
#[derive(Debug)]
pub struct StorageEngine {
    memtable: Memtable,
    wal: Wal,
}

impl StorageEngine {
    /// Open or create a storage engine at the given directory.
    pub fn open(data_dir: &Path, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let wal_path = data_dir.join("wal.log");

        let replay = Wal::replay(&wal_path)?;
        let mut memtable = Memtable::new();
        for record in replay.records {
            memtable.insert(record);
        }
        let wal = Wal::open(&wal_path, replay.valid_len, fsync)?;

        tracing::info!(
            "storage engine opened: {} keys recovered from WAL at {:?}",
            memtable.len(),
            wal_path
        );

        Ok(Self { memtable, wal })
    }

    /// Current committed record for `key`.
    pub fn get(&self, key: &str) -> Option<StorageRecord> {
        self.memtable.get(key).cloned()
    }

    /// Commit `record` only if the key's current marker equals `expected`.
    /// An empty `expected` means the key must not exist yet.
    pub fn compare_and_put(
        &mut self,
        record: StorageRecord,
        expected: &Marker,
    ) -> Result<CasResult, StorageError> {
        let current = self.memtable.get(&record.key);
        let matches = match current {
            Some(existing) => &existing.marker == expected,
            None => expected.is_empty(),
        };
        if !matches {
            return Ok(CasResult::Conflict {
                current: current.cloned(),
            });
        }

        self.wal.append(&record)?;
        self.memtable.insert(record);
        Ok(CasResult::Stored)
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.memtable.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.memtable.keys()
    }

    /// Sync the WAL to disk (for batch fsync mode).
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.wal.sync()?;
        Ok(())
    }
}
