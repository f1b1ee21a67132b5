//! Storage engine for vkv: WAL + in-memory table.
//!
//! Each key holds exactly one committed record `{key, marker, value,
//! timestamp}`. Writes are conditional on the marker the caller expects to
//! replace, which gives clients an atomic compare-and-set primitive.

pub mod engine;
pub mod memtable;
pub mod record;
pub mod wal;

pub use engine::{CasResult, StorageEngine, StorageError};
pub use record::{Marker, StorageRecord};
pub use wal::FsyncPolicy;
