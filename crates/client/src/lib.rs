//! Versioned key-value client core.
//!
//! Provides: vector-clock version markers, values tagged with the marker
//! they were read at, an optimistic-concurrency store client that rejects
//! writes based on stale or divergent histories, and explicit conflict
//! resolution for the rejected side.

pub mod backend;
pub mod chaos;
pub mod client;
pub mod durable;
pub mod error;
pub mod memory;
pub mod resolver;
pub mod vclock;
pub mod versioned;

pub use backend::{BackendError, CasOutcome, StoreBackend, StoredEntry};
pub use client::StoreClient;
pub use durable::DurableBackend;
pub use error::{KvError, StaleWrite};
pub use memory::MemoryBackend;
pub use resolver::{ConflictResolver, FieldDecision, FieldMap, FieldMerge, FieldSource, Resolution};
pub use vclock::{Occurred, VersionMarker};
pub use versioned::Versioned;
