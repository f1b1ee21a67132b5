//! Client error taxonomy.

use crate::backend::BackendError;
use crate::vclock::{Occurred, VersionMarker};
use crate::versioned::Versioned;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The key has no history. Callers treat this as the create path.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The put was based on a view the store has moved past.
    #[error(transparent)]
    StaleWrite(Box<StaleWrite>),

    /// The submitted marker is ahead of anything the store issued for this
    /// key. Indicates a marker taken from another key or forged by hand.
    #[error("invalid marker for key {key}: submitted {submitted} is not an ancestor of current {current}")]
    InvalidMarker {
        key: String,
        submitted: VersionMarker,
        current: VersionMarker,
    },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl KvError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }

    pub fn as_stale(&self) -> Option<&StaleWrite> {
        match self {
            Self::StaleWrite(stale) => Some(stale),
            _ => None,
        }
    }

    pub fn into_stale(self) -> Option<StaleWrite> {
        match self {
            Self::StaleWrite(stale) => Some(*stale),
            _ => None,
        }
    }
}

/// Both sides of a rejected put.
///
/// `local_*` is what the caller tried to write and the marker it was based
/// on; `current_*` is what the store holds. The encoded values are kept so
/// the rejection can be explained or resolved without another read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stale write to {key}: caller holds {local_marker}, store holds {current_marker} ({ordering:?})")]
pub struct StaleWrite {
    pub key: String,
    /// Caller's marker compared against the current one.
    pub ordering: Occurred,
    pub local_marker: VersionMarker,
    pub local_value: Vec<u8>,
    pub current_marker: VersionMarker,
    pub current_value: Vec<u8>,
}

impl StaleWrite {
    /// The caller's rejected write.
    pub fn local<T: DeserializeOwned>(&self) -> Result<Versioned<T>, serde_json::Error> {
        let value = serde_json::from_slice(&self.local_value)?;
        Ok(Versioned::wrap(value, self.local_marker.clone()))
    }

    /// The version the store currently holds.
    pub fn remote<T: DeserializeOwned>(&self) -> Result<Versioned<T>, serde_json::Error> {
        let value = serde_json::from_slice(&self.current_value)?;
        Ok(Versioned::wrap(value, self.current_marker.clone()))
    }
}
