//! A value paired with the marker of the history it was read from.

use crate::vclock::VersionMarker;
use serde::{Deserialize, Serialize};

/// One value and the version marker it is based on.
///
/// Editing the value never touches the marker: only the store issues new
/// markers, on a successful put. Two `Versioned` values are never combined
/// implicitly; see [`crate::resolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    value: T,
    marker: VersionMarker,
}

impl<T> Versioned<T> {
    pub fn wrap(value: T, marker: VersionMarker) -> Self {
        Self { value, marker }
    }

    /// A value with no history yet (the create path).
    pub fn new(value: T) -> Self {
        Self::wrap(value, VersionMarker::new())
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// In-place local mutation; the marker is unchanged.
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn marker(&self) -> &VersionMarker {
        &self.marker
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn into_parts(self) -> (T, VersionMarker) {
        (self.value, self.marker)
    }

    /// Replace the value, keeping the marker.
    pub fn with_value<U>(self, value: U) -> Versioned<U> {
        Versioned::wrap(value, self.marker)
    }

    /// Transform the value, keeping the marker.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned::wrap(f(self.value), self.marker)
    }
}
