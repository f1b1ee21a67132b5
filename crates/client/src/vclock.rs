//! Vector-clock version markers.
//!
//! A [`VersionMarker`] records, per writer, how many committed writes of a
//! key's history that writer is responsible for. Markers form a partial
//! order; [`VersionMarker::compare`] reports it without ever breaking ties.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use vkv_storage::Marker;

/// Causal version of one key: writer id -> monotonic counter.
///
/// Absent writers count as 0. Zero entries are never stored, so two markers
/// describing the same history are always `==`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Marker", into = "Marker")]
pub struct VersionMarker {
    entries: BTreeMap<String, u64>,
}

/// Outcome of comparing marker `a` against marker `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Occurred {
    /// `a` is a strict causal ancestor of `b`.
    Before,
    /// `b` is a strict causal ancestor of `a`.
    After,
    Equal,
    /// Neither descends from the other.
    Concurrent,
}

impl Occurred {
    /// The ordering seen from the other side: `compare(b, a)`.
    pub fn reverse(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
            other => other,
        }
    }
}

impl VersionMarker {
    /// The empty marker: the version of a key that has never been written.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a raw map, dropping zero counters.
    pub fn from_map(entries: Marker) -> Self {
        Self {
            entries: entries.into_iter().filter(|(_, c)| *c > 0).collect(),
        }
    }

    /// Counter for `writer` (0 if absent).
    pub fn get(&self, writer: &str) -> u64 {
        self.entries.get(writer).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A copy of this marker with `writer`'s counter bumped by one.
    pub fn next(&self, writer: &str) -> Self {
        let mut next = self.clone();
        *next.entries.entry(writer.to_string()).or_insert(0) += 1;
        next
    }

    /// Pointwise maximum. The result is `Equal` to or `After` both inputs.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.entries.clone();
        for (writer, &count) in &other.entries {
            let entry = merged.entry(writer.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
        Self { entries: merged }
    }

    /// Where `self` stands relative to `other` in the causal partial order.
    pub fn compare(&self, other: &Self) -> Occurred {
        let mut self_le = true;
        let mut other_le = true;

        for (writer, &mine) in &self.entries {
            let theirs = other.get(writer);
            if mine > theirs {
                self_le = false;
            }
            if mine < theirs {
                other_le = false;
            }
        }
        if other
            .entries
            .iter()
            .any(|(writer, &theirs)| theirs > 0 && !self.entries.contains_key(writer))
        {
            other_le = false;
        }

        match (self_le, other_le) {
            (true, true) => Occurred::Equal,
            (true, false) => Occurred::Before,
            (false, true) => Occurred::After,
            (false, false) => Occurred::Concurrent,
        }
    }

    /// `self` strictly descends from `other`.
    pub fn dominates(&self, other: &Self) -> bool {
        self.compare(other) == Occurred::After
    }

    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == Occurred::Concurrent
    }

    pub fn entries(&self) -> &BTreeMap<String, u64> {
        &self.entries
    }

    /// Convert to the raw map persisted by the storage layer.
    pub fn into_map(self) -> Marker {
        self.entries
    }
}

impl From<Marker> for VersionMarker {
    fn from(entries: Marker) -> Self {
        Self::from_map(entries)
    }
}

impl From<VersionMarker> for Marker {
    fn from(marker: VersionMarker) -> Self {
        marker.entries
    }
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (writer, count)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", writer, count)?;
        }
        write!(f, "}}")
    }
}
