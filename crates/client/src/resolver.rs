//! Conflict resolution for divergent versions of one key.
//!
//! Resolution is always explicit: the client hands back both sides of a
//! rejected put and the caller chooses a [`ConflictResolver`]. The merged
//! value is anchored on the pointwise maximum of both markers, so it can be
//! put again as a descendant of everything either side has seen.
//!
//! [`FieldMerge`] is the stock policy for values that are maps of named
//! fields. It never picks a winner for a field both sides changed.

use crate::error::{KvError, StaleWrite};
use crate::versioned::Versioned;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use vkv_metrics::metrics;

/// A value made of named fields.
pub type FieldMap<V> = BTreeMap<String, V>;

/// Which side a merged field was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    Local,
    Remote,
}

/// Record of one field whose merged state came from a single side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecision {
    pub field: String,
    pub source: FieldSource,
    /// The chosen side had removed the field.
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Merged {
        versioned: Versioned<T>,
        decisions: Vec<FieldDecision>,
    },
    /// Needs a domain-specific decision. `conflicting` names what clashed.
    Unresolved {
        local: Versioned<T>,
        remote: Versioned<T>,
        conflicting: Vec<String>,
    },
}

impl<T> Resolution<T> {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

pub trait ConflictResolver<T> {
    fn resolve(&self, local: Versioned<T>, remote: Versioned<T>) -> Resolution<T>;

    /// Resolve straight from a rejected put.
    fn resolve_stale(&self, stale: &StaleWrite) -> Result<Resolution<T>, KvError>
    where
        T: DeserializeOwned,
    {
        Ok(self.resolve(stale.local()?, stale.remote()?))
    }
}

/// Field-level merge.
///
/// With the common ancestor (the value both sides were read from) a side
/// "changed" a field if it differs from the ancestor, removals included, and
/// only fields changed differently by both sides conflict.
///
/// Without an ancestor there is no way to tell a removal from an addition
/// or a one-sided edit from a clash, so every field on which the two sides
/// differ is reported as conflicting. Only identical maps merge.
#[derive(Debug, Clone)]
pub struct FieldMerge<V> {
    ancestor: Option<FieldMap<V>>,
}

impl<V> Default for FieldMerge<V> {
    fn default() -> Self {
        Self { ancestor: None }
    }
}

impl<V> FieldMerge<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ancestor(ancestor: FieldMap<V>) -> Self {
        Self {
            ancestor: Some(ancestor),
        }
    }
}

impl<V: Clone + PartialEq> FieldMerge<V> {
    fn changed(&self, field: &str, side: Option<&V>) -> bool {
        match &self.ancestor {
            Some(ancestor) => ancestor.get(field) != side,
            None => true,
        }
    }
}

impl<V: Clone + PartialEq> ConflictResolver<FieldMap<V>> for FieldMerge<V> {
    fn resolve(
        &self,
        local: Versioned<FieldMap<V>>,
        remote: Versioned<FieldMap<V>>,
    ) -> Resolution<FieldMap<V>> {
        let fields: BTreeSet<&String> = local
            .value()
            .keys()
            .chain(remote.value().keys())
            .chain(self.ancestor.iter().flat_map(|a| a.keys()))
            .collect();

        let mut merged = FieldMap::new();
        let mut decisions = Vec::new();
        let mut conflicting = Vec::new();

        for field in fields {
            let l = local.value().get(field);
            let r = remote.value().get(field);
            if l == r {
                if let Some(v) = l {
                    merged.insert(field.clone(), v.clone());
                }
                continue;
            }
            let (chosen, source) = match (self.changed(field, l), self.changed(field, r)) {
                (true, false) => (l, FieldSource::Local),
                (false, true) => (r, FieldSource::Remote),
                _ => {
                    conflicting.push(field.clone());
                    continue;
                }
            };
            if let Some(v) = chosen {
                merged.insert(field.clone(), v.clone());
            }
            decisions.push(FieldDecision {
                field: field.clone(),
                source,
                removed: chosen.is_none(),
            });
        }

        if !conflicting.is_empty() {
            metrics().unresolved.inc();
            tracing::warn!(
                "field merge unresolved: {:?} changed on both sides ({} vs {})",
                conflicting,
                local.marker(),
                remote.marker()
            );
            return Resolution::Unresolved {
                local,
                remote,
                conflicting,
            };
        }

        let marker = local.marker().merge(remote.marker());
        metrics().merges.inc();
        tracing::info!(
            "field merge: {} decision(s), anchored on {}",
            decisions.len(),
            marker
        );
        for d in &decisions {
            tracing::debug!("  {} from {:?} (removed: {})", d.field, d.source, d.removed);
        }
        Resolution::Merged {
            versioned: Versioned::wrap(merged, marker),
            decisions,
        }
    }
}
