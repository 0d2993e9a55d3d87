use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Feature, FeatureId, Predicate, Value};

/// A staged change to one feature type.
///
/// - `Add`: a complete feature under a placeholder identity
/// - `Remove`: drop every live feature matching the predicate
/// - `Modify`: overwrite the named attributes of every live feature matching
///   the predicate
///
/// Predicates are evaluated against the reconciled state at the delta's
/// position in the log, not against the raw store.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Add(Feature),
    Remove(Predicate),
    Modify {
        predicate: Predicate,
        values: Vec<(String, Value)>,
    },
}

impl Delta {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Remove(_) => "remove",
            Self::Modify { .. } => "modify",
        }
    }

    /// Rewrite identity tests through `mapping` (placeholder to store id).
    pub(crate) fn remap_ids(&self, mapping: &HashMap<FeatureId, FeatureId>) -> Delta {
        if mapping.is_empty() {
            return self.clone();
        }
        match self {
            Self::Add(f) => Self::Add(f.clone()),
            Self::Remove(p) => Self::Remove(p.remap_ids(mapping)),
            Self::Modify { predicate, values } => Self::Modify {
                predicate: predicate.remap_ids(mapping),
                values: values.clone(),
            },
        }
    }
}

/// Immutable view of a delta log taken when a read is constructed.
pub type DeltaSnapshot = Arc<Vec<Delta>>;

/// Append-only, per-type list of deltas in call order.
///
/// Snapshots share storage with the log; appending after a snapshot was
/// taken copies the list first, so snapshots never observe later changes.
#[derive(Debug, Clone, Default)]
pub struct DeltaLog {
    deltas: DeltaSnapshot,
}

impl DeltaLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: Delta) {
        Arc::make_mut(&mut self.deltas).push(delta);
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn as_slice(&self) -> &[Delta] {
        &self.deltas
    }

    pub fn snapshot(&self) -> DeltaSnapshot {
        self.deltas.clone()
    }

    /// Whether any `Modify` is pending. A modify can make a store feature
    /// match a predicate it did not match before.
    pub fn has_modify(&self) -> bool {
        self.deltas.iter().any(|d| matches!(d, Delta::Modify { .. }))
    }

    pub(crate) fn replace(&mut self, deltas: Vec<Delta>) {
        self.deltas = Arc::new(deltas);
    }
}
