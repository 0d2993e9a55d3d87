use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::feature::Feature;
use super::feature_type::FeatureType;
use super::geometry::Crs;
use super::predicate::Predicate;
use super::value::compare_values;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub attribute: String,
    pub order: SortOrder,
}

/// Ordered list of sort keys. Ties after the last key are broken by feature
/// identity so the order is total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by(attribute: impl Into<String>, order: SortOrder) -> Self {
        Self::new().then(attribute, order)
    }

    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self::by(attribute, SortOrder::Ascending)
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self::by(attribute, SortOrder::Descending)
    }

    pub fn then(mut self, attribute: impl Into<String>, order: SortOrder) -> Self {
        self.keys.push(SortKey {
            attribute: attribute.into(),
            order,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolve key names against `feature_type` into attribute positions.
    pub(crate) fn resolve(&self, feature_type: &FeatureType) -> Result<Vec<(usize, SortOrder)>> {
        self.keys
            .iter()
            .map(|k| Ok((feature_type.require(&k.attribute)?, k.order)))
            .collect()
    }
}

/// Compare two features on resolved sort keys, then identity.
pub fn compare_features(a: &Feature, b: &Feature, keys: &[(usize, SortOrder)]) -> Ordering {
    for (idx, order) in keys {
        let cmp = compare_values(&a.values()[*idx], &b.values()[*idx]);
        let cmp = match order {
            SortOrder::Ascending => cmp,
            SortOrder::Descending => cmp.reverse(),
        };
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    a.id().cmp(b.id())
}

/// A read request against one feature type.
///
/// Built with chained setters:
///
/// ```ignore
/// let q = Query::new("roads")
///     .filter(Predicate::eq("kind", "highway"))
///     .sort(SortSpec::ascending("name"))
///     .offset(10)
///     .limit(5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub type_name: String,
    pub predicate: Predicate,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub target_crs: Option<Crs>,
    pub target_type: Option<Arc<FeatureType>>,
}

impl Query {
    /// Everything of `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            predicate: Predicate::Include,
            sort: None,
            limit: None,
            offset: None,
            target_crs: None,
            target_type: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn reproject(mut self, crs: Crs) -> Self {
        self.target_crs = Some(crs);
        self
    }

    pub fn retype(mut self, target: Arc<FeatureType>) -> Self {
        self.target_type = Some(target);
        self
    }
}
