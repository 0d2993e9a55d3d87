//! The backing-store boundary consumed by [`Session`](crate::session::Session).
//!
//! Store adapters report their own errors through `anyhow`; the session wraps
//! them into [`Error::StoreFailure`](crate::Error::StoreFailure) without
//! altering them.
//!
//! Two adapters ship with the crate:
//!
//! - [`MemoryStore`]: ordered in-memory collections, handy for tests and
//!   scratch work.
//! - [`SqliteStore`]: features persisted as JSON rows in SQLite.

mod memory;
mod sqlite;

use std::sync::Arc;

use anyhow::Result;

use crate::models::{Feature, FeatureId, FeatureType, Predicate, Value};
use crate::reader::BoxedReader;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A record-oriented data provider.
///
/// Predicates passed to `read` and `count` are advisory: an adapter may use
/// them to reduce the data it returns or ignore them. Mutations apply
/// immediately and are not staged.
pub trait Store: Send + Sync {
    /// Names of all registered feature types.
    fn type_names(&self) -> Result<Vec<String>>;

    /// Schema of `type_name`, or `None` if the type is not registered.
    fn schema(&self, type_name: &str) -> Result<Option<Arc<FeatureType>>>;

    fn read(&self, type_name: &str, predicate: Option<&Predicate>) -> Result<BoxedReader>;

    fn count(&self, type_name: &str, predicate: Option<&Predicate>) -> Result<usize>;

    /// Insert `feature`, returning the identity the store assigned to it.
    fn add(&self, type_name: &str, feature: &Feature) -> Result<FeatureId>;

    /// Delete every feature matching `predicate`; returns how many.
    fn remove_matching(&self, type_name: &str, predicate: &Predicate) -> Result<usize>;

    /// Overwrite the named attributes of every feature matching `predicate`;
    /// returns how many features changed.
    fn update_matching(
        &self,
        type_name: &str,
        predicate: &Predicate,
        values: &[(String, Value)],
    ) -> Result<usize>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn type_names(&self) -> Result<Vec<String>> {
        (**self).type_names()
    }

    fn schema(&self, type_name: &str) -> Result<Option<Arc<FeatureType>>> {
        (**self).schema(type_name)
    }

    fn read(&self, type_name: &str, predicate: Option<&Predicate>) -> Result<BoxedReader> {
        (**self).read(type_name, predicate)
    }

    fn count(&self, type_name: &str, predicate: Option<&Predicate>) -> Result<usize> {
        (**self).count(type_name, predicate)
    }

    fn add(&self, type_name: &str, feature: &Feature) -> Result<FeatureId> {
        (**self).add(type_name, feature)
    }

    fn remove_matching(&self, type_name: &str, predicate: &Predicate) -> Result<usize> {
        (**self).remove_matching(type_name, predicate)
    }

    fn update_matching(
        &self,
        type_name: &str,
        predicate: &Predicate,
        values: &[(String, Value)],
    ) -> Result<usize> {
        (**self).update_matching(type_name, predicate, values)
    }
}

/// Check that `feature` was built against a schema structurally equal to the
/// store's schema for its type.
pub(crate) fn ensure_conforms(schema: &FeatureType, feature: &Feature) -> Result<()> {
    if feature.feature_type().attributes() != schema.attributes() {
        anyhow::bail!(
            "Feature {} does not conform to the {} schema",
            feature.id(),
            schema.name()
        );
    }
    Ok(())
}
