//! Record model shared by readers, the session and stores.
//!
//! # Core Concepts
//!
//! - [`FeatureType`]: Ordered attribute descriptors, optionally with a default
//!   geometry whose [`Crs`] is declared on its descriptor.
//! - [`Feature`]: A value-like record with a stable [`FeatureId`]. Rewrites
//!   produce new features; nothing mutates a feature in place.
//! - [`Predicate`]: A pure boolean test over a feature.
//! - [`SortSpec`] and [`Query`]: Ordering and paging requests.

mod feature;
mod feature_type;
mod geometry;
mod predicate;
mod query;
mod value;

pub use feature::*;
pub use feature_type::*;
pub use geometry::*;
pub use predicate::*;
pub use query::*;
pub use value::*;
