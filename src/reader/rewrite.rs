use std::sync::Arc;

use super::FeatureReader;
use crate::error::{Error, Result};
use crate::models::{Feature, FeatureType, Predicate, Value};

/// Overwrites named attributes on the features of `inner` that match a
/// predicate. Matching features are replaced by new values; the feature
/// produced by `inner` is never touched. Non-matching features pass through.
pub struct RewriteReader<R> {
    inner: R,
    predicate: Predicate,
    values: Vec<(String, Value)>,
    closed: bool,
}

impl<R: FeatureReader> RewriteReader<R> {
    pub fn new(inner: R, predicate: Predicate, values: Vec<(String, Value)>) -> Self {
        Self {
            inner,
            predicate,
            values,
            closed: false,
        }
    }
}

impl<R: FeatureReader> FeatureReader for RewriteReader<R> {
    fn feature_type(&self) -> &Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<Feature> {
        if self.closed {
            return Err(Error::EndOfSequence);
        }
        let feature = self.inner.next()?;
        if self.predicate.evaluate(&feature)? {
            feature.with_values(&self.values)
        } else {
            Ok(feature)
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}
