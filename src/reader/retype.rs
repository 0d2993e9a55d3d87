use std::sync::Arc;

use super::FeatureReader;
use crate::error::{Error, Result};
use crate::models::{Feature, FeatureType};

/// Projects the features of `inner` onto a target type that selects, reorders
/// or renames source attributes. Values are copied, never recomputed.
pub struct RetypeReader<R> {
    inner: R,
    target: Arc<FeatureType>,
    sources: Vec<usize>,
    closed: bool,
}

impl<R: FeatureReader> RetypeReader<R> {
    /// Match target attributes to source attributes by name.
    pub fn new(inner: R, target: Arc<FeatureType>) -> Result<Self> {
        let names: Vec<(String, String)> = target
            .attribute_names()
            .map(|n| (n.to_string(), n.to_string()))
            .collect();
        Self::renaming(inner, target, &names)
    }

    /// Match target attributes to source attributes through
    /// `(target_name, source_name)` pairs. Target attributes missing from
    /// `mapping` are matched by name.
    pub fn renaming(mut inner: R, target: Arc<FeatureType>, mapping: &[(String, String)]) -> Result<Self> {
        let mut sources = Vec::with_capacity(target.len());
        for attribute in target.attributes() {
            let source_name = mapping
                .iter()
                .find(|(t, _)| *t == attribute.name)
                .map(|(_, s)| s.as_str())
                .unwrap_or(attribute.name.as_str());
            match inner.feature_type().require(source_name) {
                Ok(idx) => sources.push(idx),
                Err(e) => return Err(super::close_after_error(&mut inner, e)),
            }
        }
        Ok(Self {
            inner,
            target,
            sources,
            closed: false,
        })
    }
}

impl<R: FeatureReader> FeatureReader for RetypeReader<R> {
    fn feature_type(&self) -> &Arc<FeatureType> {
        &self.target
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
        let source = self.inner.next()?;
        let values = self
            .sources
            .iter()
            .map(|&i| source.values()[i].clone())
            .collect();
        Ok(Feature::from_parts(source.id().clone(), self.target.clone(), values))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}
