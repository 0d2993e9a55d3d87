use std::sync::Arc;

use super::FeatureReader;
use crate::error::{Error, Result};
use crate::models::{compare_features, Feature, FeatureType, SortSpec};

/// Yields the features of `inner` in [`SortSpec`] order.
///
/// The one buffering transformer: the first `has_next`/`next` drains `inner`
/// completely, closes it, and sorts the buffer. Memory is proportional to the
/// number of features drained. A failed drain is not retried: later calls
/// fail with [`Error::ReaderFailed`].
pub struct SortByReader<R> {
    feature_type: Arc<FeatureType>,
    inner: Option<R>,
    sort: SortSpec,
    buffer: std::vec::IntoIter<Feature>,
    failed: Option<String>,
    closed: bool,
}

impl<R: FeatureReader> SortByReader<R> {
    pub fn new(inner: R, sort: SortSpec) -> Self {
        Self {
            feature_type: inner.feature_type().clone(),
            inner: Some(inner),
            sort,
            buffer: Vec::new().into_iter(),
            failed: None,
            closed: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        let keys = match self.sort.resolve(&self.feature_type) {
            Ok(keys) => keys,
            Err(e) => return Err(super::close_after_error(&mut inner, e)),
        };
        let mut features = super::read_all(&mut inner)?;
        features.sort_by(|a, b| compare_features(a, b, &keys));
        tracing::trace!(
            "Sorted {} {} features",
            features.len(),
            self.feature_type.name()
        );
        self.buffer = features.into_iter();
        Ok(())
    }
}

impl<R: FeatureReader> FeatureReader for SortByReader<R> {
    fn feature_type(&self) -> &Arc<FeatureType> {
        &self.feature_type
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        if let Some(reason) = &self.failed {
            return Err(Error::ReaderFailed(reason.clone()));
        }
        if let Err(e) = self.fill() {
            self.failed = Some(e.to_string());
            return Err(e);
        }
        Ok(!self.buffer.as_slice().is_empty())
    }

    fn next(&mut self) -> Result<Feature> {
        if !self.has_next()? {
            return Err(Error::EndOfSequence);
        }
        self.buffer.next().ok_or(Error::EndOfSequence)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer = Vec::new().into_iter();
        match self.inner.take() {
            Some(mut inner) => inner.close(),
            None => Ok(()),
        }
    }
}
