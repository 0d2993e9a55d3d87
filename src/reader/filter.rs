use std::sync::Arc;

use super::FeatureReader;
use crate::error::{Error, Result};
use crate::models::{Feature, FeatureType, Predicate};

/// Yields only the features of `inner` matching a predicate.
///
/// Non-matching features are pulled and discarded one at a time until a match
/// is found; the match is held until `next` hands it out. Once evaluation or
/// the inner reader fails, every later call fails with [`Error::ReaderFailed`].
pub struct FilterReader<R> {
    inner: R,
    predicate: Predicate,
    pending: Option<Feature>,
    failed: Option<String>,
    closed: bool,
}

impl<R: FeatureReader> FilterReader<R> {
    pub fn new(inner: R, predicate: Predicate) -> Self {
        Self {
            inner,
            predicate,
            pending: None,
            failed: None,
            closed: false,
        }
    }

    fn advance(&mut self) -> Result<bool> {
        while self.inner.has_next()? {
            let candidate = self.inner.next()?;
            if self.predicate.evaluate(&candidate)? {
                self.pending = Some(candidate);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<R: FeatureReader> FeatureReader for FilterReader<R> {
    fn feature_type(&self) -> &Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        if let Some(reason) = &self.failed {
            return Err(Error::ReaderFailed(reason.clone()));
        }
        if self.pending.is_some() {
            return Ok(true);
        }
        self.advance().map_err(|e| {
            self.failed = Some(e.to_string());
            e
        })
    }

    fn next(&mut self) -> Result<Feature> {
        if !self.has_next()? {
            return Err(Error::EndOfSequence);
        }
        self.pending.take().ok_or(Error::EndOfSequence)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending = None;
        self.inner.close()
    }
}
