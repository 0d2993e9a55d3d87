use std::sync::Arc;

use super::FeatureReader;
use crate::error::{Error, Result};
use crate::models::{Feature, FeatureType};

/// Yields at most `limit` features of `inner`.
///
/// Reaching the limit does not close `inner`; it stays open until this reader
/// is closed.
pub struct LimitReader<R> {
    inner: R,
    limit: usize,
    yielded: usize,
    closed: bool,
}

impl<R: FeatureReader> LimitReader<R> {
    pub fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            limit,
            yielded: 0,
            closed: false,
        }
    }
}

impl<R: FeatureReader> FeatureReader for LimitReader<R> {
    fn feature_type(&self) -> &Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed || self.yielded >= self.limit {
            return Ok(false);
        }
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<Feature> {
        if !self.has_next()? {
            return Err(Error::EndOfSequence);
        }
        let feature = self.inner.next()?;
        self.yielded += 1;
        Ok(feature)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}

/// Skips the first `offset` features of `inner`. The skip happens on the
/// first `has_next`/`next` call.
pub struct OffsetReader<R> {
    inner: R,
    remaining_skip: usize,
    closed: bool,
}

impl<R: FeatureReader> OffsetReader<R> {
    pub fn new(inner: R, offset: usize) -> Self {
        Self {
            inner,
            remaining_skip: offset,
            closed: false,
        }
    }
}

impl<R: FeatureReader> FeatureReader for OffsetReader<R> {
    fn feature_type(&self) -> &Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        while self.remaining_skip > 0 {
            if !self.inner.has_next()? {
                self.remaining_skip = 0;
                return Ok(false);
            }
            self.inner.next()?;
            self.remaining_skip -= 1;
        }
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<Feature> {
        if !self.has_next()? {
            return Err(Error::EndOfSequence);
        }
        self.inner.next()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}
