//! Lazy feature sequences and the transformers that decorate them.
//!
//! Every transformer owns exactly one inner reader. Closing the outer reader
//! closes the inner one exactly once, whether or not iteration finished, so a
//! whole chain is released by closing its head. `close` is idempotent and a
//! closed reader reports no further features.
//!
//! Only [`SortByReader`] buffers its input; everything else pulls one feature
//! at a time.

mod filter;
mod paging;
mod reproject;
mod retype;
mod rewrite;
mod sort;

use std::sync::Arc;

pub use filter::FilterReader;
pub use paging::{LimitReader, OffsetReader};
pub use reproject::ReprojectReader;
pub use retype::RetypeReader;
pub use rewrite::RewriteReader;
pub use sort::SortByReader;

use crate::error::{Error, Result};
use crate::models::{Feature, FeatureType};

/// A forward-only sequence of features of one type.
pub trait FeatureReader: Send {
    /// Type every yielded feature conforms to.
    fn feature_type(&self) -> &Arc<FeatureType>;

    /// Whether `next` would yield a feature. Repeated calls without an
    /// intervening `next` return the same answer.
    fn has_next(&mut self) -> Result<bool>;

    /// Yield the next feature, or `EndOfSequence` when exhausted.
    fn next(&mut self) -> Result<Feature>;

    /// Release the reader and everything it wraps.
    fn close(&mut self) -> Result<()>;
}

pub type BoxedReader = Box<dyn FeatureReader>;

impl<R: FeatureReader + ?Sized> FeatureReader for Box<R> {
    fn feature_type(&self) -> &Arc<FeatureType> {
        (**self).feature_type()
    }

    fn has_next(&mut self) -> Result<bool> {
        (**self).has_next()
    }

    fn next(&mut self) -> Result<Feature> {
        (**self).next()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// A reader that can also replace or drop the feature last returned by
/// `next`, or append new ones.
pub trait FeatureWriter: FeatureReader {
    /// Replace the current feature, or append when there is none.
    fn write(&mut self, feature: Feature) -> Result<()>;

    /// Drop the current feature.
    fn remove(&mut self) -> Result<()>;
}

/// Drain `reader` into a vector and close it. The reader is closed even when
/// iteration fails.
pub fn read_all<R: FeatureReader + ?Sized>(reader: &mut R) -> Result<Vec<Feature>> {
    let mut out = Vec::new();
    let drained = (|| -> Result<()> {
        while reader.has_next()? {
            out.push(reader.next()?);
        }
        Ok(())
    })();
    let closed = reader.close();
    drained.and(closed)?;
    Ok(out)
}

/// Count the remaining features of `reader`, then close it.
pub fn count_all<R: FeatureReader + ?Sized>(reader: &mut R) -> Result<usize> {
    let mut n = 0;
    let drained = (|| -> Result<()> {
        while reader.has_next()? {
            reader.next()?;
            n += 1;
        }
        Ok(())
    })();
    let closed = reader.close();
    drained.and(closed)?;
    Ok(n)
}

/// Close `inner` after a failed construction, keeping the construction error.
pub(crate) fn close_after_error<R: FeatureReader + ?Sized>(inner: &mut R, err: Error) -> Error {
    if let Err(close_err) = inner.close() {
        tracing::warn!("Failed to close reader after error: {}", close_err);
    }
    err
}

/// A typed sequence that yields nothing.
#[derive(Debug)]
pub struct EmptyReader {
    feature_type: Arc<FeatureType>,
}

impl EmptyReader {
    pub fn new(feature_type: Arc<FeatureType>) -> Self {
        Self { feature_type }
    }
}

impl FeatureReader for EmptyReader {
    fn feature_type(&self) -> &Arc<FeatureType> {
        &self.feature_type
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn next(&mut self) -> Result<Feature> {
        Err(Error::EndOfSequence)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Attaches a feature type to a bare iterator of features. Read-only: the
/// [`FeatureWriter`] methods fail with `Unsupported`.
pub struct WrapReader<I: Iterator<Item = Feature>> {
    feature_type: Arc<FeatureType>,
    iter: std::iter::Peekable<I>,
    closed: bool,
}

impl<I: Iterator<Item = Feature>> WrapReader<I> {
    pub fn new(feature_type: Arc<FeatureType>, iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            feature_type,
            iter: iter.into_iter().peekable(),
            closed: false,
        }
    }
}

impl<I: Iterator<Item = Feature> + Send> FeatureReader for WrapReader<I> {
    fn feature_type(&self) -> &Arc<FeatureType> {
        &self.feature_type
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.closed && self.iter.peek().is_some())
    }

    fn next(&mut self) -> Result<Feature> {
        if self.closed {
            return Err(Error::EndOfSequence);
        }
        self.iter.next().ok_or(Error::EndOfSequence)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl<I: Iterator<Item = Feature> + Send> FeatureWriter for WrapReader<I> {
    fn write(&mut self, _feature: Feature) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{} is read-only: write",
            self.feature_type.name()
        )))
    }

    fn remove(&mut self) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{} is read-only: remove",
            self.feature_type.name()
        )))
    }
}

/// Writable wrap over an owned collection of features.
///
/// `remove` drops the feature last returned by `next`; `write` replaces it, or
/// inserts a new feature at the cursor when there is no current feature.
/// Recover the edited collection with [`into_features`](Self::into_features).
pub struct WritableWrap {
    feature_type: Arc<FeatureType>,
    features: Vec<Feature>,
    cursor: usize,
    current: Option<usize>,
    closed: bool,
}

impl WritableWrap {
    pub fn new(feature_type: Arc<FeatureType>, features: Vec<Feature>) -> Self {
        Self {
            feature_type,
            features,
            cursor: 0,
            current: None,
            closed: false,
        }
    }

    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Unsupported("writer is closed".to_string()));
        }
        Ok(())
    }
}

impl FeatureReader for WritableWrap {
    fn feature_type(&self) -> &Arc<FeatureType> {
        &self.feature_type
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.closed && self.cursor < self.features.len())
    }

    fn next(&mut self) -> Result<Feature> {
        if !self.has_next()? {
            return Err(Error::EndOfSequence);
        }
        let feature = self.features[self.cursor].clone();
        self.current = Some(self.cursor);
        self.cursor += 1;
        Ok(feature)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.current = None;
        Ok(())
    }
}

impl FeatureWriter for WritableWrap {
    fn write(&mut self, feature: Feature) -> Result<()> {
        self.ensure_open()?;
        if feature.feature_type().name() != self.feature_type.name() {
            return Err(Error::Unsupported(format!(
                "cannot write {} feature into {}",
                feature.feature_type().name(),
                self.feature_type.name()
            )));
        }
        match self.current.take() {
            Some(idx) => self.features[idx] = feature,
            None => {
                self.features.insert(self.cursor, feature);
                self.cursor += 1;
            }
        }
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        self.ensure_open()?;
        let idx = self
            .current
            .take()
            .ok_or_else(|| Error::Unsupported("remove without a current feature".to_string()))?;
        self.features.remove(idx);
        self.cursor -= 1;
        Ok(())
    }
}
