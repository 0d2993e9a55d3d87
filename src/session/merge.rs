use std::sync::Arc;

use super::delta::{Delta, DeltaSnapshot};
use crate::error::{Error, Result};
use crate::models::{Feature, FeatureType};
use crate::reader::FeatureReader;

/// Overlays a delta snapshot on a store reader.
///
/// Each store feature is replayed through the whole log; each staged add is
/// replayed through the deltas that follow it. A feature's fate depends only
/// on its own state as the log is walked, so the merge stays lazy: store
/// features first in store order, then surviving adds in log order.
pub(crate) struct DiffReader<R> {
    inner: R,
    deltas: DeltaSnapshot,
    next_add: usize,
    inner_done: bool,
    pending: Option<Feature>,
    closed: bool,
}

impl<R: FeatureReader> DiffReader<R> {
    pub(crate) fn new(inner: R, deltas: DeltaSnapshot) -> Self {
        Self {
            inner,
            deltas,
            next_add: 0,
            inner_done: false,
            pending: None,
            closed: false,
        }
    }

    /// Walk `feature` through `deltas[start..]`; `None` if a remove drops it.
    fn replay(&self, mut feature: Feature, start: usize) -> Result<Option<Feature>> {
        for delta in &self.deltas[start..] {
            match delta {
                Delta::Add(_) => {}
                Delta::Remove(predicate) => {
                    if predicate.evaluate(&feature)? {
                        return Ok(None);
                    }
                }
                Delta::Modify { predicate, values } => {
                    if predicate.evaluate(&feature)? {
                        feature = feature.with_values(values)?;
                    }
                }
            }
        }
        Ok(Some(feature))
    }
}

impl<R: FeatureReader> FeatureReader for DiffReader<R> {
    fn feature_type(&self) -> &Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        if self.pending.is_some() {
            return Ok(true);
        }
        while !self.inner_done {
            if !self.inner.has_next()? {
                self.inner_done = true;
                break;
            }
            let feature = self.inner.next()?;
            if let Some(live) = self.replay(feature, 0)? {
                self.pending = Some(live);
                return Ok(true);
            }
        }
        while self.next_add < self.deltas.len() {
            let index = self.next_add;
            self.next_add += 1;
            if let Delta::Add(added) = &self.deltas[index] {
                let added = added.with_type(self.inner.feature_type().clone());
                if let Some(live) = self.replay(added, index + 1)? {
                    self.pending = Some(live);
                    return Ok(true);
                }
            }
        }
        Ok(false)
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
