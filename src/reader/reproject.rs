use std::sync::Arc;

use super::FeatureReader;
use crate::error::{Error, Result};
use crate::models::{Crs, Feature, FeatureType, Value};
use crate::transform::{CoordinateTransform, TransformFactory};

/// Transforms every geometry attribute of `inner` into a target CRS.
///
/// Transforms are located when the reader is built, so a missing path fails
/// construction with `TransformUnavailable`. A coordinate that fails to
/// transform fails `next` with `TransformError` for that feature.
pub struct ReprojectReader<R> {
    inner: R,
    feature_type: Arc<FeatureType>,
    transforms: Vec<(usize, Arc<dyn CoordinateTransform>)>,
    closed: bool,
}

impl<R: FeatureReader> ReprojectReader<R> {
    pub fn new(mut inner: R, target: &Crs, factory: &dyn TransformFactory) -> Result<Self> {
        let source_type = inner.feature_type().clone();
        let mut transforms = Vec::new();
        for (idx, attribute) in source_type.attributes().iter().enumerate() {
            if !attribute.is_geometry() {
                continue;
            }
            let found = match &attribute.crs {
                Some(source) => factory.find(source, target),
                None => Err(Error::TransformUnavailable {
                    from: format!("undeclared CRS of {}", attribute.name),
                    to: target.code.clone(),
                }),
            };
            match found {
                Ok(t) => transforms.push((idx, t)),
                Err(e) => return Err(super::close_after_error(&mut inner, e)),
            }
        }
        tracing::debug!(
            "Reprojecting {} to {} ({} geometry attributes)",
            source_type.name(),
            target,
            transforms.len()
        );
        Ok(Self {
            inner,
            feature_type: Arc::new(source_type.with_crs(target)),
            transforms,
            closed: false,
        })
    }
}

impl<R: FeatureReader> FeatureReader for ReprojectReader<R> {
    fn feature_type(&self) -> &Arc<FeatureType> {
        &self.feature_type
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
        let mut values = source.values().to_vec();
        for (idx, transform) in &self.transforms {
            if let Value::Geometry(geometry) = &values[*idx] {
                let moved = geometry
                    .try_map_coords(|c| transform.apply(c))
                    .map_err(|reason| Error::TransformError {
                        feature: source.id().clone(),
                        reason,
                    })?;
                values[*idx] = Value::Geometry(moved);
            }
        }
        Ok(Feature::from_parts(
            source.id().clone(),
            self.feature_type.clone(),
            values,
        ))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}
