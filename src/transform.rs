//! Coordinate transform capability.
//!
//! Computing transforms between arbitrary CRSs is out of scope for this crate;
//! a [`TransformFactory`] only has to locate one. [`TransformRegistry`] knows
//! identity and axis-swap transforms and anything registered explicitly.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::models::{Coord, Crs};

/// Maps coordinates from one CRS to another.
pub trait CoordinateTransform: Send + Sync + Debug {
    /// Transform a single coordinate; the error is a human-readable reason.
    fn apply(&self, coord: Coord) -> std::result::Result<Coord, String>;
}

/// Locates a transform between two CRSs.
pub trait TransformFactory: Send + Sync {
    /// Fails with `TransformUnavailable` when no path exists.
    fn find(&self, source: &Crs, target: &Crs) -> Result<Arc<dyn CoordinateTransform>>;
}

#[derive(Debug)]
pub struct Identity;

impl CoordinateTransform for Identity {
    fn apply(&self, coord: Coord) -> std::result::Result<Coord, String> {
        Ok(coord)
    }
}

/// Swaps x and y, relating the two axis orders of one datum.
#[derive(Debug)]
pub struct AxisSwap;

impl CoordinateTransform for AxisSwap {
    fn apply(&self, coord: Coord) -> std::result::Result<Coord, String> {
        Ok(Coord::new(coord.y, coord.x))
    }
}

/// `x' = a*x + b*y + c`, `y' = d*x + e*y + f`. Non-finite output is an error.
#[derive(Debug, Clone, Copy)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl CoordinateTransform for Affine {
    fn apply(&self, coord: Coord) -> std::result::Result<Coord, String> {
        let x = self.a * coord.x + self.b * coord.y + self.c;
        let y = self.d * coord.x + self.e * coord.y + self.f;
        if !x.is_finite() || !y.is_finite() {
            return Err(format!("({}, {}) maps outside the target domain", coord.x, coord.y));
        }
        Ok(Coord::new(x, y))
    }
}

/// Default [`TransformFactory`].
#[derive(Default)]
pub struct TransformRegistry {
    registered: RwLock<HashMap<(String, String), Arc<dyn CoordinateTransform>>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform from `source` to `target` (by CRS code).
    pub fn register(&self, source: &Crs, target: &Crs, transform: Arc<dyn CoordinateTransform>) {
        self.registered
            .write()
            .expect("transform registry lock poisoned")
            .insert((source.code.clone(), target.code.clone()), transform);
    }
}

impl TransformFactory for TransformRegistry {
    fn find(&self, source: &Crs, target: &Crs) -> Result<Arc<dyn CoordinateTransform>> {
        if let Some(t) = self
            .registered
            .read()
            .expect("transform registry lock poisoned")
            .get(&(source.code.clone(), target.code.clone()))
        {
            return Ok(t.clone());
        }
        if source.datum == target.datum {
            if source.axis_order == target.axis_order {
                return Ok(Arc::new(Identity));
            }
            return Ok(Arc::new(AxisSwap));
        }
        Err(Error::TransformUnavailable {
            from: source.code.clone(),
            to: target.code.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AxisOrder;

    #[test]
    fn same_datum_swapped_axes() {
        let t = TransformRegistry::new()
            .find(&Crs::epsg_4326(), &Crs::crs84())
            .unwrap();
        assert_eq!(t.apply(Coord::new(1.0, 0.0)).unwrap(), Coord::new(0.0, 1.0));
    }

    #[test]
    fn unrelated_datums_need_registration() {
        let registry = TransformRegistry::new();
        let local = Crs::new("LOCAL:1", "site", AxisOrder::EastNorth);
        let err = registry.find(&Crs::crs84(), &local).unwrap_err();
        assert!(matches!(err, Error::TransformUnavailable { .. }));

        registry.register(
            &Crs::crs84(),
            &local,
            Arc::new(Affine {
                a: 2.0,
                b: 0.0,
                c: 1.0,
                d: 0.0,
                e: 2.0,
                f: -1.0,
            }),
        );
        let t = registry.find(&Crs::crs84(), &local).unwrap();
        assert_eq!(t.apply(Coord::new(1.0, 1.0)).unwrap(), Coord::new(3.0, 1.0));
    }
}
