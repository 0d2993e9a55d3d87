use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A 2D coordinate in the axis order of its CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Coordinate-carrying geometry. Only the coordinate structure is modelled;
/// spatial algebra is left to dedicated libraries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates", rename_all = "snake_case")]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    /// Exterior ring followed by holes.
    Polygon(Vec<Vec<Coord>>),
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        Self::Point(Coord::new(x, y))
    }

    pub fn coords(&self) -> Box<dyn Iterator<Item = &Coord> + '_> {
        match self {
            Self::Point(c) => Box::new(std::iter::once(c)),
            Self::LineString(cs) => Box::new(cs.iter()),
            Self::Polygon(rings) => Box::new(rings.iter().flatten()),
        }
    }

    /// Build a geometry of the same shape with every coordinate mapped by `f`.
    pub fn try_map_coords<E>(
        &self,
        mut f: impl FnMut(Coord) -> Result<Coord, E>,
    ) -> Result<Geometry, E> {
        Ok(match self {
            Self::Point(c) => Self::Point(f(*c)?),
            Self::LineString(cs) => {
                Self::LineString(cs.iter().map(|c| f(*c)).collect::<Result<_, _>>()?)
            }
            Self::Polygon(rings) => Self::Polygon(
                rings
                    .iter()
                    .map(|ring| ring.iter().map(|c| f(*c)).collect::<Result<Vec<_>, _>>())
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    pub fn envelope(&self) -> Envelope {
        let mut env = Envelope::empty();
        for c in self.coords() {
            env.expand_to_include(*c);
        }
        env
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seq(cs: &[Coord]) -> String {
            cs.iter()
                .map(|c| format!("{} {}", c.x, c.y))
                .collect::<Vec<_>>()
                .join(", ")
        }
        match self {
            Self::Point(c) => write!(f, "POINT ({} {})", c.x, c.y),
            Self::LineString(cs) => write!(f, "LINESTRING ({})", seq(cs)),
            Self::Polygon(rings) => {
                let rings: Vec<String> = rings.iter().map(|r| format!("({})", seq(r))).collect();
                write!(f, "POLYGON ({})", rings.join(", "))
            }
        }
    }
}

/// Axis-aligned bounding box. An empty envelope has `min > max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn empty() -> Self {
        Self::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY)
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn expand_to_include(&mut self, c: Coord) {
        self.min_x = self.min_x.min(c.x);
        self.min_y = self.min_y.min(c.y);
        self.max_x = self.max_x.max(c.x);
        self.max_y = self.max_y.max(c.y);
    }

    pub fn expand_to_include_envelope(&mut self, other: &Envelope) {
        if other.is_empty() {
            return;
        }
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub(crate) fn cmp_lower_left(&self, other: &Envelope) -> Ordering {
        self.min_x
            .total_cmp(&other.min_x)
            .then(self.min_y.total_cmp(&other.min_y))
    }

    pub fn corners(&self) -> [Coord; 4] {
        [
            Coord::new(self.min_x, self.min_y),
            Coord::new(self.min_x, self.max_y),
            Coord::new(self.max_x, self.min_y),
            Coord::new(self.max_x, self.max_y),
        ]
    }
}

/// Axis order of a coordinate reference system.
///
/// - `EastNorth`: x is easting/longitude, y is northing/latitude
/// - `NorthEast`: x is northing/latitude, y is easting/longitude
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AxisOrder {
    EastNorth,
    NorthEast,
}

/// A coordinate reference system, identified by its code.
///
/// Two CRSs sharing a datum but differing in axis order are related by an
/// axis swap; anything else needs a registered transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    pub code: String,
    pub datum: String,
    pub axis_order: AxisOrder,
}

impl Crs {
    pub fn new(code: impl Into<String>, datum: impl Into<String>, axis_order: AxisOrder) -> Self {
        Self {
            code: code.into(),
            datum: datum.into(),
            axis_order,
        }
    }

    /// WGS 84 with the authority axis order (latitude, longitude).
    pub fn epsg_4326() -> Self {
        Self::new("EPSG:4326", "WGS84", AxisOrder::NorthEast)
    }

    /// WGS 84 in longitude, latitude order.
    pub fn crs84() -> Self {
        Self::new("CRS:84", "WGS84", AxisOrder::EastNorth)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}
