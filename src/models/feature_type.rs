use serde::{Deserialize, Serialize};

use super::geometry::Crs;
use super::value::{Value, ValueKind};
use crate::error::{Error, Result};

/// Describes one attribute of a [`FeatureType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub nullable: bool,
    pub min_occurs: u32,
    pub max_occurs: u32,
    /// Only meaningful for geometry attributes.
    pub crs: Option<Crs>,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            min_occurs: 0,
            max_occurs: 1,
            crs: None,
        }
    }

    pub fn geometry(name: impl Into<String>, crs: Option<Crs>) -> Self {
        Self {
            crs,
            ..Self::new(name, ValueKind::Geometry)
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self.min_occurs = 1;
        self
    }

    pub fn is_geometry(&self) -> bool {
        self.kind == ValueKind::Geometry
    }

    /// Check that `value` may be stored under this descriptor.
    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() && !self.nullable {
            return Err(Error::InvalidValue {
                attribute: self.name.clone(),
                expected: self.kind.as_str().to_string(),
                found: "null".to_string(),
            });
        }
        if !value.conforms_to(self.kind) {
            return Err(Error::InvalidValue {
                attribute: self.name.clone(),
                expected: self.kind.as_str().to_string(),
                found: value
                    .kind()
                    .map(|k| k.as_str())
                    .unwrap_or("null")
                    .to_string(),
            });
        }
        let finite = match value {
            Value::Double(d) => d.is_finite(),
            Value::Geometry(g) => g.coords().all(|c| c.x.is_finite() && c.y.is_finite()),
            _ => true,
        };
        if !finite {
            return Err(Error::InvalidValue {
                attribute: self.name.clone(),
                expected: format!("finite {}", self.kind.as_str()),
                found: value.to_string(),
            });
        }
        Ok(())
    }
}

/// The schema shared by a family of features: an ordered list of attribute
/// descriptors, one of which may be the default geometry.
///
/// Immutable once built; readers share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureType {
    name: String,
    attributes: Vec<AttributeDescriptor>,
    default_geometry: Option<usize>,
}

impl FeatureType {
    pub fn builder(name: impl Into<String>) -> FeatureTypeBuilder {
        FeatureTypeBuilder {
            name: name.into(),
            attributes: Vec::new(),
            default_geometry: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Like [`index_of`](Self::index_of) but fails with `UnknownAttribute`.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| Error::UnknownAttribute(format!("{}.{}", self.name, name)))
    }

    pub fn default_geometry_index(&self) -> Option<usize> {
        self.default_geometry
    }

    pub fn default_geometry(&self) -> Option<&AttributeDescriptor> {
        self.default_geometry.map(|i| &self.attributes[i])
    }

    /// CRS of the default geometry, if any.
    pub fn crs(&self) -> Option<&Crs> {
        self.default_geometry().and_then(|a| a.crs.as_ref())
    }

    /// Same type with every geometry attribute declared in `crs`.
    pub fn with_crs(&self, crs: &Crs) -> FeatureType {
        let attributes = self
            .attributes
            .iter()
            .map(|a| {
                if a.is_geometry() {
                    AttributeDescriptor {
                        crs: Some(crs.clone()),
                        ..a.clone()
                    }
                } else {
                    a.clone()
                }
            })
            .collect();
        FeatureType {
            name: self.name.clone(),
            attributes,
            default_geometry: self.default_geometry,
        }
    }

    /// Subset/reorder projection of this type onto `names`.
    pub fn select(&self, names: &[&str]) -> Result<FeatureType> {
        let renames: Vec<(&str, &str)> = names.iter().map(|n| (*n, *n)).collect();
        self.select_renamed(&renames)
    }

    /// Projection onto `(target_name, source_name)` pairs, allowing renames.
    /// The default geometry is kept if its source attribute is selected.
    pub fn select_renamed(&self, mapping: &[(&str, &str)]) -> Result<FeatureType> {
        let mut attributes = Vec::with_capacity(mapping.len());
        let mut default_geometry = None;
        for (target, source) in mapping {
            let idx = self.require(source)?;
            if Some(idx) == self.default_geometry {
                default_geometry = Some(attributes.len());
            }
            attributes.push(AttributeDescriptor {
                name: target.to_string(),
                ..self.attributes[idx].clone()
            });
        }
        Ok(FeatureType {
            name: self.name.clone(),
            attributes,
            default_geometry,
        })
    }
}

/// Builder for [`FeatureType`].
#[derive(Debug, Clone)]
pub struct FeatureTypeBuilder {
    name: String,
    attributes: Vec<AttributeDescriptor>,
    default_geometry: Option<usize>,
}

impl FeatureTypeBuilder {
    pub fn attribute(mut self, descriptor: AttributeDescriptor) -> Self {
        self.attributes.push(descriptor);
        self
    }

    pub fn add(self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.attribute(AttributeDescriptor::new(name, kind))
    }

    /// Add a geometry attribute. The first one added becomes the default
    /// geometry unless [`default_geometry`](Self::default_geometry) is called.
    pub fn geometry(mut self, name: impl Into<String>, crs: Option<Crs>) -> Self {
        if self.default_geometry.is_none() {
            self.default_geometry = Some(self.attributes.len());
        }
        self.attribute(AttributeDescriptor::geometry(name, crs))
    }

    pub fn default_geometry(mut self, name: &str) -> Self {
        self.default_geometry = self.attributes.iter().position(|a| a.name == name);
        self
    }

    pub fn build(self) -> FeatureType {
        FeatureType {
            name: self.name,
            attributes: self.attributes,
            default_geometry: self.default_geometry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Crs, Geometry};

    fn roads() -> FeatureType {
        FeatureType::builder("roads")
            .add("name", ValueKind::Text)
            .geometry("geom", Some(Crs::epsg_4326()))
            .add("lanes", ValueKind::Int)
            .build()
    }

    #[test]
    fn select_reorders_and_tracks_geometry() {
        let t = roads().select(&["lanes", "geom"]).unwrap();
        assert_eq!(t.attribute_names().collect::<Vec<_>>(), vec!["lanes", "geom"]);
        assert_eq!(t.default_geometry_index(), Some(1));
    }

    #[test]
    fn select_unknown_attribute_fails() {
        let err = roads().select(&["width"]).unwrap_err();
        assert!(matches!(err, Error::UnknownAttribute(_)));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let double = AttributeDescriptor::new("speed", ValueKind::Double);
        assert!(double.validate(&Value::Double(12.5)).is_ok());
        assert!(matches!(double.validate(&Value::Double(f64::NAN)), Err(Error::InvalidValue { .. })));
        assert!(matches!(
            double.validate(&Value::Double(f64::INFINITY)),
            Err(Error::InvalidValue { .. })
        ));

        let geom = AttributeDescriptor::geometry("geom", None);
        assert!(geom.validate(&Value::from(Geometry::point(1.0, 2.0))).is_ok());
        assert!(matches!(
            geom.validate(&Value::from(Geometry::point(f64::NAN, 2.0))),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn with_crs_rewrites_geometry_descriptors_only() {
        let t = roads().with_crs(&Crs::crs84());
        assert_eq!(t.crs(), Some(&Crs::crs84()));
        assert!(t.attribute("name").unwrap().crs.is_none());
    }
}
