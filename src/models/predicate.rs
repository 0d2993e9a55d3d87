use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::feature::{Feature, FeatureId};
use super::geometry::{Crs, Envelope};
use super::value::{compare_values, Value};
use crate::error::{Error, Result};
use crate::transform::TransformFactory;

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(&self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
        }
    }
}

/// A boolean test over a [`Feature`].
///
/// Predicates are pure. Attribute names are resolved when the predicate is
/// evaluated, so a reference to a missing attribute surfaces as
/// `UnknownAttribute` from the first evaluation, not from construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Include,
    Exclude,
    Id { ids: BTreeSet<FeatureId> },
    Compare {
        attribute: String,
        op: CompareOp,
        value: Value,
    },
    IsNull { attribute: String },
    /// SQL-style pattern where `%` matches any run of characters.
    Like { attribute: String, pattern: String },
    /// Envelope intersection against a geometry attribute. When `crs` is set
    /// it must match the attribute's declared CRS.
    BBox {
        attribute: String,
        envelope: Envelope,
        crs: Option<Crs>,
    },
    And { all: Vec<Predicate> },
    Or { any: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    pub fn id<I: Into<FeatureId>>(id: I) -> Self {
        Self::ids([id.into()])
    }

    pub fn ids(ids: impl IntoIterator<Item = FeatureId>) -> Self {
        Self::Id {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn compare(attribute: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, CompareOp::Eq, value)
    }

    pub fn is_null(attribute: impl Into<String>) -> Self {
        Self::IsNull {
            attribute: attribute.into(),
        }
    }

    pub fn like(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            attribute: attribute.into(),
            pattern: pattern.into(),
        }
    }

    pub fn bbox(attribute: impl Into<String>, envelope: Envelope, crs: Option<Crs>) -> Self {
        Self::BBox {
            attribute: attribute.into(),
            envelope,
            crs,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::Include, p) | (p, Self::Include) => p,
            (Self::Exclude, _) | (_, Self::Exclude) => Self::Exclude,
            (Self::And { mut all }, p) => {
                all.push(p);
                Self::And { all }
            }
            (p, q) => Self::And { all: vec![p, q] },
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::Exclude, p) | (p, Self::Exclude) => p,
            (Self::Include, _) | (_, Self::Include) => Self::Include,
            (Self::Or { mut any }, p) => {
                any.push(p);
                Self::Or { any }
            }
            (p, q) => Self::Or { any: vec![p, q] },
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Self::Include => Self::Exclude,
            Self::Exclude => Self::Include,
            Self::Not { predicate } => *predicate,
            p => Self::Not {
                predicate: Box::new(p),
            },
        }
    }

    pub fn evaluate(&self, feature: &Feature) -> Result<bool> {
        match self {
            Self::Include => Ok(true),
            Self::Exclude => Ok(false),
            Self::Id { ids } => Ok(ids.contains(feature.id())),
            Self::Compare {
                attribute,
                op,
                value,
            } => {
                let actual = feature.require(attribute)?;
                // Null never satisfies an ordering comparison.
                if actual.is_null() || value.is_null() {
                    return Ok(match op {
                        CompareOp::Eq => actual.is_null() && value.is_null(),
                        CompareOp::Ne => actual.is_null() != value.is_null(),
                        _ => false,
                    });
                }
                Ok(op.holds(compare_values(actual, value)))
            }
            Self::IsNull { attribute } => Ok(feature.require(attribute)?.is_null()),
            Self::Like { attribute, pattern } => Ok(feature
                .require(attribute)?
                .as_str()
                .map(|s| like_matches(pattern, s))
                .unwrap_or(false)),
            Self::BBox {
                attribute,
                envelope,
                crs,
            } => {
                let descriptor = feature
                    .feature_type()
                    .attribute(attribute)
                    .ok_or_else(|| Error::UnknownAttribute(attribute.clone()))?;
                if let (Some(literal), Some(declared)) = (crs, &descriptor.crs) {
                    if literal != declared {
                        return Err(Error::CrsMismatch {
                            expected: declared.code.clone(),
                            found: literal.code.clone(),
                        });
                    }
                }
                Ok(feature
                    .require(attribute)?
                    .as_geometry()
                    .map(|g| g.envelope().intersects(envelope))
                    .unwrap_or(false))
            }
            Self::And { all } => {
                for p in all {
                    if !p.evaluate(feature)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or { any } => {
                for p in any {
                    if p.evaluate(feature)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not { predicate } => Ok(!predicate.evaluate(feature)?),
        }
    }

    /// Replace identities in `Id` tests according to `mapping`.
    pub fn remap_ids(&self, mapping: &HashMap<FeatureId, FeatureId>) -> Predicate {
        match self {
            Self::Id { ids } => Self::Id {
                ids: ids
                    .iter()
                    .map(|id| mapping.get(id).cloned().unwrap_or_else(|| id.clone()))
                    .collect(),
            },
            Self::And { all } => Self::And {
                all: all.iter().map(|p| p.remap_ids(mapping)).collect(),
            },
            Self::Or { any } => Self::Or {
                any: any.iter().map(|p| p.remap_ids(mapping)).collect(),
            },
            Self::Not { predicate } => Self::Not {
                predicate: Box::new(predicate.remap_ids(mapping)),
            },
            p => p.clone(),
        }
    }

    /// Express every bounding-box literal carrying a CRS in `target` instead.
    /// The transformed box is the envelope of the transformed corners.
    pub fn reprojected(&self, factory: &dyn TransformFactory, target: &Crs) -> Result<Predicate> {
        Ok(match self {
            Self::BBox {
                attribute,
                envelope,
                crs: Some(source),
            } if source != target => {
                let transform = factory.find(source, target)?;
                let mut out = Envelope::empty();
                for corner in envelope.corners() {
                    let c = transform.apply(corner).map_err(|reason| Error::TransformError {
                        feature: FeatureId::new(format!("bbox:{}", attribute)),
                        reason,
                    })?;
                    out.expand_to_include(c);
                }
                Self::BBox {
                    attribute: attribute.clone(),
                    envelope: out,
                    crs: Some(target.clone()),
                }
            }
            Self::And { all } => Self::And {
                all: all
                    .iter()
                    .map(|p| p.reprojected(factory, target))
                    .collect::<Result<_>>()?,
            },
            Self::Or { any } => Self::Or {
                any: any
                    .iter()
                    .map(|p| p.reprojected(factory, target))
                    .collect::<Result<_>>()?,
            },
            Self::Not { predicate } => Self::Not {
                predicate: Box::new(predicate.reprojected(factory, target)?),
            },
            p => p.clone(),
        })
    }

    /// Whether this predicate can only match features listed in an `Id` test.
    pub fn referenced_ids(&self) -> Option<&BTreeSet<FeatureId>> {
        match self {
            Self::Id { ids } => Some(ids),
            _ => None,
        }
    }
}

fn like_matches(pattern: &str, s: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return pattern == s;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !s.starts_with(first) || s.len() < first.len() + last.len() || !s.ends_with(last) {
        return false;
    }
    let mut rest = &s[first.len()..s.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::{FeatureType, Geometry, ValueKind};

    fn sample() -> Feature {
        let ft = Arc::new(
            FeatureType::builder("sites")
                .add("name", ValueKind::Text)
                .add("double", ValueKind::Double)
                .geometry("geom", Some(Crs::crs84()))
                .build(),
        );
        Feature::from_pairs(
            "sites.1".into(),
            ft,
            [
                ("name", Value::from("harbour")),
                ("double", Value::from(2.0)),
                ("geom", Value::from(Geometry::point(10.0, 20.0))),
            ],
        )
        .unwrap()
    }

    #[test]
    fn compare_and_combinators() {
        let f = sample();
        let p = Predicate::compare("double", CompareOp::Gt, 1.5).and(Predicate::like("name", "har%"));
        assert!(p.evaluate(&f).unwrap());
        assert!(!p.clone().not().evaluate(&f).unwrap());
    }

    #[test]
    fn unknown_attribute_fails_on_evaluation() {
        let p = Predicate::eq("missing", 1);
        assert!(matches!(p.evaluate(&sample()), Err(Error::UnknownAttribute(_))));
    }

    #[test]
    fn bbox_requires_matching_crs() {
        let env = Envelope::new(0.0, 0.0, 50.0, 50.0);
        assert!(Predicate::bbox("geom", env, Some(Crs::crs84())).evaluate(&sample()).unwrap());
        let err = Predicate::bbox("geom", env, Some(Crs::epsg_4326()))
            .evaluate(&sample())
            .unwrap_err();
        assert!(matches!(err, Error::CrsMismatch { .. }));
    }

    #[test]
    fn survives_json() {
        let p = Predicate::ids([FeatureId::new("sites.1"), FeatureId::new("sites.2")])
            .and(Predicate::compare("double", CompareOp::Le, 2.5))
            .or(Predicate::bbox("geom", Envelope::new(0.0, 0.0, 1.0, 1.0), Some(Crs::crs84())).not())
            .and(Predicate::is_null("name").not());
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains(r#""kind":"compare""#));
        let back: Predicate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.evaluate(&sample()).unwrap(), p.evaluate(&sample()).unwrap());
    }

    #[test]
    fn like_patterns() {
        assert!(like_matches("a%c", "abbbc"));
        assert!(like_matches("%b%", "abc"));
        assert!(!like_matches("a%c", "ab"));
        assert!(like_matches("abc", "abc"));
    }

    #[test]
    fn remap_ids_rewrites_nested_sets() {
        let mut mapping = HashMap::new();
        mapping.insert(FeatureId::new("new-1"), FeatureId::new("sites.9"));
        let p = Predicate::id("new-1").or(Predicate::eq("name", "x"));
        let remapped = p.remap_ids(&mapping);
        assert_eq!(
            remapped,
            Predicate::id("sites.9").or(Predicate::eq("name", "x"))
        );
    }
}
