use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::feature_type::FeatureType;
use super::geometry::Geometry;
use super::value::Value;
use crate::error::{Error, Result};

const PLACEHOLDER_PREFIX: &str = "new-";

/// Stable identity of a feature, independent of its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Session-local identity for a staged add, replaced by the store's
    /// identity on commit.
    pub fn placeholder() -> Self {
        Self(format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4()))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An instance of a [`FeatureType`]: an identity plus one value per schema
/// attribute, in schema order.
///
/// Features are values. Operations that "modify" a feature return a new one;
/// the attribute vector is shared until one side writes to it.
#[derive(Debug, Clone)]
pub struct Feature {
    id: FeatureId,
    feature_type: Arc<FeatureType>,
    values: Arc<Vec<Value>>,
}

impl Feature {
    /// Build a feature from values in schema order. Fails if the arity or any
    /// value kind does not match the schema.
    pub fn new(id: FeatureId, feature_type: Arc<FeatureType>, values: Vec<Value>) -> Result<Self> {
        if values.len() != feature_type.len() {
            return Err(Error::InvalidValue {
                attribute: feature_type.name().to_string(),
                expected: format!("{} values", feature_type.len()),
                found: format!("{} values", values.len()),
            });
        }
        for (descriptor, value) in feature_type.attributes().iter().zip(&values) {
            descriptor.validate(value)?;
        }
        Ok(Self::from_parts(id, feature_type, values))
    }

    /// Build a feature from named values; attributes not named are null.
    pub fn from_pairs<K, V, I>(id: FeatureId, feature_type: Arc<FeatureType>, pairs: I) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut values = vec![Value::Null; feature_type.len()];
        for (name, value) in pairs {
            let idx = feature_type.require(name.as_ref())?;
            values[idx] = value.into();
        }
        Self::new(id, feature_type, values)
    }

    pub(crate) fn from_parts(id: FeatureId, feature_type: Arc<FeatureType>, values: Vec<Value>) -> Self {
        Self {
            id,
            feature_type,
            values: Arc::new(values),
        }
    }

    pub fn id(&self) -> &FeatureId {
        &self.id
    }

    pub fn feature_type(&self) -> &Arc<FeatureType> {
        &self.feature_type
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.feature_type.index_of(name).map(|i| &self.values[i])
    }

    /// Like [`get`](Self::get) but fails with `UnknownAttribute`.
    pub fn require(&self, name: &str) -> Result<&Value> {
        let idx = self.feature_type.require(name)?;
        Ok(&self.values[idx])
    }

    pub fn default_geometry(&self) -> Option<&Geometry> {
        self.feature_type
            .default_geometry_index()
            .and_then(|i| self.values[i].as_geometry())
    }

    /// Same feature under a different identity.
    pub fn with_id(&self, id: FeatureId) -> Feature {
        Feature {
            id,
            feature_type: self.feature_type.clone(),
            values: self.values.clone(),
        }
    }

    /// New feature with the named attributes overwritten; all other
    /// attributes are shared with `self`.
    pub fn with_values(&self, updates: &[(String, Value)]) -> Result<Feature> {
        let mut values = self.values.clone();
        for (name, value) in updates {
            let idx = self.feature_type.require(name)?;
            self.feature_type.attributes()[idx].validate(value)?;
            Arc::make_mut(&mut values)[idx] = value.clone();
        }
        Ok(Feature {
            id: self.id.clone(),
            feature_type: self.feature_type.clone(),
            values,
        })
    }

    /// Same values re-labelled with another (structurally identical) type.
    pub(crate) fn with_type(&self, feature_type: Arc<FeatureType>) -> Feature {
        Feature {
            id: self.id.clone(),
            feature_type,
            values: self.values.clone(),
        }
    }
}

/// Features are equal when identity and values match; the schema is compared
/// structurally.
impl PartialEq for Feature {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.values == other.values
            && *self.feature_type == *other.feature_type
    }
}
