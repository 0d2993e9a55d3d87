use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;

use super::{ensure_conforms, Store};
use crate::models::{Feature, FeatureId, FeatureType, Predicate, Value};
use crate::reader::{BoxedReader, FilterReader, WrapReader};

struct TypeEntry {
    schema: Arc<FeatureType>,
    features: Vec<Feature>,
    next_id: u64,
}

/// In-memory [`Store`]. Features keep insertion order; identities are
/// `<type>.<n>` with `n` increasing per type.
///
/// Reads take a snapshot of the type's features, so readers are unaffected
/// by later mutations.
#[derive(Default)]
pub struct MemoryStore {
    types: Arc<RwLock<HashMap<String, TypeEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feature type. Fails if a type with the same name exists.
    pub fn create_type(&self, feature_type: FeatureType) -> Result<Arc<FeatureType>> {
        let mut types = self.types.write().expect("memory store lock poisoned");
        if types.contains_key(feature_type.name()) {
            anyhow::bail!("Feature type {} already exists", feature_type.name());
        }
        let schema = Arc::new(feature_type);
        types.insert(
            schema.name().to_string(),
            TypeEntry {
                schema: schema.clone(),
                features: Vec::new(),
                next_id: 1,
            },
        );
        Ok(schema)
    }

    fn with_entry<T>(&self, type_name: &str, f: impl FnOnce(&mut TypeEntry) -> Result<T>) -> Result<T> {
        let mut types = self.types.write().expect("memory store lock poisoned");
        let entry = types
            .get_mut(type_name)
            .ok_or_else(|| anyhow::anyhow!("Feature type not found: {}", type_name))?;
        f(entry)
    }

    fn snapshot(&self, type_name: &str) -> Result<(Arc<FeatureType>, Vec<Feature>)> {
        let types = self.types.read().expect("memory store lock poisoned");
        let entry = types
            .get(type_name)
            .ok_or_else(|| anyhow::anyhow!("Feature type not found: {}", type_name))?;
        Ok((entry.schema.clone(), entry.features.clone()))
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            types: self.types.clone(),
        }
    }
}

impl Store for MemoryStore {
    fn type_names(&self) -> Result<Vec<String>> {
        let types = self.types.read().expect("memory store lock poisoned");
        let mut names: Vec<String> = types.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn schema(&self, type_name: &str) -> Result<Option<Arc<FeatureType>>> {
        let types = self.types.read().expect("memory store lock poisoned");
        Ok(types.get(type_name).map(|e| e.schema.clone()))
    }

    fn read(&self, type_name: &str, predicate: Option<&Predicate>) -> Result<BoxedReader> {
        let (schema, features) = self.snapshot(type_name)?;
        let reader = WrapReader::new(schema, features);
        Ok(match predicate {
            Some(p) if *p != Predicate::Include => Box::new(FilterReader::new(reader, p.clone())),
            _ => Box::new(reader),
        })
    }

    fn count(&self, type_name: &str, predicate: Option<&Predicate>) -> Result<usize> {
        let (_, features) = self.snapshot(type_name)?;
        let Some(predicate) = predicate else {
            return Ok(features.len());
        };
        let mut n = 0;
        for f in &features {
            if predicate.evaluate(f)? {
                n += 1;
            }
        }
        Ok(n)
    }

    fn add(&self, type_name: &str, feature: &Feature) -> Result<FeatureId> {
        self.with_entry(type_name, |entry| {
            ensure_conforms(&entry.schema, feature)?;
            let id = FeatureId::new(format!("{}.{}", type_name, entry.next_id));
            entry.next_id += 1;
            entry
                .features
                .push(feature.with_id(id.clone()).with_type(entry.schema.clone()));
            Ok(id)
        })
    }

    fn remove_matching(&self, type_name: &str, predicate: &Predicate) -> Result<usize> {
        self.with_entry(type_name, |entry| {
            let mut kept = Vec::with_capacity(entry.features.len());
            for f in &entry.features {
                if !predicate.evaluate(f)? {
                    kept.push(f.clone());
                }
            }
            let removed = entry.features.len() - kept.len();
            entry.features = kept;
            Ok(removed)
        })
    }

    fn update_matching(
        &self,
        type_name: &str,
        predicate: &Predicate,
        values: &[(String, Value)],
    ) -> Result<usize> {
        self.with_entry(type_name, |entry| {
            let mut updated = Vec::with_capacity(entry.features.len());
            let mut n = 0;
            for f in &entry.features {
                if predicate.evaluate(f)? {
                    updated.push(f.with_values(values)?);
                    n += 1;
                } else {
                    updated.push(f.clone());
                }
            }
            entry.features = updated;
            Ok(n)
        })
    }
}
