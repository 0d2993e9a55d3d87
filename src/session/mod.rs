//! Sessions: staged changes overlaid on a [`Store`].
//!
//! A buffered session records additions, removals and updates in a per-type
//! [`DeltaLog`] instead of touching the store. Every read reconciles the store
//! contents with the log, so callers see their pending changes everywhere:
//! iteration, counts, sorting, paging and reprojection. [`Session::commit`]
//! replays the logs against the store; [`Session::rollback`] discards them.
//!
//! A direct session forwards every mutation to the store immediately and never
//! accumulates deltas.

mod delta;
mod merge;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use delta::{Delta, DeltaLog, DeltaSnapshot};

use crate::config::OverlayConfig;
use crate::error::{Error, Result};
use crate::models::{Envelope, Feature, FeatureId, FeatureType, Predicate, Query, Value};
use crate::reader::{
    count_all, BoxedReader, FeatureReader, FilterReader, LimitReader, OffsetReader,
    ReprojectReader, RetypeReader, SortByReader,
};
use crate::store::Store;
use crate::transform::{TransformFactory, TransformRegistry};
use merge::DiffReader;

/// How a session handles mutations.
///
/// - `Buffered`: mutations are staged in the delta log until commit
/// - `Direct`: mutations are applied to the store immediately
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Buffered,
    Direct,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffered => "buffered",
            Self::Direct => "direct",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "buffered" => Some(Self::Buffered),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

/// What a commit applied to one feature type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeCommit {
    /// Store identities of committed adds, in log order.
    pub added: Vec<FeatureId>,
    pub removed: usize,
    pub updated: usize,
}

/// Result of a fully successful [`Session::commit`], keyed by type name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub types: BTreeMap<String, TypeCommit>,
}

/// Staging and reconciliation layer over a [`Store`].
///
/// Reads take `&self` and capture a snapshot of the relevant delta log when
/// the reader is built; mutations take `&mut self`.
pub struct Session<S: Store> {
    store: S,
    mode: SessionMode,
    logs: BTreeMap<String, DeltaLog>,
    transforms: Arc<dyn TransformFactory>,
}

impl<S: Store> Session<S> {
    pub fn new(store: S, mode: SessionMode) -> Self {
        Self {
            store,
            mode,
            logs: BTreeMap::new(),
            transforms: Arc::new(TransformRegistry::new()),
        }
    }

    pub fn buffered(store: S) -> Self {
        Self::new(store, SessionMode::Buffered)
    }

    pub fn direct(store: S) -> Self {
        Self::new(store, SessionMode::Direct)
    }

    pub fn from_config(store: S, config: &OverlayConfig) -> Self {
        Self::new(store, config.default_mode)
    }

    /// Use `transforms` to locate coordinate transforms for reprojection.
    pub fn with_transforms(mut self, transforms: Arc<dyn TransformFactory>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Schema of `type_name`, or `UnknownType`.
    pub fn schema(&self, type_name: &str) -> Result<Arc<FeatureType>> {
        self.store
            .schema(type_name)
            .map_err(|e| store_error(type_name, e))?
            .ok_or_else(|| Error::UnknownType(type_name.to_string()))
    }

    // ============================================================
    // Reads
    // ============================================================

    /// Features of `query.type_name` as seen through the pending changes.
    ///
    /// The pipeline is: store contents, pending deltas, predicate, retype,
    /// reprojection, sort, offset, limit. Closing the returned reader closes
    /// the underlying store reader.
    pub fn query(&self, query: &Query) -> Result<BoxedReader> {
        let mut reader = self.matched(&query.type_name, &query.predicate)?;

        if let Some(target) = &query.target_type {
            reader = Box::new(RetypeReader::new(reader, target.clone())?);
        }

        if let Some(target) = &query.target_crs {
            let feature_type = reader.feature_type();
            let has_geometry = feature_type.attributes().iter().any(|a| a.is_geometry());
            let native = feature_type
                .attributes()
                .iter()
                .filter(|a| a.is_geometry())
                .all(|a| a.crs.as_ref() == Some(target));
            if has_geometry && !native {
                reader = Box::new(ReprojectReader::new(reader, target, self.transforms.as_ref())?);
            }
        }

        if let Some(sort) = &query.sort {
            if !sort.is_empty() {
                reader = Box::new(SortByReader::new(reader, sort.clone()));
            }
        }

        if let Some(offset) = query.offset {
            reader = Box::new(OffsetReader::new(reader, offset));
        }

        if let Some(limit) = query.limit {
            reader = Box::new(LimitReader::new(reader, limit));
        }

        Ok(reader)
    }

    /// Number of features matching `query.predicate` after reconciliation.
    /// Sorting and paging do not affect the count.
    pub fn count(&self, query: &Query) -> Result<usize> {
        let type_name = query.type_name.as_str();
        let schema = self.schema(type_name)?;

        if self.log(type_name).map_or(true, |log| log.is_empty()) {
            let predicate = match &query.predicate {
                Predicate::Include => None,
                p => Some(self.native_predicate(&schema, p)?),
            };
            return self
                .store
                .count(type_name, predicate.as_ref())
                .map_err(|e| store_error(type_name, e));
        }

        let mut reader = self.matched(type_name, &query.predicate)?;
        count_all(&mut reader)
    }

    /// Envelope of the default geometry over the features `query` yields.
    /// Empty when nothing matches or the type has no default geometry.
    pub fn bounds(&self, query: &Query) -> Result<Envelope> {
        let mut query = query.clone();
        query.sort = None;
        let mut reader = self.query(&query)?;
        let mut envelope = Envelope::empty();
        let scanned = (|| -> Result<()> {
            while reader.has_next()? {
                if let Some(geometry) = reader.next()?.default_geometry() {
                    envelope.expand_to_include_envelope(&geometry.envelope());
                }
            }
            Ok(())
        })();
        let closed = reader.close();
        scanned.and(closed)?;
        Ok(envelope)
    }

    /// Steps shared by `query` and `count`: store read, delta replay and
    /// predicate. Bounding-box literals are first expressed in the CRS of the
    /// type's default geometry.
    fn matched(&self, type_name: &str, predicate: &Predicate) -> Result<BoxedReader> {
        let schema = self.schema(type_name)?;
        let predicate = &self.native_predicate(&schema, predicate)?;
        let snapshot = self.log(type_name).map(|log| log.snapshot());

        // Pushdown is unsafe while a pending modify could make a store
        // feature newly match.
        let pushdown = match self.log(type_name) {
            Some(log) if log.has_modify() => None,
            _ => Some(predicate),
        };
        let store_reader = self
            .store
            .read(type_name, pushdown)
            .map_err(|e| store_error(type_name, e))?;

        let mut reader: BoxedReader = match snapshot {
            Some(deltas) if !deltas.is_empty() => Box::new(DiffReader::new(store_reader, deltas)),
            _ => store_reader,
        };
        if *predicate != Predicate::Include {
            reader = Box::new(FilterReader::new(reader, predicate.clone()));
        }
        tracing::debug!(
            "Reading {} with {} pending deltas",
            type_name,
            self.log(type_name).map_or(0, |log| log.len())
        );
        Ok(reader)
    }

    /// `predicate` with bounding-box literals expressed in the CRS of the
    /// default geometry of `schema`.
    fn native_predicate(&self, schema: &FeatureType, predicate: &Predicate) -> Result<Predicate> {
        match schema.crs() {
            Some(native) => predicate.reprojected(self.transforms.as_ref(), native),
            None => Ok(predicate.clone()),
        }
    }

    fn log(&self, type_name: &str) -> Option<&DeltaLog> {
        self.logs.get(type_name)
    }

    // ============================================================
    // Mutations
    // ============================================================

    /// Stage (or, in direct mode, apply) the addition of `features`.
    ///
    /// Returns the identity of each feature: a session-local placeholder in
    /// buffered mode, the store's identity in direct mode.
    pub fn add_features(&mut self, type_name: &str, features: Vec<Feature>) -> Result<Vec<FeatureId>> {
        let schema = self.schema(type_name)?;
        for feature in &features {
            if feature.feature_type().attributes() != schema.attributes() {
                return Err(Error::InvalidValue {
                    attribute: feature.id().to_string(),
                    expected: format!("a {} feature", schema.name()),
                    found: format!("a {} feature", feature.feature_type().name()),
                });
            }
        }

        match self.mode {
            SessionMode::Direct => {
                let mut ids = Vec::with_capacity(features.len());
                for feature in &features {
                    let id = self
                        .store
                        .add(type_name, feature)
                        .map_err(|e| store_error(type_name, e))?;
                    ids.push(id);
                }
                tracing::debug!("Added {} {} features to store", ids.len(), type_name);
                Ok(ids)
            }
            SessionMode::Buffered => {
                let log = self.logs.entry(type_name.to_string()).or_default();
                let mut ids = Vec::with_capacity(features.len());
                for feature in features {
                    let id = FeatureId::placeholder();
                    log.push(Delta::Add(feature.with_id(id.clone()).with_type(schema.clone())));
                    ids.push(id);
                }
                tracing::debug!("Staged {} {} additions", ids.len(), type_name);
                Ok(ids)
            }
        }
    }

    /// Stage (or apply) removal of every feature matching `predicate`.
    pub fn remove_features(&mut self, type_name: &str, predicate: Predicate) -> Result<()> {
        let schema = self.schema(type_name)?;
        let predicate = self.native_predicate(&schema, &predicate)?;
        match self.mode {
            SessionMode::Direct => {
                let n = self
                    .store
                    .remove_matching(type_name, &predicate)
                    .map_err(|e| store_error(type_name, e))?;
                tracing::debug!("Removed {} {} features from store", n, type_name);
            }
            SessionMode::Buffered => {
                self.logs
                    .entry(type_name.to_string())
                    .or_default()
                    .push(Delta::Remove(predicate));
                tracing::debug!("Staged {} removal", type_name);
            }
        }
        Ok(())
    }

    /// Stage (or apply) an update of the named attributes on every feature
    /// matching `predicate`. Attribute names and value kinds are checked
    /// against the schema up front.
    pub fn update_features(
        &mut self,
        type_name: &str,
        predicate: Predicate,
        values: Vec<(String, Value)>,
    ) -> Result<()> {
        let schema = self.schema(type_name)?;
        for (name, value) in &values {
            let idx = schema.require(name)?;
            schema.attributes()[idx].validate(value)?;
        }
        let predicate = self.native_predicate(&schema, &predicate)?;

        match self.mode {
            SessionMode::Direct => {
                let n = self
                    .store
                    .update_matching(type_name, &predicate, &values)
                    .map_err(|e| store_error(type_name, e))?;
                tracing::debug!("Updated {} {} features in store", n, type_name);
            }
            SessionMode::Buffered => {
                self.logs
                    .entry(type_name.to_string())
                    .or_default()
                    .push(Delta::Modify { predicate, values });
                tracing::debug!("Staged {} update", type_name);
            }
        }
        Ok(())
    }

    pub fn has_pending_changes(&self) -> bool {
        self.logs.values().any(|log| !log.is_empty())
    }

    /// Pending deltas of `type_name`, in call order.
    pub fn pending_changes(&self, type_name: &str) -> &[Delta] {
        self.log(type_name).map(|log| log.as_slice()).unwrap_or(&[])
    }

    // ============================================================
    // Commit / rollback
    // ============================================================

    /// Replay every pending log against the store, type by type in name order.
    ///
    /// Within a type, deltas apply in log order. Store identities returned for
    /// adds replace their placeholders in later identity tests. If a delta
    /// fails, the deltas before it stay applied, it and everything after it
    /// stay pending, and the remaining types are still attempted. All
    /// failures are reported together in [`Error::Commit`]; each carries its
    /// type and its index in that type's log as it stood at commit time.
    pub fn commit(&mut self) -> Result<CommitSummary> {
        let mut summary = CommitSummary::default();
        let mut failures = Vec::new();

        for (type_name, log) in self.logs.iter_mut() {
            if log.is_empty() {
                continue;
            }
            let deltas = log.snapshot();
            let mut outcome = TypeCommit::default();
            let mut placeholders: HashMap<FeatureId, FeatureId> = HashMap::new();
            let mut applied = 0;

            for (index, delta) in deltas.iter().enumerate() {
                let result = match delta.remap_ids(&placeholders) {
                    Delta::Add(feature) => self.store.add(type_name, &feature).map(|id| {
                        placeholders.insert(feature.id().clone(), id.clone());
                        outcome.added.push(id);
                    }),
                    Delta::Remove(predicate) => self
                        .store
                        .remove_matching(type_name, &predicate)
                        .map(|n| outcome.removed += n),
                    Delta::Modify { predicate, values } => self
                        .store
                        .update_matching(type_name, &predicate, &values)
                        .map(|n| outcome.updated += n),
                };
                if let Err(e) = result {
                    tracing::warn!(
                        "Commit of {} stopped at delta #{} ({}): {:#}",
                        type_name,
                        index,
                        delta.kind(),
                        e
                    );
                    failures.push(Error::store_at(type_name, index, e));
                    break;
                }
                applied += 1;
            }

            let remaining: Vec<Delta> = deltas[applied..]
                .iter()
                .map(|d| d.remap_ids(&placeholders))
                .collect();
            log.replace(remaining);

            tracing::info!(
                "Committed {} of {} deltas for {}: {} added, {} removed, {} updated",
                applied,
                deltas.len(),
                type_name,
                outcome.added.len(),
                outcome.removed,
                outcome.updated
            );
            summary.types.insert(type_name.clone(), outcome);
        }

        self.logs.retain(|_, log| !log.is_empty());

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(Error::Commit { failures })
        }
    }

    /// Discard every pending delta. The store is never touched.
    pub fn rollback(&mut self) {
        let discarded: usize = self.logs.values().map(|log| log.len()).sum();
        self.logs.clear();
        tracing::info!("Rolled back {} pending deltas", discarded);
    }
}

/// Surface a store error. Errors that already belong to this crate (for
/// example an unknown attribute hit while the store evaluated a pushed-down
/// predicate) pass through as they are.
fn store_error(type_name: &str, e: anyhow::Error) -> Error {
    match e.downcast::<Error>() {
        Ok(own) => own,
        Err(e) => Error::store(type_name, e),
    }
}
