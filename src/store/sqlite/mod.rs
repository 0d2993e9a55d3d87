mod schema;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use super::{ensure_conforms, Store};
use crate::config::OverlayConfig;
use crate::models::{Feature, FeatureId, FeatureType, Predicate, Value};
use crate::reader::{BoxedReader, FilterReader, WrapReader};

/// [`Store`] backed by SQLite.
///
/// Schemas are kept as JSON in `feature_types`; each feature is one row of
/// `features` holding its values as a JSON array in schema order. Rows keep
/// insertion order. Reads materialize the matching rows before returning, so
/// no statement or lock outlives the call.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "feature-overlay")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("features.db");
        Self::open(db_path)
    }

    /// Open the store named by `config`, falling back to the default location.
    pub fn open_config(config: &OverlayConfig) -> Result<Self> {
        match &config.database_path {
            Some(path) => Self::open(path.clone()),
            None => Self::open_default(),
        }
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let applied = schema::run_migrations(&mut conn)?;
        tracing::debug!(
            "Feature store at version {} ({} migrations applied)",
            schema::schema_version(&conn)?,
            applied
        );
        Ok(())
    }

    /// Register a feature type. Fails if a type with the same name exists.
    pub fn create_type(&self, feature_type: FeatureType) -> Result<Arc<FeatureType>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let schema_json = serde_json::to_string(&feature_type)?;
        conn.execute(
            "INSERT INTO feature_types (name, schema, created_at) VALUES (?, ?, ?)",
            (feature_type.name(), &schema_json, Utc::now().to_rfc3339()),
        )
        .with_context(|| format!("Failed to create feature type {}", feature_type.name()))?;
        Ok(Arc::new(feature_type))
    }

    /// Drop a feature type and all of its features.
    pub fn drop_type(&self, type_name: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute("DELETE FROM feature_types WHERE name = ?", [type_name])?;
        Ok(rows > 0)
    }

    fn load_features(
        &self,
        type_name: &str,
        ids: Option<&BTreeSet<FeatureId>>,
    ) -> Result<(Arc<FeatureType>, Vec<Feature>)> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let schema = load_schema(&conn, type_name)?
            .ok_or_else(|| anyhow::anyhow!("Feature type not found: {}", type_name))?;

        let mut stmt = conn.prepare(
            "SELECT id, attributes FROM features WHERE type_name = ? ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([type_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut features = Vec::with_capacity(rows.len());
        for (id, attributes) in rows {
            let id = FeatureId::new(id);
            if ids.is_some_and(|wanted| !wanted.contains(&id)) {
                continue;
            }
            let values: Vec<Value> = serde_json::from_str(&attributes)
                .with_context(|| format!("Corrupt attributes for feature {}", id))?;
            features.push(Feature::new(id, schema.clone(), values)?);
        }
        Ok((schema, features))
    }

    /// Load the type and the features `predicate` may match. Only identity
    /// tests are pushed into the row scan; everything else is evaluated by
    /// the caller.
    fn candidates(
        &self,
        type_name: &str,
        predicate: Option<&Predicate>,
    ) -> Result<(Arc<FeatureType>, Vec<Feature>)> {
        self.load_features(type_name, predicate.and_then(|p| p.referenced_ids()))
    }
}

impl Clone for SqliteStore {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

impl Store for SqliteStore {
    fn type_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare("SELECT name FROM feature_types ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn schema(&self, type_name: &str) -> Result<Option<Arc<FeatureType>>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        load_schema(&conn, type_name)
    }

    fn read(&self, type_name: &str, predicate: Option<&Predicate>) -> Result<BoxedReader> {
        let (schema, features) = self.candidates(type_name, predicate)?;
        let reader = WrapReader::new(schema, features);
        Ok(match predicate {
            Some(p) if *p != Predicate::Include => Box::new(FilterReader::new(reader, p.clone())),
            _ => Box::new(reader),
        })
    }

    fn count(&self, type_name: &str, predicate: Option<&Predicate>) -> Result<usize> {
        match predicate {
            None | Some(Predicate::Include) => {
                let conn = self.conn.lock().expect("database lock poisoned");
                if load_schema(&conn, type_name)?.is_none() {
                    anyhow::bail!("Feature type not found: {}", type_name);
                }
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM features WHERE type_name = ?",
                    [type_name],
                    |row| row.get(0),
                )?;
                Ok(n as usize)
            }
            Some(p) => {
                let (_, features) = self.candidates(type_name, Some(p))?;
                let mut n = 0;
                for f in &features {
                    if p.evaluate(f)? {
                        n += 1;
                    }
                }
                Ok(n)
            }
        }
    }

    fn add(&self, type_name: &str, feature: &Feature) -> Result<FeatureId> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let schema = load_schema(&conn, type_name)?
            .ok_or_else(|| anyhow::anyhow!("Feature type not found: {}", type_name))?;
        ensure_conforms(&schema, feature)?;

        let tx = conn.transaction()?;
        let next: i64 = tx.query_row(
            "SELECT next_id FROM feature_types WHERE name = ?",
            [type_name],
            |row| row.get(0),
        )?;
        let id = FeatureId::new(format!("{}.{}", type_name, next));
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO features (type_name, id, attributes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            (
                type_name,
                id.as_str(),
                serde_json::to_string(feature.values())?,
                &now,
                &now,
            ),
        )?;
        tx.execute(
            "UPDATE feature_types SET next_id = ? WHERE name = ?",
            (next + 1, type_name),
        )?;
        tx.commit()?;

        Ok(id)
    }

    fn remove_matching(&self, type_name: &str, predicate: &Predicate) -> Result<usize> {
        let (_, features) = self.candidates(type_name, Some(predicate))?;
        let mut doomed = Vec::new();
        for f in &features {
            if predicate.evaluate(f)? {
                doomed.push(f.id().clone());
            }
        }

        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        for id in &doomed {
            tx.execute(
                "DELETE FROM features WHERE type_name = ? AND id = ?",
                (type_name, id.as_str()),
            )?;
        }
        tx.commit()?;

        Ok(doomed.len())
    }

    fn update_matching(
        &self,
        type_name: &str,
        predicate: &Predicate,
        values: &[(String, Value)],
    ) -> Result<usize> {
        let (_, features) = self.candidates(type_name, Some(predicate))?;
        let mut rewritten = HashMap::new();
        for f in &features {
            if predicate.evaluate(f)? {
                rewritten.insert(f.id().clone(), f.with_values(values)?);
            }
        }

        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for (id, feature) in &rewritten {
            tx.execute(
                "UPDATE features SET attributes = ?, updated_at = ? WHERE type_name = ? AND id = ?",
                (
                    serde_json::to_string(feature.values())?,
                    &now,
                    type_name,
                    id.as_str(),
                ),
            )?;
        }
        tx.commit()?;

        Ok(rewritten.len())
    }
}

fn load_schema(conn: &Connection, type_name: &str) -> Result<Option<Arc<FeatureType>>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT schema FROM feature_types WHERE name = ?",
            [type_name],
            |row| row.get(0),
        )
        .optional()?;
    match json {
        Some(json) => {
            let schema: FeatureType = serde_json::from_str(&json)
                .with_context(|| format!("Corrupt schema for feature type {}", type_name))?;
            Ok(Some(Arc::new(schema)))
        }
        None => Ok(None),
    }
}
