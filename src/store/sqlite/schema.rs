//! Versioned schema of the feature store.
//!
//! Each migration runs in its own transaction together with the ledger row
//! recording it, so a database is always at exactly one known version.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial",
    sql: include_str!("migrations/001_initial.sql"),
}];

const LEDGER: &str = "CREATE TABLE IF NOT EXISTS feature_store_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

/// Bring the store up to the latest version. Returns how many migrations ran.
pub fn run_migrations(conn: &mut Connection) -> Result<usize> {
    conn.execute_batch(LEDGER)
        .context("Failed to create migration ledger")?;

    let current = schema_version(conn)?;
    if current == 0 && has_table(conn, "features")? {
        anyhow::bail!("Database holds a features table that this store did not create");
    }

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql).with_context(|| {
            format!("Failed to apply migration {} ({})", migration.version, migration.name)
        })?;
        tx.execute(
            "INSERT INTO feature_store_migrations (version, name, applied_at) VALUES (?, ?, ?)",
            (migration.version, migration.name, Utc::now().to_rfc3339()),
        )?;
        tx.commit()?;
        tracing::info!("Feature store migrated to version {} ({})", migration.version, migration.name);
        applied += 1;
    }
    Ok(applied)
}

/// Highest applied migration, or 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM feature_store_migrations", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn has_table(conn: &Connection, name: &str) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [name],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_latest_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&mut conn).unwrap(), MIGRATIONS.len());
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.last().unwrap().version);
        assert!(has_table(&conn, "feature_types").unwrap());
        assert!(has_table(&conn, "features").unwrap());
    }

    #[test]
    fn rerunning_applies_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(run_migrations(&mut conn).unwrap(), 0);
    }

    #[test]
    fn refuses_foreign_features_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE features (id TEXT)").unwrap();
        assert!(run_migrations(&mut conn).is_err());
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }
}
