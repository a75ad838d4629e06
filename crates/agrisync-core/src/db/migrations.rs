//! Database schema and migrations

use crate::error::{Error, Result};
use crate::models::SyncModule;
use rusqlite::{params, Connection, OptionalExtension};

/// Schema version this build reads and writes
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Bring the schema up to [`CURRENT_SCHEMA_VERSION`].
///
/// Fails with [`Error::IncompatibleSchema`] when the file was written by a
/// newer build; nothing is touched in that case.
pub fn run(conn: &Connection) -> Result<u32> {
    let stored = get_version(conn)?;
    if stored > CURRENT_SCHEMA_VERSION {
        return Err(Error::IncompatibleSchema {
            stored,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    create_schema(conn)?;
    if stored < CURRENT_SCHEMA_VERSION {
        apply(conn, stored.max(1), CURRENT_SCHEMA_VERSION)?;
    }
    Ok(CURRENT_SCHEMA_VERSION)
}

/// Get the stored schema version (0 for a fresh file)
pub fn get_version(conn: &Connection) -> Result<u32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }

    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Ensure the version-1 tables exist. Safe to call on every startup.
pub fn create_schema(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS preferences (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS sync_ledger (
            module TEXT PRIMARY KEY,
            last_sync_time INTEGER NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            schema_version INTEGER NOT NULL DEFAULT 0
        );",
    )?;

    for module in SyncModule::ALL {
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                last_updated INTEGER NOT NULL
            );",
            table = module.table()
        ))?;
    }

    tx.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (1)", [])?;
    tx.commit()?;
    Ok(())
}

/// Apply migration steps `from + 1 ..= to` in order.
pub fn apply(conn: &Connection, from: u32, to: u32) -> Result<()> {
    if to > CURRENT_SCHEMA_VERSION {
        return Err(Error::InvalidInput(format!(
            "Cannot migrate to unknown schema version {to}"
        )));
    }

    for step in (from + 1)..=to {
        match step {
            1 => create_schema(conn)?,
            2 => migrate_v2(conn)?,
            3 => migrate_v3(conn)?,
            other => {
                return Err(Error::InvalidInput(format!(
                    "No migration step for schema version {other}"
                )))
            }
        }
        tracing::info!("Migrated database to version {step}");
    }
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let found = conn
        .query_row(
            &format!("SELECT 1 FROM pragma_table_info('{table}') WHERE name = ?1"),
            params![column],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Migration to version 2: per-module facet column and freshness indexes
fn migrate_v2(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    for module in SyncModule::ALL {
        let table = module.table();
        let facet = module.facet_column();
        if !column_exists(&tx, table, facet)? {
            tx.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {facet} TEXT;"))?;
        }
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{facet} ON {table}({facet});
             CREATE INDEX IF NOT EXISTS idx_{table}_updated ON {table}(last_updated DESC);"
        ))?;
    }

    tx.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (2)", [])?;
    tx.commit()?;
    Ok(())
}

/// Migration to version 3: failure bookkeeping on the sync ledger
fn migrate_v3(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    let columns = [
        ("consecutive_failures", "INTEGER NOT NULL DEFAULT 0"),
        ("last_attempt_at", "INTEGER"),
        ("last_error", "TEXT"),
    ];
    for (column, definition) in columns {
        if !column_exists(&tx, "sync_ledger", column)? {
            tx.execute_batch(&format!(
                "ALTER TABLE sync_ledger ADD COLUMN {column} {definition};"
            ))?;
        }
    }

    tx.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (3)", [])?;
    tx.commit()?;
    Ok(())
}
