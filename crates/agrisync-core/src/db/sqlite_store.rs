//! `SQLite`-backed persistent store

use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Mutex;

use super::connection::Database;
use super::migrations;
use super::store::{LocalStore, Mutation, Query, Row, StoreKind};
use crate::error::{Error, Result};
use crate::models::{ContentRecord, LedgerEntry, Preference, RecordQuery, SyncModule};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Persistent store on a single `SQLite` file.
///
/// Statement work holds the connection mutex and runs in a blocking section on
/// a multi-thread runtime, so a busy file does not stall other tasks.
pub struct SqliteStore {
    location: Location,
    db: Mutex<Option<Database>>,
}

impl SqliteStore {
    /// Store backed by the file at `path`. Nothing is opened until `initialize`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            db: Mutex::new(None),
        }
    }

    /// `SQLite` in-memory database (tests; same SQL paths as the file store).
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            db: Mutex::new(None),
        }
    }

    /// Path of the backing file, if any.
    pub const fn path(&self) -> Option<&PathBuf> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    fn open_database(&self) -> Result<Database> {
        let opened = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|error| Error::StorageUnavailable(error.to_string()))?;
                }
                Database::open(path)
            }
            Location::Memory => Database::open_in_memory(),
        };
        opened.map_err(|error| Error::StorageUnavailable(error.to_string()))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
    {
        let guard = self.db.lock().await;
        let db = guard.as_ref().ok_or(Error::StoreClosed)?;
        blocking(|| f(db.connection()))
    }
}

/// Run statement work off the async scheduler where the runtime allows it.
///
/// `block_in_place` is unavailable on a current-thread runtime; there the
/// work runs inline.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Persistent
    }

    async fn initialize(&self) -> Result<()> {
        let mut guard = self.db.lock().await;
        if guard.is_none() {
            *guard = Some(blocking(|| self.open_database())?);
        }
        let db = guard.as_ref().ok_or(Error::StoreClosed)?;
        let version = blocking(|| migrations::run(db.connection()))?;
        tracing::debug!("Local store ready at schema version {version}");
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        self.with_conn(migrations::create_schema).await
    }

    async fn schema_version(&self) -> Result<u32> {
        self.with_conn(migrations::get_version).await
    }

    async fn apply_schema_migration(&self, from: u32, to: u32) -> Result<()> {
        self.with_conn(|conn| migrations::apply(conn, from, to)).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>> {
        self.with_conn(|conn| match query {
            Query::Records(records) => Ok(select_records(conn, records)?
                .into_iter()
                .map(Row::Record)
                .collect()),
            Query::Ledger(module) => Ok(select_ledger(conn, *module)?
                .into_iter()
                .map(Row::Ledger)
                .collect()),
            Query::Preference(key) => Ok(select_preference(conn, key)?
                .into_iter()
                .map(Row::Preference)
                .collect()),
        })
        .await
    }

    async fn execute(&self, mutation: &Mutation) -> Result<u64> {
        self.with_conn(|conn| {
            let affected = apply_mutation(conn, mutation)
                .map_err(|error| Error::write_failed(mutation.describe(), &error))?;
            Ok(affected as u64)
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.db.lock().await;
        if let Some(db) = guard.take() {
            blocking(|| db.close())?;
            tracing::debug!("Local store closed");
        }
        Ok(())
    }
}

fn select_records(conn: &Connection, query: &RecordQuery) -> Result<Vec<ContentRecord>> {
    let table = query.module.table();
    let facet = query.module.facet_column();

    let mut sql = format!("SELECT id, {facet}, data, last_updated FROM {table} WHERE 1 = 1");
    let mut values: Vec<SqlValue> = Vec::new();
    if let Some(id) = &query.id {
        sql.push_str(" AND id = ?");
        values.push(SqlValue::Text(id.clone()));
    }
    if let Some(facet_value) = &query.facet {
        sql.push_str(&format!(" AND {facet} = ?"));
        values.push(SqlValue::Text(facet_value.clone()));
    }
    if let Some(since) = query.updated_since {
        sql.push_str(" AND last_updated >= ?");
        values.push(SqlValue::Integer(since));
    }
    sql.push_str(" ORDER BY last_updated DESC, id ASC");
    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        values.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }

    let mut stmt = conn.prepare(&sql)?;
    let raw_rows = stmt
        .query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    raw_rows
        .into_iter()
        .map(|(id, facet, data, last_updated)| {
            Ok(ContentRecord {
                module: query.module,
                id,
                facet,
                data: serde_json::from_str(&data)?,
                last_updated,
            })
        })
        .collect()
}

fn select_ledger(conn: &Connection, module: Option<SyncModule>) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(
        "SELECT module, last_sync_time, sync_status, schema_version,
                consecutive_failures, last_attempt_at, last_error
         FROM sync_ledger
         WHERE ?1 IS NULL OR module = ?1
         ORDER BY module",
    )?;
    let raw_rows = stmt
        .query_map(params![module.map(SyncModule::as_str)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut entries = Vec::with_capacity(raw_rows.len());
    for (name, last_sync_time, status, schema_version, failures, attempt, error) in raw_rows {
        let Ok(module) = name.parse::<SyncModule>() else {
            tracing::debug!("Ignoring ledger row for unknown module {name}");
            continue;
        };
        entries.push(LedgerEntry {
            module,
            last_sync_time,
            sync_status: status.parse()?,
            schema_version,
            consecutive_failures: failures,
            last_attempt_at: attempt,
            last_error: error,
        });
    }
    Ok(entries)
}

fn select_preference(conn: &Connection, key: &str) -> Result<Option<Preference>> {
    let mut stmt = conn.prepare("SELECT key, value FROM preferences WHERE key = ?1")?;
    let mut rows = stmt.query_map(params![key], |row| {
        Ok(Preference {
            key: row.get(0)?,
            value: row.get(1)?,
        })
    })?;
    Ok(rows.next().transpose()?)
}

fn apply_mutation(conn: &Connection, mutation: &Mutation) -> Result<usize> {
    let affected = match mutation {
        Mutation::UpsertRecord(record) => {
            let sql = format!(
                "INSERT OR REPLACE INTO {table} (id, {facet}, data, last_updated)
                 VALUES (?1, ?2, ?3, ?4)",
                table = record.module.table(),
                facet = record.module.facet_column(),
            );
            conn.execute(
                &sql,
                params![
                    record.id,
                    record.facet,
                    serde_json::to_string(&record.data)?,
                    record.last_updated
                ],
            )?
        }
        Mutation::DeleteRecord { module, id } => conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", module.table()),
            params![id],
        )?,
        Mutation::ClearModule(module) => {
            conn.execute(&format!("DELETE FROM {}", module.table()), [])?
        }
        Mutation::PruneRecords { module, before } => conn.execute(
            &format!("DELETE FROM {} WHERE last_updated < ?1", module.table()),
            params![before],
        )?,
        Mutation::PutLedger(entry) => conn.execute(
            "INSERT OR REPLACE INTO sync_ledger (
                module, last_sync_time, sync_status, schema_version,
                consecutive_failures, last_attempt_at, last_error
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.module.as_str(),
                entry.last_sync_time,
                entry.sync_status.as_str(),
                entry.schema_version,
                entry.consecutive_failures,
                entry.last_attempt_at,
                entry.last_error
            ],
        )?,
        Mutation::PutPreference(preference) => conn.execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![preference.key, preference.value],
        )?,
        Mutation::DeletePreference(key) => {
            conn.execute("DELETE FROM preferences WHERE key = ?1", params![key])?
        }
    };
    Ok(affected)
}
