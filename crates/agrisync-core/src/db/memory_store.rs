//! Ephemeral in-memory store
//!
//! Used when no persistent store can be opened on the platform. Every write
//! succeeds into process memory and is lost when the process exits, so the app
//! behaves as a fresh install on every launch.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::migrations::CURRENT_SCHEMA_VERSION;
use super::store::{LocalStore, Mutation, Query, Row, StoreKind};
use crate::error::{Error, Result};
use crate::models::{ContentRecord, LedgerEntry, SyncModule};

#[derive(Default)]
struct Tables {
    open: bool,
    records: HashMap<SyncModule, BTreeMap<String, ContentRecord>>,
    ledger: BTreeMap<SyncModule, LedgerEntry>,
    preferences: BTreeMap<String, String>,
}

/// Non-persistent [`LocalStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Database("memory store lock poisoned".to_string()))
    }

    fn open_tables(&self) -> Result<MutexGuard<'_, Tables>> {
        let tables = self.tables()?;
        if tables.open {
            Ok(tables)
        } else {
            Err(Error::StoreClosed)
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Ephemeral
    }

    async fn initialize(&self) -> Result<()> {
        let mut tables = self.tables()?;
        if !tables.open {
            tables.open = true;
            tracing::warn!("Using in-memory store; offline data will not survive a restart");
        }
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        self.open_tables().map(drop)
    }

    async fn schema_version(&self) -> Result<u32> {
        self.open_tables()?;
        Ok(CURRENT_SCHEMA_VERSION)
    }

    async fn apply_schema_migration(&self, from: u32, to: u32) -> Result<()> {
        self.open_tables()?;
        tracing::debug!("In-memory store has no stored shape to migrate ({from} -> {to})");
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>> {
        let tables = self.open_tables()?;
        let rows = match query {
            Query::Records(records) => {
                let mut matched = tables
                    .records
                    .get(&records.module)
                    .into_iter()
                    .flat_map(BTreeMap::values)
                    .filter(|record| records.matches(record))
                    .cloned()
                    .collect::<Vec<_>>();
                matched.sort_by(|a, b| {
                    b.last_updated
                        .cmp(&a.last_updated)
                        .then_with(|| a.id.cmp(&b.id))
                });
                if let Some(limit) = records.limit {
                    matched.truncate(limit);
                }
                matched.into_iter().map(Row::Record).collect()
            }
            Query::Ledger(module) => tables
                .ledger
                .values()
                .filter(|entry| module.map_or(true, |module| entry.module == module))
                .cloned()
                .map(Row::Ledger)
                .collect(),
            Query::Preference(key) => tables
                .preferences
                .get(key)
                .map(|value| Row::Preference(crate::models::Preference::new(key, value)))
                .into_iter()
                .collect(),
        };
        Ok(rows)
    }

    async fn execute(&self, mutation: &Mutation) -> Result<u64> {
        let mut tables = self.open_tables()?;
        let affected = match mutation {
            Mutation::UpsertRecord(record) => {
                tables
                    .records
                    .entry(record.module)
                    .or_default()
                    .insert(record.id.clone(), record.clone());
                1
            }
            Mutation::DeleteRecord { module, id } => tables
                .records
                .get_mut(module)
                .and_then(|rows| rows.remove(id))
                .map_or(0, |_| 1),
            Mutation::ClearModule(module) => tables
                .records
                .remove(module)
                .map_or(0, |rows| rows.len() as u64),
            Mutation::PruneRecords { module, before } => {
                let Some(rows) = tables.records.get_mut(module) else {
                    return Ok(0);
                };
                let len = rows.len();
                rows.retain(|_, record| record.last_updated >= *before);
                (len - rows.len()) as u64
            }
            Mutation::PutLedger(entry) => {
                tables.ledger.insert(entry.module, entry.clone());
                1
            }
            Mutation::PutPreference(preference) => {
                tables
                    .preferences
                    .insert(preference.key.clone(), preference.value.clone());
                1
            }
            Mutation::DeletePreference(key) => {
                u64::from(tables.preferences.remove(key).is_some())
            }
        };
        Ok(affected)
    }

    async fn close(&self) -> Result<()> {
        let mut tables = self.tables()?;
        *tables = Tables::default();
        Ok(())
    }
}
