//! Sync ledger repository

use super::store::{LocalStore, Mutation, Query, Row};
use crate::error::Result;
use crate::models::{LedgerEntry, LedgerStatus, SyncModule};

/// Typed access to the `sync_ledger` table.
pub struct Ledger<'a> {
    store: &'a dyn LocalStore,
}

impl<'a> Ledger<'a> {
    /// Create a new repository over the given store
    pub const fn new(store: &'a dyn LocalStore) -> Self {
        Self { store }
    }

    /// Entry for `module`, if one was ever written.
    pub async fn get(&self, module: SyncModule) -> Result<Option<LedgerEntry>> {
        let rows = self.store.query(&Query::Ledger(Some(module))).await?;
        Ok(rows.into_iter().find_map(|row| match row {
            Row::Ledger(entry) if entry.module == module => Some(entry),
            _ => None,
        }))
    }

    /// Entry for `module`, or a fresh pending entry (full sync from epoch 0).
    pub async fn get_or_default(&self, module: SyncModule) -> Result<LedgerEntry> {
        Ok(self
            .get(module)
            .await?
            .unwrap_or_else(|| LedgerEntry::new(module)))
    }

    /// Every ledger row, ordered by module name.
    pub async fn all(&self) -> Result<Vec<LedgerEntry>> {
        let rows = self.store.query(&Query::Ledger(None)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Row::Ledger(entry) => Some(entry),
                _ => None,
            })
            .collect())
    }

    pub async fn put(&self, entry: &LedgerEntry) -> Result<()> {
        self.store
            .execute(&Mutation::PutLedger(entry.clone()))
            .await?;
        Ok(())
    }

    /// Insert a pending row for every module that has none. Returns how many
    /// rows were created.
    pub async fn ensure(&self, modules: &[SyncModule]) -> Result<usize> {
        let existing = self.all().await?;
        let mut created = 0;
        for module in modules {
            if existing.iter().all(|entry| entry.module != *module) {
                self.put(&LedgerEntry::new(*module)).await?;
                created += 1;
            }
        }
        Ok(created)
    }

    /// Rewrite rows left `in-progress` by an interrupted process to `failed`.
    pub async fn recover_interrupted(&self) -> Result<Vec<SyncModule>> {
        let mut recovered = Vec::new();
        for mut entry in self.all().await? {
            if entry.sync_status == LedgerStatus::InProgress {
                entry.sync_status = LedgerStatus::Failed;
                entry.last_error = Some("interrupted".to_string());
                self.put(&entry).await?;
                recovered.push(entry.module);
            }
        }
        Ok(recovered)
    }

    /// Newest `last_sync_time` across modules that completed successfully.
    pub async fn last_successful_sync(&self) -> Result<Option<i64>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|entry| {
                matches!(
                    entry.sync_status,
                    LedgerStatus::Success | LedgerStatus::Partial
                )
            })
            .map(|entry| entry.last_sync_time)
            .max())
    }
}
