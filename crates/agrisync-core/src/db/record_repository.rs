//! Cached content repository

use super::store::{LocalStore, Mutation, Query, Row};
use crate::error::Result;
use crate::models::{ContentRecord, RecordQuery, SyncModule};

/// Whether an upsert created a row or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    Updated,
}

/// Typed access to the per-module content tables.
pub struct Records<'a> {
    store: &'a dyn LocalStore,
}

impl<'a> Records<'a> {
    /// Create a new repository over the given store
    pub const fn new(store: &'a dyn LocalStore) -> Self {
        Self { store }
    }

    pub async fn query(&self, query: RecordQuery) -> Result<Vec<ContentRecord>> {
        let rows = self.store.query(&Query::Records(query)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Row::Record(record) => Some(record),
                _ => None,
            })
            .collect())
    }

    pub async fn get(&self, module: SyncModule, id: &str) -> Result<Option<ContentRecord>> {
        Ok(self
            .query(RecordQuery::by_id(module, id))
            .await?
            .into_iter()
            .next())
    }

    /// Rows of `module`, newest first.
    pub async fn list(&self, module: SyncModule, limit: usize) -> Result<Vec<ContentRecord>> {
        self.query(RecordQuery::all(module).with_limit(limit)).await
    }

    /// Rows of `module` whose facet column equals `facet`, newest first.
    pub async fn list_by_facet(
        &self,
        module: SyncModule,
        facet: &str,
        limit: usize,
    ) -> Result<Vec<ContentRecord>> {
        self.query(RecordQuery::all(module).with_facet(facet).with_limit(limit))
            .await
    }

    /// Rows of `module` written at or after `since` (Unix ms).
    pub async fn updated_since(
        &self,
        module: SyncModule,
        since: i64,
    ) -> Result<Vec<ContentRecord>> {
        self.query(RecordQuery::all(module).updated_since(since)).await
    }

    pub async fn count(&self, module: SyncModule) -> Result<usize> {
        Ok(self.query(RecordQuery::all(module)).await?.len())
    }

    /// Whether the newest cached row of `module` is younger than `max_age_ms`.
    pub async fn is_fresh(&self, module: SyncModule, max_age_ms: i64, now: i64) -> Result<bool> {
        let newest = self.list(module, 1).await?;
        Ok(newest
            .first()
            .is_some_and(|record| now.saturating_sub(record.last_updated) <= max_age_ms))
    }

    /// Insert or replace `record`, reporting which of the two happened.
    pub async fn upsert(&self, record: ContentRecord) -> Result<UpsertKind> {
        let existed = self.get(record.module, &record.id).await?.is_some();
        self.store.execute(&Mutation::UpsertRecord(record)).await?;
        Ok(if existed {
            UpsertKind::Updated
        } else {
            UpsertKind::Inserted
        })
    }

    /// Delete one row. Returns whether it existed.
    pub async fn delete(&self, module: SyncModule, id: &str) -> Result<bool> {
        let affected = self
            .store
            .execute(&Mutation::DeleteRecord {
                module,
                id: id.to_string(),
            })
            .await?;
        Ok(affected > 0)
    }

    /// Remove every row of `module`.
    pub async fn clear(&self, module: SyncModule) -> Result<u64> {
        self.store.execute(&Mutation::ClearModule(module)).await
    }

    /// Remove rows of `module` not rewritten since `before`.
    pub async fn prune_older_than(&self, module: SyncModule, before: i64) -> Result<u64> {
        self.store
            .execute(&Mutation::PruneRecords { module, before })
            .await
    }
}
