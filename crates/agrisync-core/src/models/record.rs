//! Cached content record model

use serde::{Deserialize, Serialize};

use super::SyncModule;

/// One cached row in a module table.
///
/// `id` is assigned by the origin system and never regenerated locally, so a
/// resync of the same record replaces the row instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub module: SyncModule,
    pub id: String,
    /// Value of the module's facet column (location, category, status, ...)
    pub facet: Option<String>,
    /// Module-specific payload, opaque to the sync manager
    pub data: serde_json::Value,
    /// When this row was last written locally (Unix ms)
    pub last_updated: i64,
}

/// Predicate for reading cached rows of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub module: SyncModule,
    pub id: Option<String>,
    pub facet: Option<String>,
    /// Only rows written at or after this time (Unix ms)
    pub updated_since: Option<i64>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    /// Every row of `module`, newest first.
    pub const fn all(module: SyncModule) -> Self {
        Self {
            module,
            id: None,
            facet: None,
            updated_since: None,
            limit: None,
        }
    }

    /// The single row with origin id `id`.
    pub fn by_id(module: SyncModule, id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            limit: Some(1),
            ..Self::all(module)
        }
    }

    #[must_use]
    pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
        self.facet = Some(facet.into());
        self
    }

    #[must_use]
    pub const fn updated_since(mut self, since: i64) -> Self {
        self.updated_since = Some(since);
        self
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `record` satisfies this query (used by the in-memory store).
    pub fn matches(&self, record: &ContentRecord) -> bool {
        record.module == self.module
            && self.id.as_ref().map_or(true, |id| *id == record.id)
            && self
                .facet
                .as_ref()
                .map_or(true, |facet| record.facet.as_ref() == Some(facet))
            && self
                .updated_since
                .map_or(true, |since| record.last_updated >= since)
    }
}
