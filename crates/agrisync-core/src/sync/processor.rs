//! Module data processors
//!
//! A processor turns one module's fetched delta into upserts and deletes
//! against that module's table. Malformed records are skipped and counted;
//! a store failure aborts the module.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::error::Category;
use serde_json::Value;

use super::fetch::ModuleChanges;
use crate::db::{LocalStore, Records, UpsertKind};
use crate::error::{Error, Result};
use crate::models::{ModuleRecord, SyncModule};

/// A record that could not be parsed. Carries its position, never its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordError {
    pub index: usize,
    pub category: Category,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {} rejected ({:?})", self.index, self.category)
    }
}

impl std::error::Error for RecordError {}

/// Counts from one reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    pub rejected: Vec<RecordError>,
}

impl ReconcileStats {
    /// Rows written or removed.
    pub const fn applied(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    /// Some records were skipped, others applied.
    pub const fn is_partial(&self) -> bool {
        self.failed > 0 && self.applied() > 0
    }

    /// Every record in the payload was skipped.
    pub const fn all_failed(&self) -> bool {
        self.failed > 0 && self.applied() == 0
    }

    fn reject(&mut self, error: RecordError) {
        self.failed += 1;
        self.rejected.push(error);
    }
}

#[async_trait]
pub trait ModuleProcessor: Send + Sync {
    fn module(&self) -> SyncModule;

    /// Shape of the rows this processor writes. A change forces a full resync.
    fn schema_version(&self) -> u32 {
        1
    }

    fn parse(&self, raw: &Value) -> serde_json::Result<ModuleRecord> {
        ModuleRecord::parse(self.module(), raw)
    }

    /// Upsert `changes` into the module's table, stamping rows with `now`.
    async fn reconcile(
        &self,
        store: &dyn LocalStore,
        changes: &ModuleChanges,
        now: i64,
    ) -> Result<ReconcileStats> {
        let module = self.module();
        let records = Records::new(store);
        let mut stats = ReconcileStats::default();

        for (index, raw) in changes.records.iter().enumerate() {
            let parsed = match self.parse(raw) {
                Ok(parsed) => parsed,
                Err(error) => {
                    stats.reject(RecordError {
                        index,
                        category: error.classify(),
                    });
                    continue;
                }
            };
            let row = parsed.to_content_record(now).map_err(|error| {
                Error::write_failed(format!("encode {}", module.table()), &error)
            })?;
            match records.upsert(row).await? {
                UpsertKind::Inserted => stats.inserted += 1,
                UpsertKind::Updated => stats.updated += 1,
            }
        }

        for id in &changes.deleted_ids {
            if records.delete(module, id).await? {
                stats.deleted += 1;
            }
        }

        if stats.failed > 0 {
            tracing::debug!(
                "Skipped {} malformed {module} record(s) of {}",
                stats.failed,
                changes.records.len()
            );
        }
        Ok(stats)
    }
}

/// Processor that stores each module's typed record as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardProcessor {
    module: SyncModule,
    schema_version: u32,
}

impl StandardProcessor {
    pub const fn new(module: SyncModule) -> Self {
        Self {
            module,
            schema_version: 1,
        }
    }

    #[must_use]
    pub const fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }
}

#[async_trait]
impl ModuleProcessor for StandardProcessor {
    fn module(&self) -> SyncModule {
        self.module
    }

    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

/// Processor lookup by module.
#[derive(Clone)]
pub struct ProcessorRegistry {
    processors: BTreeMap<SyncModule, Arc<dyn ModuleProcessor>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ProcessorRegistry {
    pub fn empty() -> Self {
        Self {
            processors: BTreeMap::new(),
        }
    }

    /// A [`StandardProcessor`] for every module.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for module in SyncModule::ALL {
            registry.register(Arc::new(StandardProcessor::new(module)));
        }
        registry
    }

    /// Add or replace the processor for its module.
    pub fn register(&mut self, processor: Arc<dyn ModuleProcessor>) -> &mut Self {
        self.processors.insert(processor.module(), processor);
        self
    }

    pub fn get(&self, module: SyncModule) -> Option<Arc<dyn ModuleProcessor>> {
        self.processors.get(&module).cloned()
    }
}
