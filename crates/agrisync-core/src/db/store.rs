//! Local store abstraction
//!
//! The sync core only talks to [`LocalStore`]. Two implementations exist:
//! [`super::SqliteStore`] persists to a file, [`super::MemoryStore`] keeps
//! everything in process memory and loses it on restart. The composition root
//! picks one; the orchestrator never knows which.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ContentRecord, LedgerEntry, Preference, RecordQuery, SyncModule};

/// Which flavour of store is backing the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Survives process restarts
    Persistent,
    /// In-memory fallback; every write is lost on restart
    Ephemeral,
}

/// A read against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Records(RecordQuery),
    /// One module's ledger row, or every row when `None`
    Ledger(Option<SyncModule>),
    Preference(String),
}

/// A row returned by [`LocalStore::query`].
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Record(ContentRecord),
    Ledger(LedgerEntry),
    Preference(Preference),
}

/// A write against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert or replace keyed on `(module, id)`
    UpsertRecord(ContentRecord),
    DeleteRecord { module: SyncModule, id: String },
    ClearModule(SyncModule),
    /// Remove a module's rows last written before `before`
    PruneRecords { module: SyncModule, before: i64 },
    /// Insert or replace keyed on the module
    PutLedger(LedgerEntry),
    PutPreference(Preference),
    DeletePreference(String),
}

impl Mutation {
    /// Short label for logs and errors. Never includes row contents.
    pub fn describe(&self) -> String {
        match self {
            Self::UpsertRecord(record) => format!("upsert {}", record.module.table()),
            Self::DeleteRecord { module, .. } => format!("delete {}", module.table()),
            Self::ClearModule(module) => format!("clear {}", module.table()),
            Self::PruneRecords { module, .. } => format!("prune {}", module.table()),
            Self::PutLedger(entry) => format!("ledger write {}", entry.module),
            Self::PutPreference(_) => "preference write".to_string(),
            Self::DeletePreference(_) => "preference delete".to_string(),
        }
    }
}

/// Durable (or deliberately ephemeral) storage for the offline cache.
#[async_trait]
pub trait LocalStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Open the store, create the schema and run pending migrations.
    async fn initialize(&self) -> Result<()>;

    /// Ensure every fixed table exists. Idempotent.
    async fn create_schema(&self) -> Result<()>;

    async fn schema_version(&self) -> Result<u32>;

    /// Apply migration steps `from + 1 ..= to`.
    async fn apply_schema_migration(&self, from: u32, to: u32) -> Result<()>;

    /// Read rows. Zero matches is an empty list, never an error.
    async fn query(&self, query: &Query) -> Result<Vec<Row>>;

    /// Apply one mutation and return the number of rows affected.
    ///
    /// Failures surface as `StorageWriteFailed` and leave other rows intact.
    async fn execute(&self, mutation: &Mutation) -> Result<u64>;

    /// Release resources. Idempotent.
    async fn close(&self) -> Result<()>;
}
