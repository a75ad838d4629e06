//! Local store for the offline cache

mod connection;
mod ledger_repository;
mod memory_store;
mod migrations;
mod preferences_repository;
mod record_repository;
mod sqlite_store;
mod store;

pub use connection::Database;
pub use ledger_repository::Ledger;
pub use memory_store::MemoryStore;
pub use migrations::CURRENT_SCHEMA_VERSION;
pub use preferences_repository::{Preferences, LAST_KNOWN_LOCATION_KEY};
pub use record_repository::{Records, UpsertKind};
pub use sqlite_store::SqliteStore;
pub use store::{LocalStore, Mutation, Query, Row, StoreKind};
