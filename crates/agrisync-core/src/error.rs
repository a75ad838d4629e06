//! Error types for agrisync-core

use thiserror::Error;

use crate::models::SyncModule;

/// Result type alias using agrisync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in agrisync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persistent store cannot be opened on this platform
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The on-disk schema was written by a newer build
    #[error("Incompatible schema: stored version {stored} is newer than {supported}")]
    IncompatibleSchema { stored: u32, supported: u32 },

    /// A single write failed. Carries the operation, never the row contents.
    #[error("Storage write failed during {operation}: {reason}")]
    StorageWriteFailed { operation: String, reason: String },

    /// A module's fetch or reconcile failed
    #[error("Sync failed for module {module}: {reason}")]
    ModuleSyncFailed { module: SyncModule, reason: String },

    /// The store was used after `close()`
    #[error("Store is closed")]
    StoreClosed,
}

impl Error {
    /// Wrap a low-level failure as a `StorageWriteFailed` for `operation`.
    pub fn write_failed(operation: impl Into<String>, source: &impl std::fmt::Display) -> Self {
        Self::StorageWriteFailed {
            operation: operation.into(),
            reason: crate::util::compact_text(&source.to_string()),
        }
    }

    /// Whether the error means "the file on disk is not a usable database".
    pub fn is_corrupted_database(&self) -> bool {
        let message = self.to_string().to_ascii_lowercase();
        message.contains("file is not a database")
            || message.contains("database disk image is malformed")
    }
}
