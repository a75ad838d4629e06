//! agrisync-core - Offline sync core for AgriSync
//!
//! This crate contains the local store, sync ledger, network observer and
//! sync orchestration used by the AgriSync mobile app. Host apps build one
//! [`OfflineService`] at startup and drive it from platform callbacks.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod network;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::CoreConfig;
pub use error::{Error, Result};
pub use models::SyncModule;
pub use services::OfflineService;
pub use state::{SyncState, SyncStatusSnapshot};
pub use sync::{SyncManager, SyncOptions, SyncOutcome};
