//! Runtime configuration for the offline core.
//!
//! Provides a `CoreConfig` struct that the host app builds once (or parses
//! from a bundled JSON file) and hands to the offline service.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::SyncModule;
use crate::util::compact_text;

const DEFAULT_DB_FILE: &str = "agrisync.db";

/// Modules refreshed when the OS wakes the app in the background.
pub const BACKGROUND_MODULES: [SyncModule; 4] = [
    SyncModule::Notifications,
    SyncModule::WeatherCache,
    SyncModule::FarmRecords,
    SyncModule::Consultations,
];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl CoreConfig {
    /// Parse and validate a JSON config payload.
    pub fn from_json_str(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload).map_err(|error| {
            Error::Config(format!(
                "invalid config JSON: {}",
                compact_text(&error.to_string())
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.sync.validate()
    }

    /// Config with an in-memory store and default sync settings.
    pub fn ephemeral() -> Self {
        Self {
            store: StoreConfig {
                backend: StoreBackend::Ephemeral,
            },
            sync: SyncConfig::default(),
        }
    }

    /// Config with a persistent store at `path` and default sync settings.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig {
                backend: StoreBackend::Persistent { path: path.into() },
            },
            sync: SyncConfig::default(),
        }
    }
}

/// Which local store the composition root opens.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    /// `SQLite` file at `path`
    Persistent { path: PathBuf },
    /// In-memory store; nothing survives a restart
    Ephemeral,
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::Persistent {
            path: PathBuf::from(DEFAULT_DB_FILE),
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<()> {
        match &self.backend {
            StoreBackend::Persistent { path } if path.as_os_str().is_empty() => Err(
                Error::Config("store path must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Modules synced when a caller names none
    pub default_modules: Vec<SyncModule>,
    /// Reduced set for OS-initiated background passes
    pub background_modules: Vec<SyncModule>,
    /// Bound on one module's fetch plus reconcile
    pub module_timeout_secs: u64,
    /// Failures in a row before automatic passes start backing off a module
    pub max_consecutive_failures: u32,
    /// Modules of one pass running at the same time
    pub module_concurrency: usize,
    /// Ask the origin for compressed payloads
    pub request_compression: bool,
    /// Move the cursor forward when a fetched payload fails to reconcile
    pub advance_on_reconcile_failure: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_modules: SyncModule::ALL.to_vec(),
            background_modules: BACKGROUND_MODULES.to_vec(),
            module_timeout_secs: 30,
            max_consecutive_failures: 5,
            module_concurrency: 4,
            request_compression: true,
            advance_on_reconcile_failure: true,
        }
    }
}

impl SyncConfig {
    pub const fn module_timeout(&self) -> Duration {
        Duration::from_secs(self.module_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.module_timeout_secs == 0 {
            return Err(Error::Config(
                "module_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.module_concurrency == 0 {
            return Err(Error::Config(
                "module_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.default_modules.is_empty() {
            return Err(Error::Config("default_modules must not be empty".to_string()));
        }
        if self.background_modules.is_empty() {
            return Err(Error::Config(
                "background_modules must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
