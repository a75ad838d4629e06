//! Sync ledger model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::SyncModule;
use crate::error::Error;

/// Status of a module's most recent sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerStatus {
    /// Never attempted
    #[default]
    Pending,
    InProgress,
    Success,
    Failed,
    /// Reconciled, but some records were skipped
    Partial,
}

impl LedgerStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            other => Err(Error::InvalidInput(format!("Unknown ledger status: {other}"))),
        }
    }
}

/// Persisted per-module record of the last sync outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub module: SyncModule,
    /// Cursor for "changes since" requests (Unix ms, 0 = full sync)
    pub last_sync_time: i64,
    pub sync_status: LedgerStatus,
    /// Row shape the module's processor wrote with
    pub schema_version: u32,
    pub consecutive_failures: u32,
    /// Start of the most recent attempt (Unix ms)
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
}

impl LedgerEntry {
    /// Fresh entry for a module that has never synced.
    pub const fn new(module: SyncModule) -> Self {
        Self {
            module,
            last_sync_time: 0,
            sync_status: LedgerStatus::Pending,
            schema_version: 0,
            consecutive_failures: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// Whether the stored rows were written by a different processor shape.
    pub const fn needs_full_resync(&self, processor_version: u32) -> bool {
        self.schema_version != processor_version
    }
}
