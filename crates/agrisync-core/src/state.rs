//! Shared cross-platform state types.

use serde::{Deserialize, Serialize};

use crate::models::PassStatus;

/// Unified sync state published to UI consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    #[default]
    Idle,
    Syncing,
    Synced,
    Partial,
    Error,
}

impl SyncState {
    /// State to show once a pass finished with `status`.
    pub const fn after_pass(status: PassStatus) -> Self {
        match status {
            PassStatus::Success => Self::Synced,
            PassStatus::Partial => Self::Partial,
            PassStatus::Failed => Self::Error,
        }
    }
}

/// App-wide status slice (offline banner, "last synced at" affordance).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub is_online: bool,
    pub state: SyncState,
    /// Completion time (Unix ms) of the most recent pass in which at least
    /// one module succeeded.
    pub last_sync_time: Option<i64>,
    pub last_outcome: Option<PassStatus>,
    /// A sync was requested while offline and will run on reconnect.
    pub pending_sync: bool,
}

impl SyncStatusSnapshot {
    /// Whether the UI should hint that cached data may be outdated.
    pub const fn may_be_outdated(&self) -> bool {
        matches!(
            self.last_outcome,
            Some(PassStatus::Partial | PassStatus::Failed)
        ) || !self.is_online
    }
}
