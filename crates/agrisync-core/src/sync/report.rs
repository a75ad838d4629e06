//! Sync requests and results

use serde::Serialize;

use super::processor::ReconcileStats;
use crate::models::{PassStatus, SyncModule};

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Explicit caller request
    #[default]
    Manual,
    /// Offline to online
    Reconnect,
    /// Better connection class
    Upgrade,
    /// Interval timer
    Periodic,
    /// OS background task
    Background,
}

impl SyncTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Reconnect => "reconnect",
            Self::Upgrade => "upgrade",
            Self::Periodic => "periodic",
            Self::Background => "background",
        }
    }

    /// Automatic passes respect per-module backoff; manual ones never do.
    pub const fn is_automatic(self) -> bool {
        !matches!(self, Self::Manual)
    }
}

/// Arguments to `sync_data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Modules to sync; `None` means the configured defaults
    pub modules: Option<Vec<SyncModule>>,
    pub trigger: SyncTrigger,
}

impl SyncOptions {
    pub fn modules(modules: impl IntoIterator<Item = SyncModule>) -> Self {
        Self {
            modules: Some(modules.into_iter().collect()),
            trigger: SyncTrigger::Manual,
        }
    }

    pub const fn triggered(trigger: SyncTrigger) -> Self {
        Self {
            modules: None,
            trigger,
        }
    }

    #[must_use]
    pub const fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = trigger;
        self
    }
}

/// How one module ended within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleOutcome {
    Success,
    /// Reconciled with some records skipped
    Partial,
    Failed,
    TimedOut,
    /// Backed off after repeated failures; ledger untouched
    Skipped,
}

impl ModuleOutcome {
    /// Counts as a success when aggregating the pass. A `Partial` module still
    /// marks the pass `Partial`.
    pub const fn succeeded(self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReport {
    pub module: SyncModule,
    pub outcome: ModuleOutcome,
    pub stats: ReconcileStats,
    /// Cursor the fetch was scoped to
    pub since: i64,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ModuleReport {
    pub(crate) fn new(module: SyncModule, outcome: ModuleOutcome) -> Self {
        Self {
            module,
            outcome,
            stats: ReconcileStats::default(),
            since: 0,
            error: None,
            duration_ms: 0,
        }
    }
}

/// Result of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub pass_id: String,
    pub trigger: SyncTrigger,
    pub status: PassStatus,
    pub modules: Vec<ModuleReport>,
    pub started_at: i64,
    pub finished_at: i64,
    /// Pass run right after this one for modules queued meanwhile
    pub follow_up: Option<Box<SyncReport>>,
}

impl SyncReport {
    pub fn module(&self, module: SyncModule) -> Option<&ModuleReport> {
        self.modules.iter().find(|report| report.module == module)
    }

    /// Rows written or removed across this pass and its follow-up.
    pub fn rows_applied(&self) -> usize {
        self.modules
            .iter()
            .map(|report| report.stats.applied())
            .sum::<usize>()
            + self.follow_up.as_ref().map_or(0, |report| report.rows_applied())
    }
}

/// What `sync_data` did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A pass ran for this request
    Completed(SyncReport),
    /// Another pass was in flight; these modules were queued behind it
    Queued(Vec<SyncModule>),
    /// Offline; the request will be honoured on reconnect
    NoConnection,
}

impl SyncOutcome {
    /// `success` flag for the UI: the request ran with at least one module
    /// succeeding, or was accepted into the running pass.
    pub const fn success(&self) -> bool {
        match self {
            Self::Completed(report) => !matches!(report.status, PassStatus::Failed),
            Self::Queued(_) => true,
            Self::NoConnection => false,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Completed(report) => match report.status {
                PassStatus::Success => "Sync completed".to_string(),
                PassStatus::Partial => {
                    let failed = report
                        .modules
                        .iter()
                        .filter(|module| module.outcome != ModuleOutcome::Success)
                        .count();
                    format!("Sync partially completed; {failed} module(s) may be outdated")
                }
                PassStatus::Failed => "Sync failed; showing cached data".to_string(),
            },
            Self::Queued(_) => "Sync already in progress".to_string(),
            Self::NoConnection => "No internet connection".to_string(),
        }
    }

    pub const fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Answer for a host OS background-fetch callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundFetchResult {
    NewData,
    NoData,
    Failed,
}

impl From<&SyncOutcome> for BackgroundFetchResult {
    fn from(outcome: &SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Completed(report) if report.status == PassStatus::Failed => Self::Failed,
            SyncOutcome::Completed(report) if report.rows_applied() > 0 => Self::NewData,
            _ => Self::NoData,
        }
    }
}
