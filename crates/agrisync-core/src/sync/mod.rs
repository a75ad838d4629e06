//! Sync orchestration: the manager, its collaborators and per-module processors

mod fetch;
mod manager;
mod policy;
mod processor;
mod report;
mod settings;

#[cfg(test)]
mod tests;

pub use fetch::{FetchError, FetchErrorKind, FetchOptions, ModuleChanges, RemoteFetch};
pub use manager::SyncManager;
pub use policy::{backoff_delay, fetch_options, is_backed_off};
pub use processor::{
    ModuleProcessor, ProcessorRegistry, ReconcileStats, RecordError, StandardProcessor,
};
pub use report::{
    BackgroundFetchResult, ModuleOutcome, ModuleReport, SyncOptions, SyncOutcome, SyncReport,
    SyncTrigger,
};
pub use settings::{SettingsProvider, SharedSettings};
