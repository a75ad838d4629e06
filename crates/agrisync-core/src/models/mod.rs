//! Data models for AgriSync

mod ledger;
mod module;
mod pass;
mod payload;
mod record;
mod settings;

pub use ledger::{LedgerEntry, LedgerStatus};
pub use module::SyncModule;
pub use pass::PassStatus;
pub use payload::{
    Consultation, FarmRecord, FinancialInstitution, FinancialProduct, FinancingApplication,
    MarketListing, ModuleRecord, Notification, ReferenceItem, WeatherForecast,
};
pub use record::{ContentRecord, RecordQuery};
pub use settings::{DataUsage, Preference, SyncSettings};
