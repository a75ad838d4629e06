//! Services shared by host apps.

mod offline;

pub use offline::OfflineService;
