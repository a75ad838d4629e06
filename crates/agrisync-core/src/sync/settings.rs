//! Host settings access

use std::sync::{Arc, RwLock};

use crate::models::SyncSettings;

/// Read-only view of the user's sync settings.
pub trait SettingsProvider: Send + Sync {
    fn sync_settings(&self) -> SyncSettings;
}

/// Settings held in memory and updated by the host when the user changes them.
#[derive(Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<SyncSettings>>,
}

impl SharedSettings {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn update(&self, settings: SyncSettings) {
        match self.inner.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }
}

impl SettingsProvider for SharedSettings {
    fn sync_settings(&self) -> SyncSettings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
