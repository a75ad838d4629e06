//! Host-provided sync settings and persisted preferences

use serde::{Deserialize, Serialize};

/// How much mobile data the user is willing to spend on sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataUsage {
    /// Ask the origin for reduced payloads
    Low,
    #[default]
    Normal,
}

/// Settings the sync core reads but never persists or validates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    pub auto_sync_enabled: bool,
    pub sync_interval_minutes: u32,
    pub data_usage: DataUsage,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync_enabled: true,
            sync_interval_minutes: 30,
            data_usage: DataUsage::Normal,
        }
    }
}

/// A row of the key/value preferences table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub key: String,
    /// JSON-encoded value
    pub value: String,
}

impl Preference {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = SyncSettings::default();
        assert!(settings.auto_sync_enabled);
        assert_eq!(settings.sync_interval_minutes, 30);
        assert_eq!(settings.data_usage, DataUsage::Normal);
    }

    #[test]
    fn settings_use_camel_case() {
        let settings: SyncSettings = serde_json::from_str(
            r#"{"autoSyncEnabled":false,"syncIntervalMinutes":15,"dataUsage":"low"}"#,
        )
        .unwrap();
        assert!(!settings.auto_sync_enabled);
        assert_eq!(settings.data_usage, DataUsage::Low);
    }
}
