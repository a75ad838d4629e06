//! Preferences repository implementation

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::store::{LocalStore, Mutation, Query, Row};
use crate::error::Result;
use crate::models::Preference;

/// Key of the last device location the weather cache was fetched for.
pub const LAST_KNOWN_LOCATION_KEY: &str = "last_known_location";

/// Typed JSON values in the key/value preferences table.
pub struct Preferences<'a> {
    store: &'a dyn LocalStore,
}

impl<'a> Preferences<'a> {
    /// Create a new repository over the given store
    pub const fn new(store: &'a dyn LocalStore) -> Self {
        Self { store }
    }

    /// Raw JSON text stored under `key`.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let rows = self
            .store
            .query(&Query::Preference(key.to_string()))
            .await?;
        Ok(rows.into_iter().find_map(|row| match row {
            Row::Preference(preference) => Some(preference.value),
            _ => None,
        }))
    }

    /// Decode the value under `key`. An undecodable value reads as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                tracing::warn!("Ignoring undecodable preference {key}: {error}");
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.store
            .execute(&Mutation::PutPreference(Preference::new(key, encoded)))
            .await?;
        Ok(())
    }

    /// Remove `key`. Returns whether it was present.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let affected = self
            .store
            .execute(&Mutation::DeletePreference(key.to_string()))
            .await?;
        Ok(affected > 0)
    }
}
