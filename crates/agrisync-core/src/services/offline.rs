//! Offline service: the composition root for the sync core.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{CoreConfig, StoreBackend, StoreConfig};
use crate::db::{LocalStore, MemoryStore, SqliteStore, StoreKind};
use crate::error::{Error, Result};
use crate::network::NetworkObserver;
use crate::state::SyncStatusSnapshot;
use crate::sync::{
    BackgroundFetchResult, ProcessorRegistry, RemoteFetch, SettingsProvider, SyncManager,
    SyncOptions, SyncOutcome,
};

/// One per process. Owns the store and the sync manager.
#[derive(Clone)]
pub struct OfflineService {
    manager: SyncManager,
    store_kind: StoreKind,
}

impl OfflineService {
    /// Open the configured store, wire the manager and start it.
    ///
    /// A persistent store that cannot be opened falls back to an in-memory
    /// one. A store written by a newer build is an error.
    pub async fn initialize(
        config: CoreConfig,
        fetcher: Arc<dyn RemoteFetch>,
        network: NetworkObserver,
        settings: Arc<dyn SettingsProvider>,
    ) -> Result<Self> {
        Self::initialize_with_processors(
            config,
            fetcher,
            network,
            settings,
            ProcessorRegistry::standard(),
        )
        .await
    }

    pub async fn initialize_with_processors(
        config: CoreConfig,
        fetcher: Arc<dyn RemoteFetch>,
        network: NetworkObserver,
        settings: Arc<dyn SettingsProvider>,
        processors: ProcessorRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let store = Self::open_store(&config.store).await?;
        let store_kind = store.kind();

        let manager = SyncManager::with_processors(
            store,
            fetcher,
            network,
            settings,
            config.sync,
            processors,
        );
        manager.initialize().await?;

        Ok(Self {
            manager,
            store_kind,
        })
    }

    async fn open_store(config: &StoreConfig) -> Result<Arc<dyn LocalStore>> {
        let path = match &config.backend {
            StoreBackend::Ephemeral => return Self::open_ephemeral().await,
            StoreBackend::Persistent { path } => path,
        };

        match Self::open_persistent_with_recovery(path).await {
            Ok(store) => Ok(Arc::new(store)),
            Err(Error::StorageUnavailable(reason)) => {
                tracing::warn!(
                    "Persistent store unavailable at {}: {reason}. Using in-memory store.",
                    path.display()
                );
                Self::open_ephemeral().await
            }
            Err(error) => Err(error),
        }
    }

    async fn open_ephemeral() -> Result<Arc<dyn LocalStore>> {
        let store = MemoryStore::new();
        store.initialize().await?;
        Ok(Arc::new(store))
    }

    async fn open_persistent_with_recovery(path: &Path) -> Result<SqliteStore> {
        let store = SqliteStore::new(path);
        match store.initialize().await {
            Ok(()) => Ok(store),
            Err(error) if error.is_corrupted_database() => {
                tracing::warn!(
                    "Detected corrupted local store at {}: {}. Moving it aside and retrying once.",
                    path.display(),
                    error
                );
                store.close().await?;
                Self::quarantine_corrupted_db_files(path)?;

                let store = SqliteStore::new(path);
                store.initialize().await?;
                Ok(store)
            }
            Err(error) => Err(error),
        }
    }

    /// Move the database file and its sidecars to `<name>.corrupt-<ts>`.
    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let timestamp = chrono::Utc::now().timestamp_millis();

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        for suffix in ["", "-wal", "-shm", "-journal"] {
            let file_name = format!("{base_name}{suffix}");
            let path = parent.join(&file_name);
            if !path.is_file() {
                continue;
            }
            let backup_path = parent.join(format!("{file_name}.corrupt-{timestamp}"));
            std::fs::rename(&path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store file from {} to {}",
                path.display(),
                backup_path.display()
            );
        }

        Ok(())
    }

    pub async fn sync_data(&self, options: SyncOptions) -> SyncOutcome {
        self.manager.sync_data(options).await
    }

    pub async fn run_background_sync(&self) -> BackgroundFetchResult {
        self.manager.run_background_sync().await
    }

    pub fn status(&self) -> SyncStatusSnapshot {
        self.manager.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatusSnapshot> {
        self.manager.watch_status()
    }

    /// Whether cached data survives a restart.
    pub const fn store_kind(&self) -> StoreKind {
        self.store_kind
    }

    pub const fn manager(&self) -> &SyncManager {
        &self.manager
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.manager.cleanup().await
    }
}
