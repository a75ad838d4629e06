use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::{watch, Notify};

use super::*;
use crate::config::SyncConfig;
use crate::db::{Ledger, LocalStore, MemoryStore, Mutation, Query, Records, Row, StoreKind};
use crate::error::{Error, Result};
use crate::models::{LedgerEntry, LedgerStatus, PassStatus, SyncModule, SyncSettings};
use crate::network::{ConnectionClass, ConnectivityState, NetworkObserver};
use crate::state::SyncState;
use crate::util::now_millis;

#[derive(Clone)]
enum Script {
    Changes(ModuleChanges),
    Fail(FetchError),
    Hang,
}

/// Fetcher with per-module scripted answers, a call log and an optional gate
/// that holds every fetch until opened.
struct ScriptedFetcher {
    scripts: Mutex<HashMap<SyncModule, Script>>,
    calls: Mutex<Vec<(SyncModule, i64, FetchOptions)>>,
    entered: Notify,
    gate: watch::Sender<bool>,
}

impl ScriptedFetcher {
    fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            entered: Notify::new(),
            gate,
        }
    }

    fn gated() -> Self {
        let fetcher = Self::new();
        fetcher.gate.send_replace(false);
        fetcher
    }

    fn script(self, module: SyncModule, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(module, script);
        self
    }

    fn records(self, module: SyncModule, records: Vec<Value>) -> Self {
        self.script(module, Script::Changes(ModuleChanges::new(records)))
    }

    fn open(&self) {
        self.gate.send_replace(true);
    }

    fn calls(&self) -> Vec<(SyncModule, i64, FetchOptions)> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until `module` has been fetched at least once.
    async fn wait_for_call(&self, module: SyncModule) {
        while self.calls_for(module).is_empty() {
            self.entered.notified().await;
        }
    }

    fn calls_for(&self, module: SyncModule) -> Vec<i64> {
        self.calls()
            .into_iter()
            .filter(|(called, _, _)| *called == module)
            .map(|(_, since, _)| since)
            .collect()
    }
}

#[async_trait]
impl RemoteFetch for ScriptedFetcher {
    async fn fetch_module_changes(
        &self,
        module: SyncModule,
        since: i64,
        options: FetchOptions,
    ) -> std::result::Result<ModuleChanges, FetchError> {
        self.calls.lock().unwrap().push((module, since, options));
        self.entered.notify_one();

        let mut gate = self.gate.subscribe();
        while !*gate.borrow_and_update() {
            gate.changed().await.unwrap();
        }

        let script = self.scripts.lock().unwrap().get(&module).cloned();
        match script {
            None => Ok(ModuleChanges::default()),
            Some(Script::Changes(changes)) => Ok(changes),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Hang) => std::future::pending().await,
        }
    }
}

/// Memory store whose record upserts fail for one module.
struct FailingStore {
    inner: MemoryStore,
    failing: SyncModule,
}

#[async_trait]
impl LocalStore for FailingStore {
    fn kind(&self) -> StoreKind {
        self.inner.kind()
    }

    async fn initialize(&self) -> Result<()> {
        self.inner.initialize().await
    }

    async fn create_schema(&self) -> Result<()> {
        self.inner.create_schema().await
    }

    async fn schema_version(&self) -> Result<u32> {
        self.inner.schema_version().await
    }

    async fn apply_schema_migration(&self, from: u32, to: u32) -> Result<()> {
        self.inner.apply_schema_migration(from, to).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>> {
        self.inner.query(query).await
    }

    async fn execute(&self, mutation: &Mutation) -> Result<u64> {
        match mutation {
            Mutation::UpsertRecord(record) if record.module == self.failing => {
                Err(Error::write_failed(mutation.describe(), &"disk I/O error"))
            }
            _ => self.inner.execute(mutation).await,
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

struct Harness {
    manager: SyncManager,
    store: Arc<dyn LocalStore>,
    fetcher: Arc<ScriptedFetcher>,
    network: NetworkObserver,
    settings: SharedSettings,
}

impl Harness {
    fn ledger(&self) -> Ledger<'_> {
        Ledger::new(self.store.as_ref())
    }

    fn records(&self) -> Records<'_> {
        Records::new(self.store.as_ref())
    }

    async fn entry(&self, module: SyncModule) -> LedgerEntry {
        self.ledger().get(module).await.unwrap().unwrap()
    }
}

fn wifi() -> ConnectivityState {
    ConnectivityState::online(ConnectionClass::Wifi, false)
}

fn config(modules: &[SyncModule]) -> SyncConfig {
    SyncConfig {
        default_modules: modules.to_vec(),
        ..SyncConfig::default()
    }
}

async fn harness_with(
    store: Arc<dyn LocalStore>,
    fetcher: ScriptedFetcher,
    config: SyncConfig,
    processors: ProcessorRegistry,
    connectivity: ConnectivityState,
) -> Harness {
    store.initialize().await.unwrap();
    let fetcher = Arc::new(fetcher);
    let network = NetworkObserver::new(connectivity);
    let settings = SharedSettings::default();
    let manager = SyncManager::with_processors(
        Arc::clone(&store),
        fetcher.clone(),
        network.clone(),
        Arc::new(settings.clone()),
        config,
        processors,
    );
    Harness {
        manager,
        store,
        fetcher,
        network,
        settings,
    }
}

async fn harness(fetcher: ScriptedFetcher, config: SyncConfig) -> Harness {
    harness_with(
        Arc::new(MemoryStore::new()),
        fetcher,
        config,
        ProcessorRegistry::standard(),
        wifi(),
    )
    .await
}

fn forecast(id: &str) -> Value {
    json!({ "id": id, "location": "Nakuru", "temperatureC": 24.5 })
}

fn listing(id: &str) -> Value {
    json!({ "id": id, "title": "Certified maize seed", "category": "seeds" })
}

fn notification(id: &str) -> Value {
    json!({ "id": id, "title": "Rain expected", "category": "weather" })
}

fn completed(outcome: SyncOutcome) -> SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        other => panic!("expected a completed pass, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn weather_resyncs_after_reconnect() {
    let fetcher = ScriptedFetcher::gated()
        .records(SyncModule::WeatherCache, vec![forecast("w-1"), forecast("w-2")]);
    let h = harness_with(
        Arc::new(MemoryStore::new()),
        fetcher,
        SyncConfig::default(),
        ProcessorRegistry::standard(),
        ConnectivityState::offline(),
    )
    .await;
    h.settings.update(SyncSettings {
        auto_sync_enabled: false,
        ..SyncSettings::default()
    });

    let mut weather = LedgerEntry::new(SyncModule::WeatherCache);
    weather.last_sync_time = 1_000;
    weather.sync_status = LedgerStatus::Success;
    weather.schema_version = 1;
    h.ledger().put(&weather).await.unwrap();

    h.manager.initialize().await.unwrap();
    h.network.update(wifi());

    let manager = h.manager.clone();
    let pass = tokio::spawn(async move { manager.sync_data(SyncOptions::default()).await });

    h.fetcher.wait_for_call(SyncModule::WeatherCache).await;
    assert_eq!(
        h.entry(SyncModule::WeatherCache).await.sync_status,
        LedgerStatus::InProgress
    );

    h.fetcher.open();
    let report = completed(pass.await.unwrap());
    assert_eq!(report.status, PassStatus::Success);
    assert_eq!(h.fetcher.calls_for(SyncModule::WeatherCache), vec![1_000]);

    let weather = h.entry(SyncModule::WeatherCache).await;
    assert_eq!(weather.sync_status, LedgerStatus::Success);
    assert!(weather.last_sync_time > 1_000);
    assert_eq!(h.records().count(SyncModule::WeatherCache).await.unwrap(), 2);
    assert_eq!(h.manager.status().state, SyncState::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn rapid_duplicate_request_is_absorbed() {
    let fetcher = ScriptedFetcher::gated()
        .records(SyncModule::MarketplaceCache, vec![listing("m-1")]);
    let h = harness(fetcher, SyncConfig::default()).await;

    let manager = h.manager.clone();
    let first = tokio::spawn(async move {
        manager
            .sync_data(SyncOptions::modules([SyncModule::MarketplaceCache]))
            .await
    });
    h.fetcher.wait_for_call(SyncModule::MarketplaceCache).await;

    let second = h
        .manager
        .sync_data(SyncOptions::modules([SyncModule::MarketplaceCache]))
        .await;
    assert_eq!(second, SyncOutcome::Queued(Vec::new()));
    assert!(second.success());

    h.fetcher.open();
    let report = completed(first.await.unwrap());
    assert!(report.follow_up.is_none());
    assert_eq!(h.fetcher.calls_for(SyncModule::MarketplaceCache).len(), 1);
    assert!(!h.manager.is_syncing());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_requests_share_one_flight() {
    let h = harness(ScriptedFetcher::gated(), SyncConfig::default()).await;

    let manager = h.manager.clone();
    let first = tokio::spawn(async move {
        manager
            .sync_data(SyncOptions::modules([SyncModule::WeatherCache]))
            .await
    });
    h.fetcher.wait_for_call(SyncModule::WeatherCache).await;

    let requests = [
        vec![SyncModule::WeatherCache, SyncModule::Notifications],
        vec![SyncModule::Notifications],
        vec![SyncModule::FarmRecords, SyncModule::WeatherCache],
        vec![SyncModule::Consultations],
    ];
    let mut queued = Vec::new();
    for modules in requests {
        let manager = h.manager.clone();
        queued.push(tokio::spawn(async move {
            manager.sync_data(SyncOptions::modules(modules)).await
        }));
    }
    for handle in queued {
        assert!(matches!(handle.await.unwrap(), SyncOutcome::Queued(_)));
    }
    assert!(h.manager.is_syncing());
    assert_eq!(
        h.manager.queued_modules(),
        vec![
            SyncModule::FarmRecords,
            SyncModule::Consultations,
            SyncModule::Notifications
        ]
    );

    h.fetcher.open();
    let report = completed(first.await.unwrap());
    let follow_up = report.follow_up.as_deref().unwrap();
    assert_eq!(follow_up.modules.len(), 3);
    assert!(follow_up.follow_up.is_none());

    let mut fetched: Vec<_> = h.fetcher.calls().into_iter().map(|(module, _, _)| module).collect();
    fetched.sort();
    assert_eq!(
        fetched,
        vec![
            SyncModule::WeatherCache,
            SyncModule::FarmRecords,
            SyncModule::Consultations,
            SyncModule::Notifications
        ]
    );
    assert!(!h.manager.is_syncing());
    assert!(h.manager.queued_modules().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_during_follow_up_get_their_own_pass() {
    let fetcher = ScriptedFetcher::gated()
        .script(SyncModule::Notifications, Script::Hang)
        .records(
            SyncModule::FarmRecords,
            vec![json!({ "id": "f-1", "type": "harvest", "amount": 12.0 })],
        );
    let mut config = SyncConfig::default();
    config.module_timeout_secs = 1;
    let h = harness(fetcher, config).await;
    h.settings.update(SyncSettings {
        auto_sync_enabled: false,
        ..SyncSettings::default()
    });

    let manager = h.manager.clone();
    let first = tokio::spawn(async move {
        manager
            .sync_data(SyncOptions::modules([SyncModule::WeatherCache]))
            .await
    });
    h.fetcher.wait_for_call(SyncModule::WeatherCache).await;
    assert_eq!(
        h.manager
            .sync_data(SyncOptions::modules([SyncModule::Notifications]))
            .await,
        SyncOutcome::Queued(vec![SyncModule::Notifications])
    );

    h.fetcher.open();
    h.fetcher.wait_for_call(SyncModule::Notifications).await;
    assert_eq!(
        h.manager
            .sync_data(SyncOptions::modules([SyncModule::FarmRecords]))
            .await,
        SyncOutcome::Queued(vec![SyncModule::FarmRecords])
    );

    let report = completed(first.await.unwrap());
    let follow_up = report.follow_up.as_deref().unwrap();
    assert_eq!(follow_up.modules.len(), 1);
    assert_eq!(follow_up.modules[0].outcome, ModuleOutcome::TimedOut);

    tokio::time::timeout(Duration::from_secs(5), async {
        while h
            .ledger()
            .get(SyncModule::FarmRecords)
            .await
            .unwrap()
            .map(|entry| entry.sync_status)
            != Some(LedgerStatus::Success)
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(h.fetcher.calls_for(SyncModule::FarmRecords).len(), 1);
    assert_eq!(h.records().count(SyncModule::FarmRecords).await.unwrap(), 1);
    assert!(h.manager.queued_modules().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_module_does_not_block_siblings() {
    let fetcher = ScriptedFetcher::new()
        .records(SyncModule::WeatherCache, vec![forecast("w-1")])
        .script(
            SyncModule::MarketplaceCache,
            Script::Fail(FetchError::network("connection reset")),
        )
        .records(SyncModule::Notifications, vec![notification("n-1")]);
    let modules = [
        SyncModule::WeatherCache,
        SyncModule::MarketplaceCache,
        SyncModule::Notifications,
    ];
    let h = harness(fetcher, config(&modules)).await;

    let outcome = h.manager.sync_data(SyncOptions::default()).await;
    assert!(outcome.success());
    let report = completed(outcome);
    assert_eq!(report.status, PassStatus::Partial);
    assert_eq!(
        report.module(SyncModule::MarketplaceCache).unwrap().outcome,
        ModuleOutcome::Failed
    );

    assert_eq!(
        h.entry(SyncModule::WeatherCache).await.sync_status,
        LedgerStatus::Success
    );
    assert_eq!(
        h.entry(SyncModule::Notifications).await.sync_status,
        LedgerStatus::Success
    );
    assert!(h.manager.status().last_sync_time.is_some());
    let market = h.entry(SyncModule::MarketplaceCache).await;
    assert_eq!(market.sync_status, LedgerStatus::Failed);
    assert_eq!(market.last_sync_time, 0);
    assert_eq!(market.consecutive_failures, 1);
    assert!(market.last_error.unwrap().contains("connection reset"));
}

#[tokio::test(flavor = "multi_thread")]
async fn every_module_failing_fails_the_pass() {
    let fetcher = ScriptedFetcher::new()
        .script(SyncModule::WeatherCache, Script::Fail(FetchError::network("offline")))
        .script(SyncModule::Notifications, Script::Fail(FetchError::network("offline")));
    let h = harness(
        fetcher,
        config(&[SyncModule::WeatherCache, SyncModule::Notifications]),
    )
    .await;

    let outcome = h.manager.sync_data(SyncOptions::default()).await;
    assert!(!outcome.success());
    assert_eq!(outcome.message(), "Sync failed; showing cached data");
    assert_eq!(h.manager.status().state, SyncState::Error);
    assert_eq!(h.manager.status().last_sync_time, None);
    assert_eq!(h.ledger().last_successful_sync().await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_request_is_a_no_op() {
    let h = harness_with(
        Arc::new(MemoryStore::new()),
        ScriptedFetcher::new(),
        SyncConfig::default(),
        ProcessorRegistry::standard(),
        ConnectivityState::offline(),
    )
    .await;

    let outcome = h.manager.sync_data(SyncOptions::default()).await;
    assert_eq!(outcome, SyncOutcome::NoConnection);
    assert!(h.fetcher.calls().is_empty());
    assert!(h.ledger().all().await.unwrap().is_empty());
    assert!(h.manager.pending_sync_requested());
    assert!(h.manager.status().pending_sync);
    assert_eq!(h.manager.status().state, SyncState::Offline);
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnect_runs_the_deferred_request() {
    let fetcher = ScriptedFetcher::new().records(SyncModule::WeatherCache, vec![forecast("w-1")]);
    let h = harness_with(
        Arc::new(MemoryStore::new()),
        fetcher,
        config(&[SyncModule::WeatherCache]),
        ProcessorRegistry::standard(),
        ConnectivityState::offline(),
    )
    .await;
    h.settings.update(SyncSettings {
        auto_sync_enabled: false,
        ..SyncSettings::default()
    });
    h.manager.initialize().await.unwrap();

    let outcome = h
        .manager
        .sync_data(SyncOptions::modules([SyncModule::WeatherCache]))
        .await;
    assert_eq!(outcome, SyncOutcome::NoConnection);

    let mut status = h.manager.watch_status();
    h.network.update(wifi());
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if status.borrow_and_update().state == SyncState::Synced {
                break;
            }
            status.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(h.fetcher.calls_for(SyncModule::WeatherCache).len(), 1);
    assert!(!h.manager.pending_sync_requested());
    assert!(!h.manager.status().pending_sync);
}

#[tokio::test(flavor = "multi_thread")]
async fn degraded_link_without_request_does_nothing() {
    let h = harness(ScriptedFetcher::new(), SyncConfig::default()).await;
    h.manager.initialize().await.unwrap();

    h.network
        .update(ConnectivityState::online(ConnectionClass::Cellular3g, true));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.fetcher.calls().is_empty());
    assert!(h.manager.status().is_online);
}

#[tokio::test(flavor = "multi_thread")]
async fn cursor_never_moves_backwards() {
    let fetcher = ScriptedFetcher::new().records(SyncModule::WeatherCache, vec![forecast("w-1")]);
    let h = harness(fetcher, config(&[SyncModule::WeatherCache])).await;

    let mut cursors = Vec::new();
    for _ in 0..3 {
        h.manager.sync_data(SyncOptions::default()).await;
        cursors.push(h.entry(SyncModule::WeatherCache).await.last_sync_time);
    }
    assert!(cursors.windows(2).all(|pair| pair[0] <= pair[1]));

    let future_cursor = now_millis() + 60_000_000;
    let mut entry = h.entry(SyncModule::WeatherCache).await;
    entry.last_sync_time = future_cursor;
    h.ledger().put(&entry).await.unwrap();

    h.manager.sync_data(SyncOptions::default()).await;
    assert_eq!(
        h.entry(SyncModule::WeatherCache).await.last_sync_time,
        future_cursor
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_payload_leaves_one_row_per_id() {
    let fetcher = ScriptedFetcher::new()
        .records(SyncModule::MarketplaceCache, vec![listing("m-1"), listing("m-2")]);
    let h = harness(fetcher, config(&[SyncModule::MarketplaceCache])).await;

    h.manager.sync_data(SyncOptions::default()).await;
    let first = h
        .records()
        .list(SyncModule::MarketplaceCache, 10)
        .await
        .unwrap();
    h.manager.sync_data(SyncOptions::default()).await;
    let second = h
        .records()
        .list(SyncModule::MarketplaceCache, 10)
        .await
        .unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(
        first.iter().map(|row| (&row.id, &row.data)).collect::<Vec<_>>(),
        second.iter().map(|row| (&row.id, &row.data)).collect::<Vec<_>>()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_module_fails_alone() {
    let fetcher = ScriptedFetcher::new()
        .script(SyncModule::WeatherCache, Script::Hang)
        .records(SyncModule::Notifications, vec![notification("n-1")]);
    let mut config = config(&[SyncModule::WeatherCache, SyncModule::Notifications]);
    config.module_timeout_secs = 1;
    let h = harness(fetcher, config).await;

    let report = completed(h.manager.sync_data(SyncOptions::default()).await);
    assert_eq!(report.status, PassStatus::Partial);
    assert_eq!(
        report.module(SyncModule::WeatherCache).unwrap().outcome,
        ModuleOutcome::TimedOut
    );

    let weather = h.entry(SyncModule::WeatherCache).await;
    assert_eq!(weather.sync_status, LedgerStatus::Failed);
    assert_eq!(weather.last_sync_time, 0);
    assert_eq!(
        h.entry(SyncModule::Notifications).await.sync_status,
        LedgerStatus::Success
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn store_write_failure_is_local_to_its_module() {
    let store: Arc<dyn LocalStore> = Arc::new(FailingStore {
        inner: MemoryStore::new(),
        failing: SyncModule::FarmRecords,
    });
    let fetcher = ScriptedFetcher::new()
        .records(
            SyncModule::FarmRecords,
            vec![json!({ "id": "f-1", "type": "harvest", "amount": 12.0 })],
        )
        .records(SyncModule::WeatherCache, vec![forecast("w-1")]);
    let h = harness_with(
        store,
        fetcher,
        config(&[SyncModule::FarmRecords, SyncModule::WeatherCache]),
        ProcessorRegistry::standard(),
        wifi(),
    )
    .await;

    let report = completed(h.manager.sync_data(SyncOptions::default()).await);
    assert_eq!(report.status, PassStatus::Partial);

    let farm = h.entry(SyncModule::FarmRecords).await;
    assert_eq!(farm.sync_status, LedgerStatus::Failed);
    let error = farm.last_error.unwrap();
    assert!(error.contains("upsert farm_records"));
    assert!(!error.contains("harvest"));
    assert!(farm.last_sync_time > 0);

    assert_eq!(
        h.entry(SyncModule::WeatherCache).await.sync_status,
        LedgerStatus::Success
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_failure_can_keep_the_cursor() {
    let store: Arc<dyn LocalStore> = Arc::new(FailingStore {
        inner: MemoryStore::new(),
        failing: SyncModule::FarmRecords,
    });
    let fetcher = ScriptedFetcher::new().records(
        SyncModule::FarmRecords,
        vec![json!({ "id": "f-1", "type": "expense" })],
    );
    let mut config = config(&[SyncModule::FarmRecords]);
    config.advance_on_reconcile_failure = false;
    let h = harness_with(store, fetcher, config, ProcessorRegistry::standard(), wifi()).await;

    h.manager.sync_data(SyncOptions::default()).await;
    let farm = h.entry(SyncModule::FarmRecords).await;
    assert_eq!(farm.sync_status, LedgerStatus::Failed);
    assert_eq!(farm.last_sync_time, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn partially_received_fetch_advances_cursor() {
    let fetcher = ScriptedFetcher::new().script(
        SyncModule::Consultations,
        Script::Fail(FetchError::timeout("body truncated").with_bytes_received()),
    );
    let h = harness(fetcher, config(&[SyncModule::Consultations])).await;

    h.manager.sync_data(SyncOptions::default()).await;
    let entry = h.entry(SyncModule::Consultations).await;
    assert_eq!(entry.sync_status, LedgerStatus::Failed);
    assert!(entry.last_sync_time > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn skipped_records_mark_module_partial() {
    let fetcher = ScriptedFetcher::new().records(
        SyncModule::Notifications,
        vec![notification("n-1"), json!({ "id": "n-2" })],
    );
    let h = harness(fetcher, config(&[SyncModule::Notifications])).await;

    let outcome = h.manager.sync_data(SyncOptions::default()).await;
    assert_eq!(
        outcome.message(),
        "Sync partially completed; 1 module(s) may be outdated"
    );
    let report = completed(outcome);
    assert_eq!(report.status, PassStatus::Partial);
    assert!(h.manager.status().may_be_outdated());
    let module = report.module(SyncModule::Notifications).unwrap();
    assert_eq!(module.outcome, ModuleOutcome::Partial);
    assert_eq!((module.stats.inserted, module.stats.failed), (1, 1));
    assert_eq!(
        h.entry(SyncModule::Notifications).await.sync_status,
        LedgerStatus::Partial
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn processor_version_change_forces_full_resync() {
    let fetcher = ScriptedFetcher::new().records(SyncModule::WeatherCache, vec![forecast("fresh")]);
    let mut processors = ProcessorRegistry::standard();
    processors.register(Arc::new(
        StandardProcessor::new(SyncModule::WeatherCache).with_schema_version(2),
    ));
    let h = harness_with(
        Arc::new(MemoryStore::new()),
        fetcher,
        config(&[SyncModule::WeatherCache]),
        processors,
        wifi(),
    )
    .await;

    let mut entry = LedgerEntry::new(SyncModule::WeatherCache);
    entry.last_sync_time = 5_000;
    entry.sync_status = LedgerStatus::Success;
    entry.schema_version = 1;
    h.ledger().put(&entry).await.unwrap();
    StandardProcessor::new(SyncModule::WeatherCache)
        .reconcile(
            h.store.as_ref(),
            &ModuleChanges::new(vec![forecast("stale")]),
            4_000,
        )
        .await
        .unwrap();

    h.manager.sync_data(SyncOptions::default()).await;

    assert_eq!(h.fetcher.calls_for(SyncModule::WeatherCache), vec![0]);
    let rows = h.records().list(SyncModule::WeatherCache, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "fresh");
    assert_eq!(h.entry(SyncModule::WeatherCache).await.schema_version, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_fetch_keeps_cache_during_resync() {
    let fetcher = ScriptedFetcher::new().script(
        SyncModule::WeatherCache,
        Script::Fail(FetchError::network("unreachable")),
    );
    let mut processors = ProcessorRegistry::standard();
    processors.register(Arc::new(
        StandardProcessor::new(SyncModule::WeatherCache).with_schema_version(2),
    ));
    let h = harness_with(
        Arc::new(MemoryStore::new()),
        fetcher,
        config(&[SyncModule::WeatherCache]),
        processors,
        wifi(),
    )
    .await;
    StandardProcessor::new(SyncModule::WeatherCache)
        .reconcile(
            h.store.as_ref(),
            &ModuleChanges::new(vec![forecast("cached")]),
            1,
        )
        .await
        .unwrap();

    h.manager.sync_data(SyncOptions::default()).await;
    assert_eq!(h.records().count(SyncModule::WeatherCache).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_payload_keeps_cache_during_resync() {
    let fetcher = ScriptedFetcher::new()
        .records(SyncModule::WeatherCache, vec![json!({ "id": "w-bad" })]);
    let mut processors = ProcessorRegistry::standard();
    processors.register(Arc::new(
        StandardProcessor::new(SyncModule::WeatherCache).with_schema_version(2),
    ));
    let h = harness_with(
        Arc::new(MemoryStore::new()),
        fetcher,
        config(&[SyncModule::WeatherCache]),
        processors,
        wifi(),
    )
    .await;
    StandardProcessor::new(SyncModule::WeatherCache)
        .reconcile(
            h.store.as_ref(),
            &ModuleChanges::new(vec![forecast("cached")]),
            1,
        )
        .await
        .unwrap();

    let report = completed(h.manager.sync_data(SyncOptions::default()).await);
    assert_eq!(
        report.module(SyncModule::WeatherCache).unwrap().outcome,
        ModuleOutcome::Failed
    );
    let rows = h.records().list(SyncModule::WeatherCache, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "cached");
    assert_ne!(h.entry(SyncModule::WeatherCache).await.schema_version, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn automatic_passes_back_off_failing_modules() {
    let h = harness(ScriptedFetcher::new(), config(&[SyncModule::WeatherCache])).await;
    let mut entry = LedgerEntry::new(SyncModule::WeatherCache);
    entry.sync_status = LedgerStatus::Failed;
    entry.consecutive_failures = 5;
    entry.last_attempt_at = Some(now_millis());
    h.ledger().put(&entry).await.unwrap();

    let report = completed(
        h.manager
            .sync_data(SyncOptions::triggered(SyncTrigger::Periodic))
            .await,
    );
    assert_eq!(
        report.module(SyncModule::WeatherCache).unwrap().outcome,
        ModuleOutcome::Skipped
    );
    assert_eq!(report.status, PassStatus::Failed);
    assert!(h.fetcher.calls().is_empty());
    assert_eq!(h.entry(SyncModule::WeatherCache).await, entry);

    let report = completed(h.manager.sync_data(SyncOptions::default()).await);
    assert_eq!(report.status, PassStatus::Success);
    let entry = h.entry(SyncModule::WeatherCache).await;
    assert_eq!(entry.consecutive_failures, 0);
    assert_eq!(entry.sync_status, LedgerStatus::Success);
}

#[tokio::test(flavor = "multi_thread")]
async fn low_bandwidth_hint_reaches_fetcher() {
    let h = harness_with(
        Arc::new(MemoryStore::new()),
        ScriptedFetcher::new(),
        config(&[SyncModule::ReferenceData]),
        ProcessorRegistry::standard(),
        ConnectivityState::online(ConnectionClass::Cellular2g, false),
    )
    .await;

    h.manager.sync_data(SyncOptions::default()).await;
    let (_, _, options) = h.fetcher.calls()[0];
    assert_eq!(
        options,
        FetchOptions {
            compressed: true,
            low_bandwidth: true
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn background_sync_covers_essential_subset() {
    let fetcher =
        ScriptedFetcher::new().records(SyncModule::Notifications, vec![notification("n-1")]);
    let h = harness(fetcher, SyncConfig::default()).await;

    let result = h.manager.run_background_sync().await;
    assert_eq!(result, BackgroundFetchResult::NewData);

    let mut fetched: Vec<_> = h.fetcher.calls().into_iter().map(|(module, _, _)| module).collect();
    fetched.sort();
    let mut expected = crate::config::BACKGROUND_MODULES.to_vec();
    expected.sort();
    assert_eq!(fetched, expected);

    assert_eq!(
        h.manager.run_background_sync().await,
        BackgroundFetchResult::NewData
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn background_trigger_waits_for_foreground_pass() {
    let fetcher = ScriptedFetcher::gated()
        .records(SyncModule::Notifications, vec![notification("n-1")]);
    let h = harness(fetcher, SyncConfig::default()).await;

    let manager = h.manager.clone();
    let foreground = tokio::spawn(async move {
        manager
            .sync_data(SyncOptions::modules([
                SyncModule::WeatherCache,
                SyncModule::MarketplaceCache,
            ]))
            .await
    });
    h.fetcher.wait_for_call(SyncModule::WeatherCache).await;
    h.fetcher.wait_for_call(SyncModule::MarketplaceCache).await;

    assert_eq!(
        h.manager.run_background_sync().await,
        BackgroundFetchResult::NoData
    );
    assert_eq!(h.fetcher.calls().len(), 2);
    assert_eq!(
        h.manager.queued_modules(),
        vec![
            SyncModule::FarmRecords,
            SyncModule::Consultations,
            SyncModule::Notifications
        ]
    );

    h.fetcher.open();
    let report = completed(foreground.await.unwrap());
    assert_eq!(report.modules.len(), 2);
    let follow_up = report.follow_up.as_deref().unwrap();
    assert_eq!(
        follow_up
            .modules
            .iter()
            .map(|module| module.module)
            .collect::<Vec<_>>(),
        vec![
            SyncModule::FarmRecords,
            SyncModule::Consultations,
            SyncModule::Notifications
        ]
    );
    assert_eq!(follow_up.rows_applied(), 1);
    assert_eq!(h.fetcher.calls_for(SyncModule::WeatherCache).len(), 1);
    assert_eq!(h.fetcher.calls().len(), 5);
    assert!(!h.manager.is_syncing());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_initialize_leaves_running_pass_alone() {
    let h = harness(ScriptedFetcher::gated(), config(&[SyncModule::WeatherCache])).await;
    h.manager.initialize().await.unwrap();

    let manager = h.manager.clone();
    let pass = tokio::spawn(async move { manager.sync_data(SyncOptions::default()).await });
    h.fetcher.wait_for_call(SyncModule::WeatherCache).await;

    h.manager.initialize().await.unwrap();
    let weather = h.entry(SyncModule::WeatherCache).await;
    assert_eq!(weather.sync_status, LedgerStatus::InProgress);
    assert_eq!(weather.last_error, None);
    assert_eq!(h.network.subscriber_count(), 1);

    h.fetcher.open();
    assert_eq!(completed(pass.await.unwrap()).status, PassStatus::Success);
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_seeds_ledger_and_cleanup_detaches() {
    let h = harness(ScriptedFetcher::new(), SyncConfig::default()).await;
    h.manager.initialize().await.unwrap();
    h.manager.initialize().await.unwrap();

    let entries = h.ledger().all().await.unwrap();
    assert_eq!(entries.len(), SyncModule::ALL.len());
    assert!(entries
        .iter()
        .all(|entry| entry.sync_status == LedgerStatus::Pending));
    assert_eq!(h.network.subscriber_count(), 1);

    h.manager.cleanup().await.unwrap();
    assert_eq!(h.network.subscriber_count(), 0);
    assert!(matches!(h.ledger().all().await, Err(Error::StoreClosed)));
}
