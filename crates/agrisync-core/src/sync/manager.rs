//! Sync orchestrator
//!
//! At most one pass runs per process. Requests that arrive during a pass are
//! queued and drained by one follow-up pass; anything queued during the
//! follow-up starts a fresh cycle once the flight is released. Modules within
//! a pass run concurrently and fail independently.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use super::fetch::{FetchError, FetchOptions, RemoteFetch};
use super::policy;
use super::processor::ProcessorRegistry;
use super::report::{
    BackgroundFetchResult, ModuleOutcome, ModuleReport, SyncOptions, SyncOutcome, SyncReport,
    SyncTrigger,
};
use super::settings::SettingsProvider;
use crate::config::SyncConfig;
use crate::db::{Ledger, LocalStore, Records};
use crate::error::{Error, Result};
use crate::models::{LedgerStatus, PassStatus, SyncModule};
use crate::network::{ConnectivityEvent, NetworkObserver, Subscription, Transition};
use crate::state::{SyncState, SyncStatusSnapshot};
use crate::util::{compact_text, now_millis};

#[derive(Default)]
struct FlightState {
    syncing: bool,
    /// Modules of the pass currently running
    in_pass: BTreeSet<SyncModule>,
    /// Modules requested while a pass ran or while offline
    queue: BTreeSet<SyncModule>,
    /// A manual request sits in `queue`
    queued_manual: bool,
    pending_sync_requested: bool,
}

#[derive(Default)]
struct Tasks {
    initialized: bool,
    subscription: Option<Subscription>,
    periodic: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<dyn LocalStore>,
    fetcher: Arc<dyn RemoteFetch>,
    processors: ProcessorRegistry,
    network: NetworkObserver,
    settings: Arc<dyn SettingsProvider>,
    config: SyncConfig,
    flight: Mutex<FlightState>,
    status: watch::Sender<SyncStatusSnapshot>,
    tasks: Mutex<Tasks>,
}

enum Admission {
    Run(Vec<SyncModule>),
    Queued(Vec<SyncModule>),
}

/// Releases the single-flight flag, including when the pass future is dropped.
struct FlightGuard<'a> {
    inner: &'a Inner,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flight = self.inner.flight();
        flight.syncing = false;
        flight.in_pass.clear();
    }
}

struct PassContext {
    trigger: SyncTrigger,
    fetch_options: FetchOptions,
}

enum StepError {
    Fetch(FetchError),
    Store(Error),
    Reconcile(Error),
}

impl Inner {
    fn flight(&self) -> MutexGuard<'_, FlightState> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, update: impl FnOnce(&mut SyncStatusSnapshot)) {
        self.status.send_modify(update);
    }
}

/// Process-wide sync orchestrator. Cheap to clone; clones share one flight.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn LocalStore>,
        fetcher: Arc<dyn RemoteFetch>,
        network: NetworkObserver,
        settings: Arc<dyn SettingsProvider>,
        config: SyncConfig,
    ) -> Self {
        Self::with_processors(
            store,
            fetcher,
            network,
            settings,
            config,
            ProcessorRegistry::standard(),
        )
    }

    pub fn with_processors(
        store: Arc<dyn LocalStore>,
        fetcher: Arc<dyn RemoteFetch>,
        network: NetworkObserver,
        settings: Arc<dyn SettingsProvider>,
        config: SyncConfig,
        processors: ProcessorRegistry,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatusSnapshot {
            is_online: network.current_state().is_connected,
            ..SyncStatusSnapshot::default()
        });
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                processors,
                network,
                settings,
                config,
                flight: Mutex::new(FlightState::default()),
                status,
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    /// Seed the ledger, recover interrupted rows, subscribe to connectivity
    /// and start the periodic timer. Later calls are no-ops.
    pub async fn initialize(&self) -> Result<()> {
        let already = std::mem::replace(&mut self.inner.tasks().initialized, true);
        if already {
            return Ok(());
        }
        let started = self.start().await;
        if started.is_err() {
            self.inner.tasks().initialized = false;
        }
        started
    }

    async fn start(&self) -> Result<()> {
        let ledger = Ledger::new(self.inner.store.as_ref());
        let seeded = ledger.ensure(&SyncModule::ALL).await?;
        let recovered = ledger.recover_interrupted().await?;
        if !recovered.is_empty() {
            tracing::warn!(
                "Marked {} module(s) interrupted by a previous run as failed",
                recovered.len()
            );
        }
        let last_sync_time = ledger.last_successful_sync().await?;
        self.inner.publish(|status| {
            if status.last_sync_time.is_none() {
                status.last_sync_time = last_sync_time.filter(|time| *time > 0);
            }
        });

        let handle = Handle::try_current().map_err(|error| {
            Error::Config(format!("sync manager needs a tokio runtime: {error}"))
        })?;
        let subscription = self.subscribe_connectivity(handle.clone());
        let periodic = self.spawn_periodic(&handle);

        let mut tasks = self.inner.tasks();
        tasks.subscription = Some(subscription);
        tasks.periodic = Some(periodic);
        drop(tasks);

        tracing::info!("Sync manager initialized (seeded {seeded} ledger row(s))");
        Ok(())
    }

    /// Stop timers and observers, then close the store.
    pub async fn cleanup(&self) -> Result<()> {
        let (subscription, periodic) = {
            let mut tasks = self.inner.tasks();
            (tasks.subscription.take(), tasks.periodic.take())
        };
        if let Some(periodic) = periodic {
            periodic.abort();
        }
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.inner.store.close().await?;
        tracing::info!("Sync manager stopped");
        Ok(())
    }

    /// Run (or queue) a sync pass. Never returns an error: failures are
    /// folded into the outcome.
    pub async fn sync_data(&self, options: SyncOptions) -> SyncOutcome {
        let requested: BTreeSet<SyncModule> = options
            .modules
            .clone()
            .unwrap_or_else(|| self.inner.config.default_modules.clone())
            .into_iter()
            .collect();

        if !self.inner.network.current_state().is_connected {
            {
                let mut flight = self.inner.flight();
                flight.pending_sync_requested = true;
                flight.queue.extend(requested.iter().copied());
                flight.queued_manual |= !options.trigger.is_automatic();
            }
            self.inner.publish(|status| {
                status.is_online = false;
                status.state = SyncState::Offline;
                status.pending_sync = true;
            });
            tracing::debug!("Sync requested while offline; deferred until reconnect");
            return SyncOutcome::NoConnection;
        }

        let modules = match self.admit(requested, options.trigger) {
            Admission::Run(modules) => modules,
            Admission::Queued(modules) => {
                tracing::debug!("Sync already in progress; queued {} module(s)", modules.len());
                return SyncOutcome::Queued(modules);
            }
        };
        let guard = FlightGuard { inner: &self.inner };

        let mut report = self.run_pass(modules, options.trigger).await;

        let follow_up = self.take_follow_up(options.trigger);
        if let Some((modules, trigger)) = follow_up {
            tracing::debug!("Running follow-up pass for {} queued module(s)", modules.len());
            report.follow_up = Some(Box::new(self.run_pass(modules, trigger).await));
        }

        drop(guard);
        self.drain_leftover(options.trigger);
        SyncOutcome::Completed(report)
    }

    /// Entry point for an OS background task: syncs the essential subset.
    pub async fn run_background_sync(&self) -> BackgroundFetchResult {
        let options = SyncOptions::modules(self.inner.config.background_modules.iter().copied())
            .with_trigger(SyncTrigger::Background);
        let outcome = self.sync_data(options).await;
        BackgroundFetchResult::from(&outcome)
    }

    pub fn status(&self) -> SyncStatusSnapshot {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatusSnapshot> {
        self.inner.status.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.flight().syncing
    }

    pub fn pending_sync_requested(&self) -> bool {
        self.inner.flight().pending_sync_requested
    }

    /// Modules waiting for the next pass.
    pub fn queued_modules(&self) -> Vec<SyncModule> {
        self.inner.flight().queue.iter().copied().collect()
    }

    pub fn store(&self) -> &dyn LocalStore {
        self.inner.store.as_ref()
    }

    fn admit(&self, requested: BTreeSet<SyncModule>, trigger: SyncTrigger) -> Admission {
        let mut flight = self.inner.flight();
        if flight.syncing {
            let queued: Vec<SyncModule> = requested
                .into_iter()
                .filter(|module| !flight.in_pass.contains(module))
                .collect();
            flight.queue.extend(queued.iter().copied());
            if !queued.is_empty() {
                flight.queued_manual |= !trigger.is_automatic();
            }
            return Admission::Queued(queued);
        }

        let mut modules = requested;
        modules.append(&mut flight.queue);
        flight.queued_manual = false;
        flight.pending_sync_requested = false;
        flight.syncing = true;
        flight.in_pass.clone_from(&modules);
        Admission::Run(modules.into_iter().collect())
    }

    /// Drain the queue into one follow-up pass, if there is anything to run.
    fn take_follow_up(&self, trigger: SyncTrigger) -> Option<(Vec<SyncModule>, SyncTrigger)> {
        let online = self.inner.network.current_state().is_connected;
        let mut flight = self.inner.flight();
        if flight.queue.is_empty() {
            return None;
        }
        if !online {
            flight.pending_sync_requested = true;
            return None;
        }
        let modules = std::mem::take(&mut flight.queue);
        let trigger = if flight.queued_manual {
            SyncTrigger::Manual
        } else {
            trigger
        };
        flight.queued_manual = false;
        flight.in_pass.clone_from(&modules);
        Some((modules.into_iter().collect(), trigger))
    }

    /// Start a new drain cycle for modules queued during the follow-up pass.
    fn drain_leftover(&self, trigger: SyncTrigger) {
        let trigger = {
            let mut flight = self.inner.flight();
            if flight.syncing || flight.queue.is_empty() {
                return;
            }
            if Handle::try_current().is_err() {
                flight.pending_sync_requested = true;
                return;
            }
            if flight.queued_manual {
                SyncTrigger::Manual
            } else {
                trigger
            }
        };

        tracing::debug!("Modules queued during the follow-up pass; starting another pass");
        let manager = self.clone();
        tokio::spawn(async move {
            manager
                .sync_data(SyncOptions::modules(Vec::new()).with_trigger(trigger))
                .await;
        });
    }

    async fn run_pass(&self, modules: Vec<SyncModule>, trigger: SyncTrigger) -> SyncReport {
        let pass_id = Uuid::now_v7().to_string();
        let span = tracing::info_span!("sync_pass", pass_id = %pass_id, trigger = trigger.as_str());
        self.run_pass_inner(pass_id, modules, trigger)
            .instrument(span)
            .await
    }

    async fn run_pass_inner(
        &self,
        pass_id: String,
        modules: Vec<SyncModule>,
        trigger: SyncTrigger,
    ) -> SyncReport {
        let started_at = now_millis();
        let clock = Instant::now();
        self.inner.publish(|status| {
            status.is_online = true;
            status.state = SyncState::Syncing;
            status.pending_sync = false;
        });

        let settings = self.inner.settings.sync_settings();
        let connectivity = self.inner.network.current_state();
        let ctx = PassContext {
            trigger,
            fetch_options: policy::fetch_options(&self.inner.config, &settings, &connectivity),
        };
        tracing::info!(
            "Sync pass started for {} module(s) (low bandwidth: {})",
            modules.len(),
            ctx.fetch_options.low_bandwidth
        );

        let pending: Vec<_> = modules
            .into_iter()
            .map(|module| self.sync_module(module, &ctx))
            .collect();
        let mut reports: Vec<ModuleReport> = stream::iter(pending)
            .buffer_unordered(self.inner.config.module_concurrency.max(1))
            .collect()
            .await;
        reports.sort_by_key(|report| report.module);

        let status = pass_status(&reports);
        let finished_at = now_millis();
        self.inner.publish(|snapshot| {
            snapshot.state = SyncState::after_pass(status);
            snapshot.last_outcome = Some(status);
            if status != PassStatus::Failed {
                snapshot.last_sync_time = Some(finished_at);
            }
        });
        tracing::info!(
            "Sync pass finished: {} in {}ms",
            status.as_str(),
            clock.elapsed().as_millis()
        );

        SyncReport {
            pass_id,
            trigger,
            status,
            modules: reports,
            started_at,
            finished_at,
            follow_up: None,
        }
    }

    async fn sync_module(&self, module: SyncModule, ctx: &PassContext) -> ModuleReport {
        let clock = Instant::now();
        let mut report = self.sync_module_inner(module, ctx).await;
        report.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Some(reason) = &report.error {
            let error = Error::ModuleSyncFailed {
                module,
                reason: reason.clone(),
            };
            tracing::warn!("{error}");
        }
        report
    }

    async fn sync_module_inner(&self, module: SyncModule, ctx: &PassContext) -> ModuleReport {
        let config = &self.inner.config;
        let store = self.inner.store.as_ref();
        let ledger = Ledger::new(store);

        let entry = match ledger.get_or_default(module).await {
            Ok(entry) => entry,
            Err(error) => return failed_report(module, &error),
        };

        if ctx.trigger.is_automatic()
            && policy::is_backed_off(&entry, config.max_consecutive_failures, now_millis())
        {
            tracing::debug!(
                "Skipping {module} after {} consecutive failures",
                entry.consecutive_failures
            );
            return ModuleReport::new(module, ModuleOutcome::Skipped);
        }

        let Some(processor) = self.inner.processors.get(module) else {
            return failed_report(module, &"no processor registered");
        };

        let attempt_at = now_millis();
        let full_resync = entry.needs_full_resync(processor.schema_version());
        let since = if full_resync { 0 } else { entry.last_sync_time };

        let mut in_progress = entry;
        in_progress.sync_status = LedgerStatus::InProgress;
        in_progress.last_attempt_at = Some(attempt_at);
        if let Err(error) = ledger.put(&in_progress).await {
            return failed_report(module, &error);
        }
        tracing::debug!("Fetching {module} since {since}");

        let work = async {
            let changes = self
                .inner
                .fetcher
                .fetch_module_changes(module, since, ctx.fetch_options)
                .await
                .map_err(StepError::Fetch)?;
            let written_at = now_millis();
            let stats = processor
                .reconcile(store, &changes, written_at)
                .await
                .map_err(StepError::Reconcile)?;
            // Rows the full payload did not rewrite are gone at the origin.
            if full_resync && !stats.all_failed() {
                let pruned = Records::new(store)
                    .prune_older_than(module, written_at)
                    .await
                    .map_err(StepError::Store)?;
                tracing::info!("Dropped {pruned} stale {module} row(s) after a full resync");
            }
            Ok::<_, StepError>(stats)
        };
        let result = tokio::time::timeout(config.module_timeout(), work).await;

        let mut report = ModuleReport::new(module, ModuleOutcome::Failed);
        report.since = since;
        let mut next = in_progress;
        let advance = match result {
            Ok(Ok(stats)) => {
                let all_failed = stats.all_failed();
                if all_failed {
                    report.error = Some(format!("all {} record(s) rejected", stats.failed));
                } else {
                    let partial = stats.is_partial();
                    report.outcome = if partial {
                        ModuleOutcome::Partial
                    } else {
                        ModuleOutcome::Success
                    };
                    next.sync_status = if partial {
                        LedgerStatus::Partial
                    } else {
                        LedgerStatus::Success
                    };
                    next.schema_version = processor.schema_version();
                    next.consecutive_failures = 0;
                    next.last_error = None;
                }
                report.stats = stats;
                !all_failed || config.advance_on_reconcile_failure
            }
            Ok(Err(StepError::Fetch(error))) => {
                report.error = Some(compact_text(&error.to_string()));
                error.bytes_received
            }
            Ok(Err(StepError::Store(error))) => {
                report.error = Some(compact_text(&error.to_string()));
                false
            }
            Ok(Err(StepError::Reconcile(error))) => {
                report.error = Some(compact_text(&error.to_string()));
                config.advance_on_reconcile_failure
            }
            Err(_) => {
                report.outcome = ModuleOutcome::TimedOut;
                report.error = Some(format!(
                    "timed out after {}s",
                    config.module_timeout().as_secs()
                ));
                false
            }
        };

        if !report.outcome.succeeded() {
            next.sync_status = LedgerStatus::Failed;
            next.consecutive_failures = next.consecutive_failures.saturating_add(1);
            next.last_error = report.error.clone();
        }
        if advance {
            next.last_sync_time = next.last_sync_time.max(attempt_at);
        }

        if let Err(error) = ledger.put(&next).await {
            report.outcome = ModuleOutcome::Failed;
            report.error = Some(compact_text(&error.to_string()));
        }
        report
    }

    fn subscribe_connectivity(&self, handle: Handle) -> Subscription {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.network.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                Self { inner }.on_connectivity(event, &handle);
            }
        })
    }

    fn on_connectivity(&self, event: ConnectivityEvent, handle: &Handle) {
        let online = event.current.is_connected;
        self.inner.publish(|status| {
            status.is_online = online;
            if !online {
                status.state = SyncState::Offline;
            } else if status.state == SyncState::Offline {
                status.state = SyncState::Idle;
            }
        });

        let auto_sync = self.inner.settings.sync_settings().auto_sync_enabled;
        let options = match event.transition {
            Transition::Reconnected if auto_sync => SyncOptions::triggered(SyncTrigger::Reconnect),
            Transition::Reconnected if self.pending_sync_requested() => {
                SyncOptions::modules(Vec::new()).with_trigger(SyncTrigger::Reconnect)
            }
            Transition::Upgraded if auto_sync => SyncOptions::triggered(SyncTrigger::Upgrade),
            _ => return,
        };

        tracing::debug!("Connectivity {:?}; starting sync", event.transition);
        let manager = self.clone();
        handle.spawn(async move {
            manager.sync_data(options).await;
        });
    }

    fn spawn_periodic(&self, handle: &Handle) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            loop {
                let Some(minutes) = weak
                    .upgrade()
                    .map(|inner| inner.settings.sync_settings().sync_interval_minutes)
                else {
                    return;
                };
                let interval = Duration::from_secs(u64::from(minutes.max(1)) * 60);
                tokio::time::sleep(interval).await;

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let manager = Self { inner };
                let auto_sync = manager.inner.settings.sync_settings().auto_sync_enabled;
                if auto_sync && manager.inner.network.current_state().is_connected {
                    manager
                        .sync_data(SyncOptions::triggered(SyncTrigger::Periodic))
                        .await;
                }
            }
        })
    }
}

/// Pass status from module outcomes. A module that skipped records keeps an
/// otherwise clean pass at `Partial`.
fn pass_status(reports: &[ModuleReport]) -> PassStatus {
    match PassStatus::aggregate(reports.iter().map(|report| report.outcome.succeeded())) {
        PassStatus::Success
            if reports
                .iter()
                .any(|report| report.outcome == ModuleOutcome::Partial) =>
        {
            PassStatus::Partial
        }
        status => status,
    }
}

fn failed_report(module: SyncModule, error: &impl std::fmt::Display) -> ModuleReport {
    let mut report = ModuleReport::new(module, ModuleOutcome::Failed);
    report.error = Some(compact_text(&error.to_string()));
    report
}
