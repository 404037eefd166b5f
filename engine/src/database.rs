//! Database orchestrator.
//!
//! A [`Database`] owns the table registry, the connection to the local
//! store and the sync machinery. Its lifecycle is two-phase: tables are
//! registered while the database is closed, then [`Database::listen`] opens
//! the store (creating missing tables on a version bump) and starts the
//! background sync triggers.
//!
//! # Sync triggers
//!
//! With an adapter configured, a sweep of every table runs:
//! - right after opening, when online
//! - on every offline-to-online transition of [`Connectivity`]
//! - every `sync_interval`, when configured
//! - on [`Database::synchronize`]
//!
//! Each local write additionally sends the written record on its own. Sync
//! errors never reach the writer; they are logged and recorded in the
//! table's [`TableHealth`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, OnceCell};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::merge::{self, MergeStats};
use crate::store::{StoreBackend, StoreHandle};
use crate::sync::{SyncAdapter, SyncMessage};
use crate::{
    error::Result, Clock, Connectivity, DatabaseName, Error, Record, SchemaVersion, SystemClock,
    Table, TableName, TableSpec, Timestamp,
};

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Physical database name
    pub name: DatabaseName,
    /// Schema version; raise it to create newly registered tables
    pub version: SchemaVersion,
    /// Delete the physical database before opening (debugging aid)
    pub reset_on_open: bool,
    /// Run a full sweep on this interval while online
    pub sync_interval: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: "tablesync".to_string(),
            version: 1,
            reset_on_open: false,
            sync_interval: None,
        }
    }
}

impl DatabaseConfig {
    pub fn new(name: impl Into<DatabaseName>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: SchemaVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_reset_on_open(mut self, reset: bool) -> Self {
        self.reset_on_open = reset;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatabaseState {
    Closed,
    Opening,
    Open,
}

/// Observable sync health of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableHealth {
    pub last_success: Option<Timestamp>,
    pub last_failure: Option<Timestamp>,
    /// Error of the most recent failed exchange, cleared once nothing is pending
    pub last_error: Option<String>,
    /// Unsynced records in the table after the most recent exchange
    pub pending: usize,
}

/// Result of syncing one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSyncOutcome {
    pub table: TableName,
    /// Records sent to the authority
    pub sent: usize,
    pub result: Result<MergeStats>,
}

/// Per-table results of a sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub tables: Vec<TableSyncOutcome>,
}

impl SyncReport {
    /// Whether every table synced.
    pub fn is_success(&self) -> bool {
        self.tables.iter().all(|t| t.result.is_ok())
    }

    pub fn outcome(&self, table: &str) -> Option<&TableSyncOutcome> {
        self.tables.iter().find(|t| t.table == table)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TableSyncOutcome> {
        self.tables.iter().filter(|t| t.result.is_err())
    }
}

/// Builder for [`Database`].
pub struct DatabaseBuilder {
    config: DatabaseConfig,
    backend: Arc<dyn StoreBackend>,
    adapter: Option<Arc<dyn SyncAdapter>>,
    connectivity: Connectivity,
    clock: Arc<dyn Clock>,
}

impl DatabaseBuilder {
    /// Sync transport. Without one the database is purely local.
    pub fn adapter(mut self, adapter: Arc<dyn SyncAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Database {
        Database {
            inner: Arc::new(DatabaseInner {
                config: self.config,
                backend: self.backend,
                adapter: self.adapter,
                connectivity: self.connectivity,
                clock: self.clock,
                tables: DashMap::new(),
                write_gates: DashMap::new(),
                sync_gates: DashMap::new(),
                store: OnceCell::new(),
                opening: AtomicBool::new(false),
                started: AtomicBool::new(false),
                health: DashMap::new(),
                tasks: Mutex::new(JoinSet::new()),
                background: Mutex::new(Vec::new()),
            }),
        }
    }
}

struct DatabaseInner {
    config: DatabaseConfig,
    backend: Arc<dyn StoreBackend>,
    adapter: Option<Arc<dyn SyncAdapter>>,
    connectivity: Connectivity,
    clock: Arc<dyn Clock>,
    tables: DashMap<TableName, Arc<TableSpec>>,
    /// Serializes writes per table
    write_gates: DashMap<TableName, Arc<Mutex<()>>>,
    /// Serializes exchanges per table, held from send through merge
    sync_gates: DashMap<TableName, Arc<Mutex<()>>>,
    store: OnceCell<Arc<dyn StoreHandle>>,
    opening: AtomicBool,
    started: AtomicBool,
    health: DashMap<TableName, TableHealth>,
    /// In-flight sync exchanges, awaited by `settle`
    tasks: Mutex<JoinSet<()>>,
    /// Trigger loops, aborted on drop
    background: Mutex<Vec<AbortHandle>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        for handle in self.background.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// Offline-first database handle. Clones share the same database.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.config.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn builder(config: DatabaseConfig, backend: Arc<dyn StoreBackend>) -> DatabaseBuilder {
        DatabaseBuilder {
            config,
            backend,
            adapter: None,
            connectivity: Connectivity::default(),
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    pub fn state(&self) -> DatabaseState {
        if self.inner.store.initialized() {
            DatabaseState::Open
        } else if self.inner.opening.load(Ordering::SeqCst) {
            DatabaseState::Opening
        } else {
            DatabaseState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == DatabaseState::Open
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Register a table and get its handle.
    ///
    /// Registration is only possible before [`Database::listen`]. The handle
    /// fails with `NotOpen` until the database is open.
    pub fn register_table(&self, spec: TableSpec) -> Result<Table> {
        if self.state() != DatabaseState::Closed {
            return Err(Error::RegistrationClosed);
        }

        match self.inner.tables.entry(spec.name.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateTable(spec.name)),
            Entry::Vacant(slot) => {
                let spec = Arc::new(spec);
                slot.insert(Arc::clone(&spec));
                self.inner
                    .write_gates
                    .insert(spec.name.clone(), Arc::new(Mutex::new(())));
                self.inner
                    .sync_gates
                    .insert(spec.name.clone(), Arc::new(Mutex::new(())));
                tracing::debug!(table = %spec.name, key = %spec.key_strategy, "Table registered");
                Ok(Table::new(self.clone(), spec))
            }
        }
    }

    /// Handle for a registered table.
    pub fn table(&self, name: &str) -> Option<Table> {
        self.inner
            .tables
            .get(name)
            .map(|entry| Table::new(self.clone(), Arc::clone(entry.value())))
    }

    /// Open the local store and start the sync triggers.
    ///
    /// Returns once the store is ready. Calling it again is a no-op; if
    /// opening failed, the next call retries.
    pub async fn listen(&self) -> Result<()> {
        self.inner
            .store
            .get_or_try_init(|| self.open_store())
            .await?;

        if !self.inner.started.swap(true, Ordering::SeqCst) {
            self.start_background().await;
        }
        Ok(())
    }

    async fn open_store(&self) -> Result<Arc<dyn StoreHandle>> {
        self.inner.opening.store(true, Ordering::SeqCst);
        let result = self.open_store_inner().await;
        self.inner.opening.store(false, Ordering::SeqCst);

        if let Err(e) = &result {
            tracing::error!(database = %self.inner.config.name, error = %e, "Failed to open database");
        }
        result
    }

    async fn open_store_inner(&self) -> Result<Arc<dyn StoreHandle>> {
        let inner = &self.inner;
        let config = &inner.config;

        if let Some(adapter) = &inner.adapter {
            if let Err(e) = adapter.initialize().await {
                tracing::warn!(adapter = adapter.name(), error = %e, "Sync adapter failed to initialize");
            }
        }

        if config.reset_on_open {
            tracing::warn!(database = %config.name, "Resetting local database");
            inner.backend.delete_database(&config.name).await?;
        }

        let opened = inner.backend.open(&config.name, config.version).await?;
        let specs = self.registered_specs();

        if opened.needs_upgrade(config.version) {
            for spec in &specs {
                if opened.handle.create_table_if_missing(spec).await? {
                    tracing::info!(table = %spec.name, key = %spec.key_strategy, "Created table");
                }
            }
            opened.handle.commit_version(config.version).await?;
            tracing::info!(
                database = %config.name,
                from = ?opened.previous_version,
                to = config.version,
                "Schema upgraded"
            );
        } else {
            let existing = opened.handle.table_names().await?;
            for spec in specs.iter().filter(|s| !existing.contains(&s.name)) {
                tracing::warn!(
                    table = %spec.name,
                    version = config.version,
                    "Table missing from store; raise the schema version to create it"
                );
            }
        }

        tracing::info!(
            database = %config.name,
            backend = inner.backend.name(),
            tables = specs.len(),
            "Database open"
        );
        Ok(opened.handle)
    }

    async fn start_background(&self) {
        let Some(adapter) = self.inner.adapter.clone() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let mut handles = Vec::new();

        handles.push(spawn_connectivity_watcher(
            weak.clone(),
            self.inner.connectivity.clone(),
        ));

        if let Some(pushes) = adapter.subscribe_pushes() {
            handles.push(spawn_push_consumer(weak.clone(), pushes));
        }

        if let Some(period) = self.inner.config.sync_interval.filter(|p| !p.is_zero()) {
            handles.push(spawn_periodic_sweep(weak, period));
        }

        self.inner.background.lock().await.extend(handles);

        if self.is_online() {
            self.spawn_sweep().await;
        }
    }

    /// Sweep every table: send its unsynced records and merge the reply.
    ///
    /// Returns an empty report without an adapter or while offline. Table
    /// failures are reported per table and never fail the sweep as a whole.
    pub async fn synchronize(&self) -> Result<SyncReport> {
        self.handle()?;

        let Some(adapter) = self.inner.adapter.clone() else {
            return Ok(SyncReport::default());
        };
        if !self.is_online() {
            tracing::debug!(database = %self.inner.config.name, "Offline, skipping sync");
            return Ok(SyncReport::default());
        }

        let specs = self.registered_specs();
        let tables = futures::future::join_all(
            specs
                .iter()
                .map(|spec| self.sync_table(adapter.as_ref(), spec)),
        )
        .await;

        let report = SyncReport { tables };
        tracing::info!(
            database = %self.inner.config.name,
            tables = report.tables.len(),
            failed = report.failures().count(),
            "Sync sweep finished"
        );
        Ok(report)
    }

    /// Apply records pushed by the authority.
    pub async fn merge(&self, message: SyncMessage) -> Result<MergeStats> {
        self.handle()?;
        let spec = self.spec(&message.table)?;

        let stats = self.merge_into(&spec, message.items).await?;
        tracing::debug!(
            table = %spec.name,
            applied = stats.applied_remote,
            kept = stats.kept_local,
            "Merged remote records"
        );
        Ok(stats)
    }

    /// Sync health of a table, once it has attempted an exchange.
    pub fn sync_health(&self, table: &str) -> Option<TableHealth> {
        self.inner.health.get(table).map(|h| h.clone())
    }

    /// Wait for every in-flight sync exchange to finish.
    pub async fn settle(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(error = %e, "Sync task panicked");
                }
            }
        }
    }

    async fn sync_table(&self, adapter: &dyn SyncAdapter, spec: &TableSpec) -> TableSyncOutcome {
        let gate = self.sync_gate(&spec.name);
        let _guard = gate.lock().await;

        let unsynced = match self.unsynced(&spec.name).await {
            Ok(records) => records,
            Err(e) => return self.finish_exchange(spec, 0, Err(e)).await,
        };
        self.exchange(adapter, spec, unsynced).await
    }

    async fn unsynced(&self, table: &str) -> Result<Vec<Record>> {
        let handle = self.handle()?;
        let records = handle.get_all(table).await?;
        Ok(records.into_iter().filter(|r| !r.is_synced()).collect())
    }

    /// Send `items`, merge the reply and record the outcome.
    ///
    /// Callers hold the table's sync gate, so a reply never merges over a
    /// write that a concurrent exchange for the same table was sending.
    async fn exchange(
        &self,
        adapter: &dyn SyncAdapter,
        spec: &TableSpec,
        items: Vec<Record>,
    ) -> TableSyncOutcome {
        let sent = items.len();
        let message = SyncMessage::new(spec.name.clone(), items);

        let result = match adapter.synchronize(message).await {
            Ok(reply) if reply.table != spec.name => Err(Error::sync(format!(
                "reply for table '{}' does not match request for '{}'",
                reply.table, spec.name
            ))),
            Ok(reply) => self.merge_into(spec, reply.items).await,
            Err(e) => Err(e),
        };
        self.finish_exchange(spec, sent, result).await
    }

    async fn finish_exchange(
        &self,
        spec: &TableSpec,
        sent: usize,
        result: Result<MergeStats>,
    ) -> TableSyncOutcome {
        let now = self.now();
        let pending = match self.unsynced(&spec.name).await {
            Ok(records) => records.len(),
            Err(_) => sent,
        };

        let mut health = self.inner.health.entry(spec.name.clone()).or_default();
        health.pending = pending;
        match &result {
            Ok(stats) => {
                tracing::debug!(
                    table = %spec.name,
                    sent,
                    applied = stats.applied_remote,
                    kept = stats.kept_local,
                    pending,
                    "Table synchronized"
                );
                health.last_success = Some(now);
                if pending == 0 {
                    health.last_error = None;
                }
            }
            Err(e) => {
                tracing::warn!(table = %spec.name, sent, error = %e, "Table sync failed");
                health.last_failure = Some(now);
                health.last_error = Some(e.to_string());
            }
        }
        drop(health);

        TableSyncOutcome {
            table: spec.name.clone(),
            sent,
            result,
        }
    }

    /// Upsert returned items, keyed by their identity, and mark them synced.
    ///
    /// The reply is validated up front so a malformed one writes nothing.
    async fn merge_into(&self, spec: &TableSpec, items: Vec<Record>) -> Result<MergeStats> {
        let handle = self.handle()?;

        for item in &items {
            let identity = item.identity.as_ref().ok_or_else(|| {
                Error::sync(format!("reply for '{}' has an item without identity", spec.name))
            })?;
            let key = spec
                .extract_key(&item.payload)
                .map_err(|e| Error::sync(format!("reply for '{}': {}", spec.name, e)))?;
            if let Some(key) = key {
                if &key != identity {
                    return Err(Error::sync(format!(
                        "reply for '{}' has identity {} but payload key {}",
                        spec.name, identity, key
                    )));
                }
            }
        }

        let gate = self.write_gate(&spec.name);
        let _guard = gate.lock().await;

        let mut stats = MergeStats::default();
        for item in &items {
            let Some(identity) = item.identity.as_ref() else {
                continue;
            };
            let local = handle.get(&spec.name, identity).await?;
            let (merged, resolution) = merge::merge_record(local.as_ref(), item);
            handle.put(&spec.name, &merged).await?;
            stats.record(resolution);
        }
        Ok(stats)
    }

    /// Send a freshly written record on its own, in the background.
    pub(crate) async fn after_write(&self, spec: &Arc<TableSpec>, record: Record) {
        let Some(adapter) = self.inner.adapter.clone() else {
            return;
        };
        if !self.is_online() {
            return;
        }

        let db = self.clone();
        let spec = Arc::clone(spec);
        self.track(async move {
            let gate = db.sync_gate(&spec.name);
            let _guard = gate.lock().await;
            db.exchange(adapter.as_ref(), &spec, vec![record]).await;
        })
        .await;
    }

    async fn spawn_sweep(&self) {
        let db = self.clone();
        self.track(async move {
            if let Err(e) = db.synchronize().await {
                tracing::warn!(error = %e, "Background sync failed");
            }
        })
        .await;
    }

    async fn track<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.inner.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    pub(crate) fn handle(&self) -> Result<Arc<dyn StoreHandle>> {
        self.inner.store.get().cloned().ok_or(Error::NotOpen)
    }

    pub(crate) fn write_gate(&self, table: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.inner
                .write_gates
                .entry(table.to_string())
                .or_default()
                .value(),
        )
    }

    fn sync_gate(&self, table: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.inner
                .sync_gates
                .entry(table.to_string())
                .or_default()
                .value(),
        )
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    fn spec(&self, table: &str) -> Result<Arc<TableSpec>> {
        self.inner
            .tables
            .get(table)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }

    fn registered_specs(&self) -> Vec<Arc<TableSpec>> {
        let mut specs: Vec<_> = self
            .inner
            .tables
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

fn upgrade(weak: &Weak<DatabaseInner>) -> Option<Database> {
    weak.upgrade().map(|inner| Database { inner })
}

fn spawn_connectivity_watcher(weak: Weak<DatabaseInner>, connectivity: Connectivity) -> AbortHandle {
    let mut online = connectivity.subscribe();
    // Baseline taken before spawning so a flip ahead of the first poll is seen
    let mut was_online = *online.borrow_and_update();
    tokio::spawn(async move {
        while online.changed().await.is_ok() {
            let now_online = *online.borrow_and_update();
            if now_online && !was_online {
                let Some(db) = upgrade(&weak) else {
                    break;
                };
                tracing::info!(database = %db.inner.config.name, "Back online, synchronizing");
                db.spawn_sweep().await;
            }
            was_online = now_online;
        }
    })
    .abort_handle()
}

fn spawn_push_consumer(
    weak: Weak<DatabaseInner>,
    mut pushes: broadcast::Receiver<SyncMessage>,
) -> AbortHandle {
    tokio::spawn(async move {
        loop {
            match pushes.recv().await {
                Ok(message) => {
                    let Some(db) = upgrade(&weak) else {
                        break;
                    };
                    let table = message.table.clone();
                    if let Err(e) = db.merge(message).await {
                        tracing::warn!(table = %table, error = %e, "Failed to merge server push");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped server pushes, next sweep will catch up");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .abort_handle()
}

fn spawn_periodic_sweep(weak: Weak<DatabaseInner>, period: Duration) -> AbortHandle {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(db) = upgrade(&weak) else {
                break;
            };
            if let Err(e) = db.synchronize().await {
                tracing::warn!(error = %e, "Periodic sync failed");
            }
        }
    })
    .abort_handle()
}
