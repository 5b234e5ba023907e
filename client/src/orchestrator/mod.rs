//! Sync orchestrator.
//!
//! Owns the subscriptions for the configured tables, routes every incoming
//! operation through the resolver and the local store, and keeps the
//! aggregate [`SyncState`].
//!
//! Lifecycle: `Uninitialized -> Initializing -> Active -> Stopping -> Uninitialized`,
//! with `Error` entered when the local store lacks a required capability or
//! a forced resync cannot reopen the subscriptions.
//!
//! Locking: the state and the up-to-date map sit behind `parking_lot`
//! mutexes that are never held across an await. Lifecycle calls serialize
//! on an async control lock; subscription callbacks never take it, so
//! shutdown can wait for in-flight applies to finish. Shutdown signals the
//! cancel channel before queueing on that lock, which aborts a start or a
//! resync still waiting for its initial sync.

mod monitor;

pub use monitor::{IntervalTicker, Ticker, TickerFactory};

use crate::{
    config::SyncConfig,
    error::{StoreError, SyncError, SyncResult, TransportError},
    events::{EventBus, SyncEvent, SyncObserver},
    shape::{
        ShapeDescriptor, ShapeHandler, ShapeTransport, SubscriptionHandle, SubscriptionRegistry,
    },
    store::{LocalStore, RefetchPolicy, TableStats},
    writer::{ChangePusher, HttpChangePusher, PushReport},
};
use async_trait::async_trait;
use chrono::Utc;
use futures::future;
use monitor::Monitor;
use ordo_sync_engine::{
    Action, ApplyAction, Operation, Origin, Resolver, SyncConflict, SyncRecord, SyncState,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Weak},
};
use tokio::{sync::watch, time};

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Active,
    Stopping,
    Error,
}

/// State shared with subscription callbacks and the monitor.
pub(crate) struct Inner<R: SyncRecord> {
    config: SyncConfig,
    shapes: Vec<ShapeDescriptor>,
    resolver: Resolver,
    refetch_policy: RefetchPolicy,
    store: Arc<dyn LocalStore<R>>,
    transport: Arc<dyn ShapeTransport<R>>,
    registry: Arc<SubscriptionRegistry>,
    events: EventBus,
    state: Mutex<SyncState<R>>,
    /// Last up-to-date flag the monitor saw, per shape key
    last_up_to_date: Mutex<HashMap<String, bool>>,
    lifecycle: watch::Sender<Lifecycle>,
}

impl<R: SyncRecord> Inner<R> {
    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        let previous = self.lifecycle.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "Lifecycle changed");
        }
    }

    /// Resolve and write one remote operation, then account for it.
    async fn apply_remote(&self, table: &str, op: &Operation<R>) -> SyncResult<ApplyAction> {
        match self.store.apply_remote(table, op, &self.resolver).await {
            Ok(resolution) => {
                let action = resolution.action.kind();
                self.state.lock().record(&resolution);

                if let Action::Defer(conflict) = &resolution.action {
                    tracing::info!(
                        table = %table,
                        record_id = %conflict.record_id,
                        kind = ?conflict.kind,
                        "Conflict deferred for manual resolution"
                    );
                    self.events.emit(&SyncEvent::ConflictDetected {
                        table: table.to_string(),
                        record_id: conflict.record_id.clone(),
                        kind: conflict.kind,
                    });
                } else if resolution.collided {
                    tracing::debug!(
                        table = %table,
                        record_id = %resolution.record_id,
                        action = %action,
                        "Collision resolved automatically"
                    );
                }
                Ok(action)
            }
            Err(source) => {
                let record_id = op.record_id().to_string();
                tracing::warn!(
                    table = %table,
                    record_id = %record_id,
                    error = %source,
                    "Failed to apply remote operation"
                );
                self.state.lock().record_failure();
                self.events.emit(&SyncEvent::ApplyFailed {
                    table: table.to_string(),
                    record_id: Some(record_id.clone()),
                    error: source.to_string(),
                });
                Err(SyncError::ConflictApplication { record_id, source })
            }
        }
    }

    async fn initial_sync_complete(&self, table: &str) {
        let stats = match self.store.stats(table).await {
            Ok(stats) => stats,
            Err(err) => {
                tracing::warn!(table = %table, error = %err, "Failed to gather table stats");
                TableStats::default()
            }
        };

        let at = Utc::now();
        let event = {
            let mut state = self.state.lock();
            state.touch(at);
            SyncEvent::InitialSyncComplete {
                table: table.to_string(),
                stats,
                synced_records: state.synced_records,
                conflict_count: state.conflict_count,
                failed_records: state.failed_records,
                at,
            }
        };

        tracing::info!(table = %table, "Initial sync complete");
        self.events.emit(&event);
    }

    /// One monitor pass. Raises `sync-up-to-date` for every subscription that
    /// became up to date since the previous pass.
    fn poll_up_to_date(&self) -> usize {
        if self.lifecycle() != Lifecycle::Active {
            return 0;
        }

        let caught_up: Vec<String> = {
            let mut seen = self.last_up_to_date.lock();
            self.shapes
                .iter()
                .filter_map(|shape| {
                    let key = shape.shape_key();
                    let up_to_date = self
                        .registry
                        .get(&key)
                        .is_some_and(|handle| handle.is_up_to_date());
                    let was = seen.insert(key, up_to_date).unwrap_or(false);
                    (up_to_date && !was).then(|| shape.table.clone())
                })
                .collect()
        };

        let at = Utc::now();
        for table in &caught_up {
            let event = {
                let mut state = self.state.lock();
                state.touch(at);
                SyncEvent::SyncUpToDate {
                    table: table.clone(),
                    synced_records: state.synced_records,
                    conflict_count: state.conflict_count,
                    at,
                }
            };
            tracing::info!(table = %table, "Sync up to date");
            self.events.emit(&event);
        }
        caught_up.len()
    }
}

/// Subscription callbacks. Holds the orchestrator weakly so a leaked
/// subscription cannot keep it alive.
struct Handler<R: SyncRecord> {
    inner: Weak<Inner<R>>,
}

#[async_trait]
impl<R: SyncRecord> ShapeHandler<R> for Handler<R> {
    async fn on_operation(&self, shape: &ShapeDescriptor, op: Operation<R>) {
        let Some(inner) = self.inner.upgrade() else {
            tracing::warn!(
                table = %shape.table,
                record_id = %op.record_id(),
                "Orchestrator dropped, operation not applied"
            );
            return;
        };
        // Counted and reported inside apply_remote
        let _ = inner.apply_remote(&shape.table, &op).await;
    }

    async fn on_rejected(&self, shape: &ShapeDescriptor, key: Option<String>, reason: String) {
        let Some(inner) = self.inner.upgrade() else {
            tracing::warn!(table = %shape.table, key = ?key, "Orchestrator dropped, rejected row not counted");
            return;
        };
        tracing::warn!(table = %shape.table, key = ?key, reason = %reason, "Rejected shape row");
        inner.state.lock().record_failure();
        inner.events.emit(&SyncEvent::ApplyFailed {
            table: shape.table.clone(),
            record_id: key,
            error: reason,
        });
    }

    async fn on_initial_sync(&self, shape: &ShapeDescriptor) {
        if let Some(inner) = self.inner.upgrade() {
            inner.initial_sync_complete(&shape.table).await;
        }
    }

    async fn on_must_refetch(&self, shape: &ShapeDescriptor) -> Result<(), StoreError> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        let removed = inner
            .store
            .prepare_refetch(&shape.table, inner.refetch_policy)
            .await?;

        tracing::warn!(table = %shape.table, removed, "Shape must be refetched");
        inner.events.emit(&SyncEvent::MustRefetch {
            table: shape.table.clone(),
            removed,
        });
        Ok(())
    }

    async fn on_error(&self, shape: &ShapeDescriptor, error: &TransportError) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.state.lock().record_subscription_error();
        inner.events.emit(&SyncEvent::SubscriptionError {
            table: shape.table.clone(),
            error: error.to_string(),
        });
    }
}

#[derive(Default)]
struct Control {
    monitor: Option<Monitor>,
}

/// Drives sync for the configured tables.
pub struct SyncOrchestrator<R: SyncRecord> {
    inner: Arc<Inner<R>>,
    control: tokio::sync::Mutex<Control>,
    pusher: Option<Arc<dyn ChangePusher<R>>>,
    push_lock: tokio::sync::Mutex<()>,
    ticker: TickerFactory,
    /// Bumped by shutdown to abort a start or resync in progress
    cancel: watch::Sender<u64>,
}

impl<R: SyncRecord> SyncOrchestrator<R> {
    pub fn builder(
        config: SyncConfig,
        store: Arc<dyn LocalStore<R>>,
        transport: Arc<dyn ShapeTransport<R>>,
    ) -> SyncOrchestratorBuilder<R> {
        SyncOrchestratorBuilder {
            config,
            store,
            transport,
            registry: None,
            ticker: None,
            pusher: None,
            observers: Vec::new(),
            refetch_policy: RefetchPolicy::default(),
        }
    }

    /// Start syncing.
    ///
    /// Verifies the store, probes the endpoint, opens one subscription per
    /// table and returns once the first table finished its initial sync.
    /// Calling it while active does nothing. A concurrent [`shutdown`]
    /// aborts it with [`SyncError::Cancelled`].
    ///
    /// [`shutdown`]: SyncOrchestrator::shutdown
    pub async fn initialize(&self) -> SyncResult<()> {
        let cancel = self.cancel.subscribe();
        let mut control = self.control.lock().await;
        if self.inner.lifecycle() == Lifecycle::Active {
            tracing::info!("Sync already active, ignoring initialize");
            return Ok(());
        }

        self.inner.set_lifecycle(Lifecycle::Initializing);
        match cancellable(cancel, self.start()).await {
            Ok(()) => {
                self.inner.state.lock().is_initialized = true;
                self.inner.last_up_to_date.lock().clear();
                self.inner.set_lifecycle(Lifecycle::Active);

                if self.inner.config.enable_real_time_sync {
                    let ticker = (self.ticker)(self.inner.config.sync_interval);
                    control.monitor = Some(Monitor::spawn(Arc::downgrade(&self.inner), ticker));
                }

                tracing::info!(
                    tables = ?self.inner.config.tables,
                    strategy = %self.inner.resolver.strategy(),
                    real_time = self.inner.config.enable_real_time_sync,
                    "Sync active"
                );
                Ok(())
            }
            Err(err) => {
                if matches!(err, SyncError::Cancelled) {
                    tracing::info!("Sync initialization cancelled");
                } else {
                    tracing::error!(error = %err, "Sync initialization failed");
                }
                self.close_subscriptions().await;
                let next = match err {
                    SyncError::MissingCapability(_) => Lifecycle::Error,
                    _ => Lifecycle::Uninitialized,
                };
                self.inner.set_lifecycle(next);
                Err(err)
            }
        }
    }

    async fn start(&self) -> SyncResult<()> {
        for table in &self.inner.config.tables {
            self.inner
                .store
                .ensure_support(table)
                .await
                .map_err(|err| {
                    if err.is_missing_capability() {
                        SyncError::MissingCapability(err.to_string())
                    } else {
                        SyncError::Store(err)
                    }
                })?;
        }

        let limit = self.inner.config.probe_timeout;
        match time::timeout(limit, self.inner.transport.probe()).await {
            Err(_) => return Err(SyncError::ConnectivityTimeout(limit)),
            Ok(Err(err)) => return Err(SyncError::Connectivity(err)),
            Ok(Ok(())) => {}
        }

        self.open_subscriptions().await
    }

    /// Open every configured shape and wait for the first one's initial sync.
    async fn open_subscriptions(&self) -> SyncResult<()> {
        let handler: Arc<dyn ShapeHandler<R>> = Arc::new(Handler {
            inner: Arc::downgrade(&self.inner),
        });

        let handles: Vec<Arc<SubscriptionHandle>> = self
            .inner
            .shapes
            .iter()
            .map(|shape| {
                self.inner
                    .registry
                    .open(shape, &self.inner.transport, &handler)
            })
            .collect();

        let Some(first) = handles.first() else {
            return Ok(());
        };
        let table = first.table().to_string();

        let waited = match self.inner.config.initial_sync_timeout {
            Some(limit) => time::timeout(limit, first.wait_initial_sync())
                .await
                .map_err(|_| SyncError::InitialSync {
                    table: table.clone(),
                    reason: format!("timed out after {limit:?}"),
                })?,
            None => first.wait_initial_sync().await,
        };

        waited.map_err(|err| match err {
            TransportError::Network(_) | TransportError::Unauthorized(_) => {
                SyncError::Connectivity(err)
            }
            other => SyncError::InitialSync {
                table,
                reason: other.to_string(),
            },
        })
    }

    async fn close_subscriptions(&self) -> usize {
        let keys: Vec<String> = self.inner.shapes.iter().map(ShapeDescriptor::shape_key).collect();
        let closed = future::join_all(keys.iter().map(|key| self.inner.registry.close(key))).await;
        closed.into_iter().filter(|closed| *closed).count()
    }

    /// Copy of the aggregate sync state.
    pub fn sync_state(&self) -> SyncState<R> {
        self.inner.state.lock().clone()
    }

    /// Pending conflicts awaiting manual resolution.
    pub fn conflicts(&self) -> Vec<SyncConflict<R>> {
        self.inner.state.lock().conflicts.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.inner.lifecycle.subscribe()
    }

    /// Subscriptions currently registered for the configured tables.
    pub fn handles(&self) -> Vec<Arc<SubscriptionHandle>> {
        self.inner
            .shapes
            .iter()
            .filter_map(|shape| self.inner.registry.get(&shape.shape_key()))
            .collect()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Apply one operation.
    ///
    /// Remote operations go through conflict resolution and are counted in
    /// the sync state; local ones are stored as pending changes.
    pub async fn apply(&self, table: &str, op: &Operation<R>) -> SyncResult<ApplyAction> {
        match op.origin {
            Origin::Remote => self.inner.apply_remote(table, op).await,
            Origin::Local => Ok(self.inner.store.write_local(table, op).await?),
        }
    }

    /// Settle a pending conflict with a caller-supplied record.
    ///
    /// The record is written as-is, bypassing the resolver, and becomes a
    /// pending local change.
    pub async fn resolve_conflict(&self, record_id: &str, resolution: R) -> SyncResult<()> {
        let table = self
            .inner
            .state
            .lock()
            .conflict(record_id)
            .map(|c| c.table.clone())
            .ok_or_else(|| SyncError::ConflictNotFound(record_id.to_string()))?;

        if resolution.id() != record_id {
            return Err(SyncError::ResolutionMismatch {
                expected: record_id.to_string(),
                actual: resolution.id().to_string(),
            });
        }

        let taken = self.inner.state.lock().take_conflict(record_id);
        let conflict = taken.ok_or_else(|| SyncError::ConflictNotFound(record_id.to_string()))?;

        if let Err(source) = self.inner.store.write_resolved(&table, &resolution).await {
            tracing::error!(
                table = %table,
                record_id = %record_id,
                error = %source,
                "Failed to write conflict resolution"
            );
            {
                let mut state = self.inner.state.lock();
                state.restore_conflict(conflict);
                state.record_failure();
            }
            self.inner.events.emit(&SyncEvent::ApplyFailed {
                table,
                record_id: Some(record_id.to_string()),
                error: source.to_string(),
            });
            return Err(SyncError::ConflictApplication {
                record_id: record_id.to_string(),
                source,
            });
        }

        {
            let mut state = self.inner.state.lock();
            state.resolved();
            state.touch(Utc::now());
        }
        tracing::info!(table = %table, record_id = %record_id, "Conflict resolved manually");
        self.inner.events.emit(&SyncEvent::ConflictResolved {
            table,
            record_id: record_id.to_string(),
        });
        Ok(())
    }

    /// Close and reopen every subscription, re-running initial sync.
    pub async fn force_sync_from_remote(&self) -> SyncResult<()> {
        let cancel = self.cancel.subscribe();
        let _control = self.control.lock().await;
        if self.inner.lifecycle() != Lifecycle::Active {
            return Err(SyncError::NotActive);
        }

        let closed = self.close_subscriptions().await;
        tracing::info!(closed, "Forcing sync from remote");
        self.inner.last_up_to_date.lock().clear();

        if let Err(err) = cancellable(cancel, self.open_subscriptions()).await {
            tracing::error!(error = %err, "Forced sync failed");
            self.close_subscriptions().await;
            self.inner.set_lifecycle(Lifecycle::Error);
            return Err(err);
        }
        Ok(())
    }

    /// Stop every subscription and reset the sync state. Safe to call repeatedly.
    ///
    /// A start or resync still waiting for its initial sync is cancelled
    /// first, so this never waits on a shape that does not catch up.
    pub async fn shutdown(&self) {
        self.cancel.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        let mut control = self.control.lock().await;
        let was_running = self.inner.lifecycle() != Lifecycle::Uninitialized;
        if was_running {
            self.inner.set_lifecycle(Lifecycle::Stopping);
        }

        if let Some(monitor) = control.monitor.take() {
            monitor.stop().await;
        }
        let closed = self.close_subscriptions().await;

        self.inner.state.lock().reset();
        self.inner.last_up_to_date.lock().clear();
        self.inner.set_lifecycle(Lifecycle::Uninitialized);

        if was_running {
            tracing::info!(closed, "Sync shut down");
        }
    }

    pub async fn restart(&self) -> SyncResult<()> {
        self.shutdown().await;
        self.initialize().await
    }

    /// Run one monitor pass. Returns the number of `sync-up-to-date` events raised.
    pub fn poll_up_to_date(&self) -> usize {
        self.inner.poll_up_to_date()
    }

    /// Send pending local changes for every table through the change pusher.
    ///
    /// Rows are marked sent only if they were not edited while the push was
    /// in flight.
    pub async fn push_local_changes(&self) -> SyncResult<PushReport> {
        let Some(pusher) = &self.pusher else {
            tracing::debug!("No change pusher configured");
            return Ok(PushReport::default());
        };
        let _guard = self.push_lock.lock().await;

        let mut report = PushReport::default();
        for table in &self.inner.config.tables {
            let changes = self.inner.store.pending_changes(table).await?;
            if changes.is_empty() {
                continue;
            }

            pusher.push(table, &changes).await?;
            report.sent += changes.len();

            for change in &changes {
                let marked = self
                    .inner
                    .store
                    .mark_sent(table, change.record.id(), change.record.updated_at())
                    .await?;
                if marked {
                    report.marked += 1;
                } else {
                    report.stale += 1;
                }
            }
        }

        if report.sent > 0 {
            tracing::info!(
                sent = report.sent,
                marked = report.marked,
                stale = report.stale,
                "Pushed local changes"
            );
        }
        Ok(report)
    }
}

impl<R: SyncRecord> Drop for SyncOrchestrator<R> {
    fn drop(&mut self) {
        if self.inner.lifecycle() == Lifecycle::Uninitialized {
            return;
        }
        // Without shutdown the subscriptions would keep running unowned
        let detached = self
            .inner
            .shapes
            .iter()
            .filter(|shape| self.inner.registry.detach(&shape.shape_key()))
            .count();
        tracing::warn!(detached, "Sync orchestrator dropped without shutdown");
    }
}

/// Run `work` unless a shutdown is requested first.
async fn cancellable<T>(
    mut cancel: watch::Receiver<u64>,
    work: impl Future<Output = SyncResult<T>>,
) -> SyncResult<T> {
    tokio::select! {
        biased;
        _ = cancel.changed() => Err(SyncError::Cancelled),
        result = work => result,
    }
}

/// Builder for [`SyncOrchestrator`].
pub struct SyncOrchestratorBuilder<R: SyncRecord> {
    config: SyncConfig,
    store: Arc<dyn LocalStore<R>>,
    transport: Arc<dyn ShapeTransport<R>>,
    registry: Option<Arc<SubscriptionRegistry>>,
    ticker: Option<TickerFactory>,
    pusher: Option<Arc<dyn ChangePusher<R>>>,
    observers: Vec<Arc<dyn SyncObserver>>,
    refetch_policy: RefetchPolicy,
}

impl<R: SyncRecord> SyncOrchestratorBuilder<R> {
    /// Share a subscription registry with other orchestrators.
    pub fn registry(mut self, registry: Arc<SubscriptionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the wall-clock monitor ticker.
    pub fn ticker(mut self, factory: TickerFactory) -> Self {
        self.ticker = Some(factory);
        self
    }

    /// Defaults to an HTTP pusher when the config names a write server.
    pub fn pusher(mut self, pusher: Arc<dyn ChangePusher<R>>) -> Self {
        self.pusher = Some(pusher);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn refetch_policy(mut self, policy: RefetchPolicy) -> Self {
        self.refetch_policy = policy;
        self
    }

    pub fn build(self) -> SyncOrchestrator<R> {
        let events = EventBus::new();
        for observer in self.observers {
            events.subscribe(observer);
        }

        let pusher = self.pusher.or_else(|| {
            self.config
                .write_server_url
                .as_deref()
                .map(|url| Arc::new(HttpChangePusher::new(url)) as Arc<dyn ChangePusher<R>>)
        });
        let (lifecycle, _) = watch::channel(Lifecycle::Uninitialized);
        let (cancel, _) = watch::channel(0);

        let inner = Inner {
            shapes: self.config.shapes(),
            resolver: Resolver::new(self.config.conflict_resolution),
            refetch_policy: self.refetch_policy,
            store: self.store,
            transport: self.transport,
            registry: self.registry.unwrap_or_else(SubscriptionRegistry::new_shared),
            events,
            state: Mutex::new(SyncState::new()),
            last_up_to_date: Mutex::new(HashMap::new()),
            lifecycle,
            config: self.config,
        };

        SyncOrchestrator {
            inner: Arc::new(inner),
            control: tokio::sync::Mutex::new(Control::default()),
            pusher,
            push_lock: tokio::sync::Mutex::new(()),
            ticker: self.ticker.unwrap_or_else(IntervalTicker::factory),
            cancel,
        }
    }
}
