//! Shared fixtures for the client integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ordo_sync_client::{
    error::TransportError, store::PendingChange, ChangePusher, ChannelTransport, SqliteStore,
    SyncConfig, SyncEvent, SyncOrchestrator, Ticker, TickerFactory,
};
use ordo_sync_engine::{ConflictStrategy, SyncRecord, Task, Timestamp};
use parking_lot::Mutex;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::mpsc;

pub fn at(day: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

pub fn config(strategy: ConflictStrategy) -> SyncConfig {
    SyncConfig::new("http://localhost:3000")
        .with_strategy(strategy)
        .with_probe_timeout(Duration::from_secs(1))
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Like [`eventually`] for conditions that need to await.
pub async fn eventually_async<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Observer that keeps every event.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl Recorder {
    pub fn observer(&self) -> Arc<dyn ordo_sync_client::SyncObserver> {
        let events = self.events.clone();
        Arc::new(move |event: &SyncEvent| events.lock().push(event.clone()))
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }
}

/// Ticker driven by the test.
pub struct ManualClock {
    ticks: mpsc::UnboundedSender<()>,
}

struct ManualTicker {
    ticks: mpsc::UnboundedReceiver<()>,
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        if self.ticks.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

impl ManualClock {
    /// A clock and a factory whose single ticker it drives.
    pub fn new() -> (Self, TickerFactory) {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Mutex::new(Some(rx));
        let factory: TickerFactory = Arc::new(move |_period| {
            let ticks = rx.lock().take().unwrap_or_else(|| mpsc::unbounded_channel().1);
            Box::new(ManualTicker { ticks }) as Box<dyn Ticker>
        });
        (Self { ticks: tx }, factory)
    }

    pub fn tick(&self) {
        let _ = self.ticks.send(());
    }
}

/// Pusher that records what it was sent.
#[derive(Default)]
pub struct RecordingPusher {
    pub pushed: Mutex<Vec<(String, Vec<String>)>>,
    /// Ids of pushed tombstones, per push
    pub deleted: Mutex<Vec<(String, Vec<String>)>>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl ChangePusher<Task> for RecordingPusher {
    async fn push(&self, table: &str, changes: &[PendingChange<Task>]) -> Result<(), TransportError> {
        if *self.fail.lock() {
            return Err(TransportError::Network("write server down".into()));
        }
        let ids = changes.iter().map(|c| c.record.id.clone()).collect();
        self.pushed.lock().push((table.to_string(), ids));
        let deleted: Vec<String> = changes
            .iter()
            .filter(|c| c.deleted)
            .map(|c| c.record.id.clone())
            .collect();
        if !deleted.is_empty() {
            self.deleted.lock().push((table.to_string(), deleted));
        }
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: SyncOrchestrator<Task>,
    pub transport: Arc<ChannelTransport<Task>>,
    pub store: Arc<SqliteStore>,
    pub recorder: Recorder,
}

pub async fn harness(config: SyncConfig, seed: Vec<Task>) -> Harness {
    let (_clock, ticker) = ManualClock::new();
    harness_with(config, seed, ticker, None).await
}

pub async fn harness_with(
    config: SyncConfig,
    seed: Vec<Task>,
    ticker: TickerFactory,
    pusher: Option<Arc<dyn ChangePusher<Task>>>,
) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let transport = Arc::new(ChannelTransport::<Task>::new());
    transport.seed("tasks", seed.iter().map(SyncRecord::to_patch).collect());
    let recorder = Recorder::default();

    let mut builder = SyncOrchestrator::<Task>::builder(config, store.clone(), transport.clone())
        .ticker(ticker)
        .observer(recorder.observer());
    if let Some(pusher) = pusher {
        builder = builder.pusher(pusher);
    }

    Harness {
        orchestrator: builder.build(),
        transport,
        store,
        recorder,
    }
}
