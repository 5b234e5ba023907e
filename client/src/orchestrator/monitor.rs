//! Real-time monitor.
//!
//! Polls subscription up-to-date transitions on a fixed period. The clock is
//! behind [`Ticker`] so tests can drive passes by hand.

use super::Inner;
use async_trait::async_trait;
use ordo_sync_engine::SyncRecord;
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, Interval, MissedTickBehavior},
};

/// Source of monitor ticks.
#[async_trait]
pub trait Ticker: Send + 'static {
    /// Wait for the next tick.
    async fn tick(&mut self);
}

/// Builds the ticker for a monitor from the configured period.
pub type TickerFactory = Arc<dyn Fn(Duration) -> Box<dyn Ticker> + Send + Sync>;

/// Wall-clock ticker. The first tick fires one period after creation.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    /// Factory producing [`IntervalTicker`]s.
    pub fn factory() -> TickerFactory {
        Arc::new(|period| Box::new(IntervalTicker::new(period)) as Box<dyn Ticker>)
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// A running monitor task.
pub(super) struct Monitor {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Monitor {
    pub(super) fn spawn<R: SyncRecord>(inner: Weak<Inner<R>>, mut ticker: Box<dyn Ticker>) -> Self {
        let (stop, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.wait_for(|s| *s) => break,
                    _ = ticker.tick() => {}
                }

                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let raised = inner.poll_up_to_date();
                if raised > 0 {
                    tracing::debug!(raised, "Monitor raised up-to-date events");
                }
            }
            tracing::debug!("Monitor stopped");
        });

        Self { stop, task }
    }

    pub(super) async fn stop(self) {
        self.stop.send_replace(true);
        if let Err(err) = self.task.await {
            tracing::warn!("Monitor task failed: {}", err);
        }
    }
}
