//! Event/notification surface.
//!
//! The orchestrator raises [`SyncEvent`]s through an [`EventBus`]. Delivery
//! is synchronous and fire-and-forget: observers are snapshotted before each
//! emit, and a panicking observer is logged and skipped so the remaining
//! observers still see the event.

use crate::store::TableStats;
use ordo_sync_engine::{ConflictKind, RecordId, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    /// A table finished its initial sync
    InitialSyncComplete {
        table: String,
        stats: TableStats,
        synced_records: u64,
        conflict_count: u64,
        failed_records: u64,
        at: Timestamp,
    },
    /// A subscription caught up after being behind
    SyncUpToDate {
        table: String,
        synced_records: u64,
        conflict_count: u64,
        at: Timestamp,
    },
    ConflictDetected {
        table: String,
        record_id: RecordId,
        kind: ConflictKind,
    },
    ConflictResolved {
        table: String,
        record_id: RecordId,
    },
    MustRefetch {
        table: String,
        removed: u64,
    },
    ApplyFailed {
        table: String,
        record_id: Option<RecordId>,
        error: String,
    },
    SubscriptionError {
        table: String,
        error: String,
    },
}

impl SyncEvent {
    /// The serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::InitialSyncComplete { .. } => "initial-sync-complete",
            SyncEvent::SyncUpToDate { .. } => "sync-up-to-date",
            SyncEvent::ConflictDetected { .. } => "conflict-detected",
            SyncEvent::ConflictResolved { .. } => "conflict-resolved",
            SyncEvent::MustRefetch { .. } => "must-refetch",
            SyncEvent::ApplyFailed { .. } => "apply-failed",
            SyncEvent::SubscriptionError { .. } => "subscription-error",
        }
    }
}

/// Receives sync events.
pub trait SyncObserver: Send + Sync + 'static {
    fn on_event(&self, event: &SyncEvent);
}

impl<F> SyncObserver for F
where
    F: Fn(&SyncEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &SyncEvent) {
        self(event)
    }
}

/// Handle returned by [`EventBus::subscribe`].
pub type ObserverId = u64;

/// Fan-out of sync events to registered observers.
pub struct EventBus {
    observers: Mutex<Vec<(ObserverId, Arc<dyn SyncObserver>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn SyncObserver>) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, observer));
        id
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ObserverId) {
        self.observers.lock().retain(|(oid, _)| *oid != id);
    }

    pub fn emit(&self, event: &SyncEvent) {
        let snapshot: Vec<Arc<dyn SyncObserver>> = {
            let guard = self.observers.lock();
            guard.iter().map(|(_, o)| Arc::clone(o)).collect()
        };

        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
                tracing::error!(event = event.kind(), "Sync observer panicked");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.len())
            .finish()
    }
}
