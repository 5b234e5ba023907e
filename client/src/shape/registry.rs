//! Registry of active shape subscriptions.
//!
//! Keyed by shape key, so opening the same shape twice reuses the running
//! subscription instead of opening a second transport connection.

use super::{ShapeDescriptor, ShapeHandler, ShapeTransport, SubscriptionHandle};
use dashmap::DashMap;
use ordo_sync_engine::SyncRecord;
use std::sync::Arc;

/// Tracks active subscriptions.
///
/// Thread-safe and can be shared between orchestrators via `Arc`.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    handles: DashMap<String, Arc<SubscriptionHandle>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
        }
    }

    /// Create a new registry wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Open `shape`, or return the handle already running for its shape key.
    ///
    /// The check and the spawn happen under the key's entry lock, so
    /// concurrent calls for one key start at most one subscription. A
    /// stopped handle is replaced.
    pub fn open<R: SyncRecord>(
        &self,
        shape: &ShapeDescriptor,
        transport: &Arc<dyn ShapeTransport<R>>,
        handler: &Arc<dyn ShapeHandler<R>>,
    ) -> Arc<SubscriptionHandle> {
        let key = shape.shape_key();
        let spawn = || SubscriptionHandle::spawn(shape.clone(), transport.clone(), handler.clone());

        let mut entry = self.handles.entry(key.clone()).or_insert_with(spawn);
        if entry.is_stopped() {
            tracing::debug!(shape_key = %key, "Replacing stopped subscription");
            *entry = spawn();
        } else {
            tracing::debug!(shape_key = %key, subscription_id = %entry.id(), "Using subscription");
        }
        entry.clone()
    }

    pub fn get(&self, shape_key: &str) -> Option<Arc<SubscriptionHandle>> {
        self.handles.get(shape_key).map(|h| h.clone())
    }

    /// Stop the subscription for `shape_key` and forget it.
    ///
    /// Returns whether a subscription was registered.
    pub async fn close(&self, shape_key: &str) -> bool {
        let removed = self.handles.remove(shape_key);
        match removed {
            Some((_, handle)) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Forget the subscription for `shape_key` and ask it to stop, without
    /// waiting for its task. Usable where awaiting is not possible.
    pub fn detach(&self, shape_key: &str) -> bool {
        match self.handles.remove(shape_key) {
            Some((_, handle)) => {
                handle.request_stop();
                true
            }
            None => false,
        }
    }

    /// Stop and forget every subscription.
    pub async fn close_all(&self) -> usize {
        let keys: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for key in keys {
            if self.close(&key).await {
                closed += 1;
            }
        }
        closed
    }

    /// Snapshot of the registered handles.
    pub fn handles(&self) -> Vec<Arc<SubscriptionHandle>> {
        self.handles.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
