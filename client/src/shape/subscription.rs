//! A running shape subscription.

use super::{ShapeDescriptor, ShapeHandler, ShapeMessage, ShapeStream, ShapeTransport};
use crate::error::TransportError;
use ordo_sync_engine::SyncRecord;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};

/// Lifecycle of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Connecting,
    /// Receiving the initial snapshot
    InitialSync,
    Live { up_to_date: bool },
    /// Finished; `error` is set when the transport failed
    Stopped { error: Option<TransportError> },
}

impl SubscriptionStatus {
    pub fn is_stopped(&self) -> bool {
        matches!(self, SubscriptionStatus::Stopped { .. })
    }
}

/// Handle to one shape subscription.
///
/// Dropping the handle requests the subscription to stop.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: String,
    shape: ShapeDescriptor,
    status: watch::Receiver<SubscriptionStatus>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionHandle {
    /// Connect `shape` through `transport` and feed it to `handler` on a new task.
    pub fn spawn<R: SyncRecord>(
        shape: ShapeDescriptor,
        transport: Arc<dyn ShapeTransport<R>>,
        handler: Arc<dyn ShapeHandler<R>>,
    ) -> Arc<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Connecting);
        let (stop_tx, stop_rx) = watch::channel(false);

        let worker = Worker {
            shape: shape.clone(),
            handler,
            status: status_tx,
            stop: stop_rx,
        };
        let task = tokio::spawn(worker.run(transport));

        tracing::info!(subscription_id = %id, shape_key = %shape.shape_key(), "Subscription opened");

        Arc::new(Self {
            id,
            shape,
            status: status_rx,
            stop: stop_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shape(&self) -> &ShapeDescriptor {
        &self.shape
    }

    pub fn table(&self) -> &str {
        &self.shape.table
    }

    pub fn primary_key(&self) -> &[String] {
        &self.shape.primary_key
    }

    pub fn shape_key(&self) -> String {
        self.shape.shape_key()
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.clone()
    }

    pub fn is_up_to_date(&self) -> bool {
        matches!(
            *self.status.borrow(),
            SubscriptionStatus::Live { up_to_date: true }
        )
    }

    pub fn is_stopped(&self) -> bool {
        self.status.borrow().is_stopped()
    }

    /// Wait until the initial sync completed or the subscription stopped.
    pub async fn wait_initial_sync(&self) -> Result<(), TransportError> {
        let mut status = self.status.clone();
        let result = status
            .wait_for(|s| {
                matches!(
                    s,
                    SubscriptionStatus::Live { .. } | SubscriptionStatus::Stopped { .. }
                )
            })
            .await
            .map(|s| s.clone());

        match result {
            Ok(SubscriptionStatus::Live { .. }) => Ok(()),
            Ok(SubscriptionStatus::Stopped { error: Some(err) }) => Err(err),
            _ => Err(TransportError::Closed),
        }
    }

    /// Ask the subscription to stop without waiting for it.
    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stop the subscription and wait for its task to finish.
    ///
    /// An operation already being applied completes; nothing received after
    /// this call is applied.
    pub async fn stop(&self) {
        self.request_stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(subscription_id = %self.id, "Subscription task failed: {}", err);
            }
            tracing::info!(subscription_id = %self.id, shape_key = %self.shape_key(), "Subscription closed");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

struct Worker<R: SyncRecord> {
    shape: ShapeDescriptor,
    handler: Arc<dyn ShapeHandler<R>>,
    status: watch::Sender<SubscriptionStatus>,
    stop: watch::Receiver<bool>,
}

impl<R: SyncRecord> Worker<R> {
    async fn run(mut self, transport: Arc<dyn ShapeTransport<R>>) {
        let connected = tokio::select! {
            biased;
            _ = stop_requested(&mut self.stop) => None,
            result = transport.connect(&self.shape) => Some(result),
        };

        let mut stream = match connected {
            None => return self.finish(None),
            Some(Ok(stream)) => stream,
            Some(Err(err)) => return self.fail(err).await,
        };

        self.status.send_replace(SubscriptionStatus::InitialSync);
        let error = self.pump(stream.as_mut()).await;
        match error {
            Some(err) => self.fail(err).await,
            None => self.finish(None),
        }
    }

    /// Feed messages to the handler until stopped, ended or failed.
    async fn pump(&mut self, stream: &mut dyn ShapeStream<R>) -> Option<TransportError> {
        let mut initial_done = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => return None,
                next = stream.next_message() => next,
            };

            if *self.stop.borrow() {
                return None;
            }

            match next {
                Ok(Some(ShapeMessage::Change(op))) => {
                    self.handler.on_operation(&self.shape, op).await;
                    if initial_done {
                        self.status
                            .send_replace(SubscriptionStatus::Live { up_to_date: false });
                    }
                }
                Ok(Some(ShapeMessage::Rejected { key, reason })) => {
                    self.handler.on_rejected(&self.shape, key, reason).await;
                }
                Ok(Some(ShapeMessage::UpToDate)) => {
                    if !initial_done {
                        initial_done = true;
                        self.handler.on_initial_sync(&self.shape).await;
                    }
                    self.status
                        .send_replace(SubscriptionStatus::Live { up_to_date: true });
                }
                Ok(Some(ShapeMessage::MustRefetch)) => {
                    if let Err(err) = self.handler.on_must_refetch(&self.shape).await {
                        return Some(TransportError::Protocol(format!(
                            "must-refetch recovery failed: {err}"
                        )));
                    }
                    let status = if initial_done {
                        SubscriptionStatus::Live { up_to_date: false }
                    } else {
                        SubscriptionStatus::InitialSync
                    };
                    self.status.send_replace(status);
                }
                Ok(None) => return None,
                Err(err) => return Some(err),
            }
        }
    }

    async fn fail(self, err: TransportError) {
        tracing::error!(shape_key = %self.shape.shape_key(), error = %err, "Subscription failed");
        self.handler.on_error(&self.shape, &err).await;
        self.finish(Some(err));
    }

    fn finish(self, error: Option<TransportError>) {
        self.status
            .send_replace(SubscriptionStatus::Stopped { error });
    }
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    // A dropped handle counts as a stop request.
    let _ = stop.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::shape::ChannelTransport;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use ordo_sync_engine::{Operation, Task, TaskPatch};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ShapeHandler<Task> for Recorder {
        async fn on_operation(&self, _shape: &ShapeDescriptor, op: Operation<Task>) {
            self.events.lock().push(format!("op:{}", op.record_id()));
        }

        async fn on_rejected(&self, _shape: &ShapeDescriptor, _key: Option<String>, _reason: String) {
            self.events.lock().push("rejected".into());
        }

        async fn on_initial_sync(&self, _shape: &ShapeDescriptor) {
            self.events.lock().push("initial".into());
        }

        async fn on_must_refetch(&self, _shape: &ShapeDescriptor) -> Result<(), StoreError> {
            self.events.lock().push("refetch".into());
            Ok(())
        }

        async fn on_error(&self, _shape: &ShapeDescriptor, _error: &TransportError) {
            self.events.lock().push("error".into());
        }
    }

    fn patch(id: &str) -> TaskPatch {
        TaskPatch::new(id, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()).title("Draft")
    }

    #[tokio::test]
    async fn initial_sync_fires_once() {
        let transport = Arc::new(ChannelTransport::<Task>::new());
        transport.seed("tasks", vec![patch("t1"), patch("t2")]);
        let recorder = Arc::new(Recorder::default());

        let handle = SubscriptionHandle::spawn::<Task>(
            ShapeDescriptor::new("tasks"),
            transport.clone(),
            recorder.clone(),
        );
        handle.wait_initial_sync().await.unwrap();
        assert!(handle.is_up_to_date());

        transport.up_to_date("tasks");
        transport.send("tasks", Operation::remote_insert(patch("t3")));
        transport.up_to_date("tasks");
        handle.stop().await;

        let events = recorder.events.lock().clone();
        assert_eq!(events[..3], ["op:t1", "op:t2", "initial"]);
        assert_eq!(events.iter().filter(|e| *e == "initial").count(), 1);
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn connect_failure_stops_with_error() {
        let transport = Arc::new(ChannelTransport::<Task>::new());
        transport.set_reachable(false);
        let recorder = Arc::new(Recorder::default());

        let handle = SubscriptionHandle::spawn::<Task>(
            ShapeDescriptor::new("tasks"),
            transport.clone(),
            recorder.clone(),
        );
        let err = handle.wait_initial_sync().await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
        assert!(matches!(
            handle.status(),
            SubscriptionStatus::Stopped { error: Some(_) }
        ));
        assert_eq!(recorder.events.lock().clone(), vec!["error".to_string()]);
    }

    #[tokio::test]
    async fn nothing_applied_after_stop() {
        let transport = Arc::new(ChannelTransport::<Task>::new());
        let recorder = Arc::new(Recorder::default());

        let handle = SubscriptionHandle::spawn::<Task>(
            ShapeDescriptor::new("tasks"),
            transport.clone(),
            recorder.clone(),
        );
        handle.wait_initial_sync().await.unwrap();
        handle.stop().await;

        transport.send("tasks", Operation::remote_insert(patch("late")));
        tokio::task::yield_now().await;

        let events = recorder.events.lock().clone();
        assert!(!events.contains(&"op:late".to_string()));
        assert_eq!(handle.status(), SubscriptionStatus::Stopped { error: None });
    }
}
