//! In-process shape transport fed through channels.
//!
//! Seeded rows form the snapshot every new connection receives as its
//! initial sync; live changes are pushed to the connections open for a
//! table. Used to embed the engine next to an in-process writer and in tests.

use super::{ShapeDescriptor, ShapeMessage, ShapeStream, ShapeTransport};
use crate::error::TransportError;
use async_trait::async_trait;
use ordo_sync_engine::{Operation, SyncRecord};
use parking_lot::Mutex;
use std::{collections::HashMap, time::Duration};
use tokio::sync::mpsc;

type Delivery<R> = Result<ShapeMessage<R>, TransportError>;

struct Inner<R: SyncRecord> {
    snapshots: HashMap<String, Vec<R::Patch>>,
    streams: HashMap<String, Vec<mpsc::UnboundedSender<Delivery<R>>>>,
    reachable: bool,
    probe_delay: Option<Duration>,
    connections: usize,
}

/// Shape transport backed by in-memory channels.
pub struct ChannelTransport<R: SyncRecord> {
    inner: Mutex<Inner<R>>,
}

impl<R: SyncRecord> Default for ChannelTransport<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: SyncRecord> ChannelTransport<R> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshots: HashMap::new(),
                streams: HashMap::new(),
                reachable: true,
                probe_delay: None,
                connections: 0,
            }),
        }
    }

    /// Replace the snapshot new connections to `table` receive.
    pub fn seed(&self, table: &str, rows: Vec<R::Patch>) {
        self.inner.lock().snapshots.insert(table.to_string(), rows);
    }

    /// Push a change to every open connection for `table`.
    ///
    /// Returns the number of connections that received it.
    pub fn send(&self, table: &str, op: Operation<R>) -> usize {
        self.deliver(table, || Ok(ShapeMessage::Change(op.clone())))
    }

    /// Mark every open connection for `table` as caught up.
    pub fn up_to_date(&self, table: &str) -> usize {
        self.deliver(table, || Ok(ShapeMessage::UpToDate))
    }

    /// Invalidate the log position of every open connection for `table`.
    ///
    /// The current snapshot is re-sent after the signal, as a server would
    /// after a refetch.
    pub fn must_refetch(&self, table: &str) -> usize {
        let mut inner = self.inner.lock();
        let snapshot = inner.snapshots.get(table).cloned().unwrap_or_default();
        let Some(senders) = inner.streams.get_mut(table) else {
            return 0;
        };

        senders.retain(|tx| {
            let mut batch = vec![Ok(ShapeMessage::MustRefetch)];
            batch.extend(
                snapshot
                    .iter()
                    .cloned()
                    .map(|row| Ok(ShapeMessage::Change(Operation::remote_insert(row)))),
            );
            batch.push(Ok(ShapeMessage::UpToDate));
            batch.into_iter().all(|msg| tx.send(msg).is_ok())
        });
        senders.len()
    }

    /// Fail every open connection for `table`.
    pub fn fail(&self, table: &str, error: TransportError) -> usize {
        self.deliver(table, || Err(error.clone()))
    }

    /// End every open connection for `table`.
    pub fn close(&self, table: &str) {
        self.inner.lock().streams.remove(table);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().reachable = reachable;
    }

    /// Delay every probe by `delay`.
    pub fn set_probe_delay(&self, delay: Duration) {
        self.inner.lock().probe_delay = Some(delay);
    }

    /// Total number of connections opened so far.
    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections
    }

    /// Connections for `table` whose receiving side is still open.
    pub fn open_streams(&self, table: &str) -> usize {
        self.inner
            .lock()
            .streams
            .get(table)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    fn deliver(&self, table: &str, message: impl Fn() -> Delivery<R>) -> usize {
        let mut inner = self.inner.lock();
        let Some(senders) = inner.streams.get_mut(table) else {
            return 0;
        };
        senders.retain(|tx| tx.send(message()).is_ok());
        senders.len()
    }
}

#[async_trait]
impl<R: SyncRecord> ShapeTransport<R> for ChannelTransport<R> {
    async fn probe(&self) -> Result<(), TransportError> {
        let delay = self.inner.lock().probe_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.lock().reachable {
            Ok(())
        } else {
            Err(TransportError::Network("endpoint unreachable".to_string()))
        }
    }

    async fn connect(
        &self,
        shape: &ShapeDescriptor,
    ) -> Result<Box<dyn ShapeStream<R>>, TransportError> {
        let mut inner = self.inner.lock();
        if !inner.reachable {
            return Err(TransportError::Network("endpoint unreachable".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(rows) = inner.snapshots.get(&shape.table) {
            for row in rows {
                let _ = tx.send(Ok(ShapeMessage::Change(Operation::remote_insert(
                    row.clone(),
                ))));
            }
        }
        let _ = tx.send(Ok(ShapeMessage::UpToDate));

        inner.connections += 1;
        inner
            .streams
            .entry(shape.table.clone())
            .or_default()
            .push(tx);

        Ok(Box::new(ChannelStream { rx }))
    }
}

struct ChannelStream<R: SyncRecord> {
    rx: mpsc::UnboundedReceiver<Delivery<R>>,
}

#[async_trait]
impl<R: SyncRecord> ShapeStream<R> for ChannelStream<R> {
    async fn next_message(&mut self) -> Result<Option<ShapeMessage<R>>, TransportError> {
        match self.rx.recv().await {
            Some(delivery) => delivery.map(Some),
            None => Ok(None),
        }
    }
}
