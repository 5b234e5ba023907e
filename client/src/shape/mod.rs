//! Shape subscriptions.
//!
//! A shape is a server-defined subset of one table, delivered as an ordered
//! change log. A [`ShapeTransport`] opens the log, a [`SubscriptionHandle`]
//! drives it and feeds every message to a [`ShapeHandler`], and the
//! [`SubscriptionRegistry`] keeps at most one live handle per shape key.

mod electric;
mod memory;
pub mod protocol;
mod registry;
mod subscription;

pub use electric::ElectricTransport;
pub use memory::ChannelTransport;
pub use registry::SubscriptionRegistry;
pub use subscription::{SubscriptionHandle, SubscriptionStatus};

use crate::error::{StoreError, TransportError};
use async_trait::async_trait;
use ordo_sync_engine::{Operation, SyncRecord};
use serde::{Deserialize, Serialize};

/// Subscription request for one table shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeDescriptor {
    pub table: String,
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Row filter, as a SQL `WHERE` expression
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, rename = "shapeKey", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl ShapeDescriptor {
    /// A shape over the whole table, keyed by `id`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: vec!["id".to_string()],
            schema: None,
            filter: None,
            key: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Dedup identity; defaults to the table name.
    pub fn shape_key(&self) -> String {
        self.key.clone().unwrap_or_else(|| self.table.clone())
    }

    /// Table name qualified with the schema, if one is set.
    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }
}

/// One entry of a shape log.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeMessage<R: SyncRecord> {
    Change(Operation<R>),
    /// A row the transport could not decode
    Rejected { key: Option<String>, reason: String },
    /// Everything committed so far has been delivered
    UpToDate,
    /// The log position is no longer valid; a full resync follows
    MustRefetch,
}

/// Opens shape logs.
#[async_trait]
pub trait ShapeTransport<R: SyncRecord>: Send + Sync + 'static {
    /// Check that the endpoint is reachable and accepts our credentials.
    async fn probe(&self) -> Result<(), TransportError>;

    async fn connect(&self, shape: &ShapeDescriptor)
        -> Result<Box<dyn ShapeStream<R>>, TransportError>;
}

/// An open shape log.
#[async_trait]
pub trait ShapeStream<R: SyncRecord>: Send {
    /// Wait for the next message. `Ok(None)` means the log ended.
    async fn next_message(&mut self) -> Result<Option<ShapeMessage<R>>, TransportError>;
}

/// Receives what a subscription delivers.
///
/// Calls for one shape are made sequentially, in log order.
#[async_trait]
pub trait ShapeHandler<R: SyncRecord>: Send + Sync + 'static {
    async fn on_operation(&self, shape: &ShapeDescriptor, op: Operation<R>);

    async fn on_rejected(&self, shape: &ShapeDescriptor, key: Option<String>, reason: String);

    /// Called once, the first time the shape reports up-to-date.
    async fn on_initial_sync(&self, shape: &ShapeDescriptor);

    /// Recovery hook run before the stream resumes after a must-refetch.
    async fn on_must_refetch(&self, shape: &ShapeDescriptor) -> Result<(), StoreError>;

    async fn on_error(&self, shape: &ShapeDescriptor, error: &TransportError);
}
