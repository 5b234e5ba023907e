//! Local store adapter.
//!
//! The orchestrator talks to the embedded database only through
//! [`LocalStore`]. Every mutating call runs in its own transaction, so the
//! read-decide-write sequence of a resolution is never observed half done.

mod pool;
mod records;
mod sqlite;

pub use pool::*;
pub use records::TaskRow;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Duration;
use ordo_sync_engine::{ApplyAction, Operation, Resolution, Resolver, SyncRecord, Timestamp};
use serde::Serialize;

/// What to do with local rows before a shape is refetched from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchPolicy {
    /// Keep every row; the refetch overwrites through normal resolution
    KeepLocal,
    /// Delete every row of the table
    ClearTable,
    /// Delete rows last updated more than `window` before the newest row
    PruneOlderThan(Duration),
}

impl Default for RefetchPolicy {
    fn default() -> Self {
        RefetchPolicy::PruneOlderThan(Duration::hours(1))
    }
}

/// Row counts for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub total_records: u64,
    /// Local changes not yet sent to the server
    pub pending_local: u64,
    pub last_updated: Option<Timestamp>,
}

/// A local change waiting to be sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound(serialize = "R: SyncRecord"))]
pub struct PendingChange<R: SyncRecord> {
    #[serde(flatten)]
    pub record: R,
    pub modified_columns: Vec<String>,
    /// The row was created locally
    pub new: bool,
    /// The row was deleted locally
    pub deleted: bool,
}

/// Storage capability consumed by the orchestrator.
#[async_trait]
pub trait LocalStore<R: SyncRecord>: Send + Sync + 'static {
    /// Verify `table` has what syncing needs and create supporting indexes.
    async fn ensure_support(&self, table: &str) -> Result<(), StoreError>;

    /// Resolve a remote operation against the current row and write the outcome,
    /// in one transaction.
    async fn apply_remote(
        &self,
        table: &str,
        op: &Operation<R>,
        resolver: &Resolver,
    ) -> Result<Resolution<R>, StoreError>;

    /// Write a manually resolved record as a local change.
    async fn write_resolved(&self, table: &str, record: &R) -> Result<(), StoreError>;

    /// Write an application change; it stays pending until pushed.
    ///
    /// A delete keeps a hidden tombstone row until the server confirms it.
    async fn write_local(&self, table: &str, op: &Operation<R>)
        -> Result<ApplyAction, StoreError>;

    async fn get(&self, table: &str, id: &str) -> Result<Option<R>, StoreError>;

    /// Recovery hook for must-refetch. Returns the number of rows removed.
    async fn prepare_refetch(&self, table: &str, policy: RefetchPolicy)
        -> Result<u64, StoreError>;

    async fn stats(&self, table: &str) -> Result<TableStats, StoreError>;

    /// Local changes not yet sent to the server, oldest first.
    async fn pending_changes(&self, table: &str) -> Result<Vec<PendingChange<R>>, StoreError>;

    /// Mark a pushed row as sent, unless it changed since `updated_at`.
    ///
    /// Returns whether the row was marked.
    async fn mark_sent(
        &self,
        table: &str,
        id: &str,
        updated_at: Timestamp,
    ) -> Result<bool, StoreError>;
}
