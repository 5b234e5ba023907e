//! Operation types for expressing changes.
//!
//! Remote shape messages and local writes both reach the resolver as an
//! [`Operation`]: a typed [`Change`] plus the [`Origin`] it came from.

use crate::{
    record::{Origin, RecordPatch, SyncRecord},
    RecordId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Marker for a deleted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    /// Record ID to delete
    pub id: RecordId,
    /// Deletion time, when the source reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<Timestamp>,
}

/// A change to a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "lowercase")]
pub enum Change<P> {
    Insert(P),
    Update(P),
    Delete(Tombstone),
}

/// A change together with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct Operation<R: SyncRecord> {
    pub change: Change<R::Patch>,
    pub origin: Origin,
}

impl<R: SyncRecord> Operation<R> {
    pub fn new(change: Change<R::Patch>, origin: Origin) -> Self {
        Self { change, origin }
    }

    /// An insert delivered by the shape log.
    pub fn remote_insert(patch: R::Patch) -> Self {
        Self::new(Change::Insert(patch), Origin::Remote)
    }

    /// An update delivered by the shape log.
    pub fn remote_update(patch: R::Patch) -> Self {
        Self::new(Change::Update(patch), Origin::Remote)
    }

    /// A delete delivered by the shape log.
    pub fn remote_delete(id: impl Into<RecordId>, at: Option<Timestamp>) -> Self {
        Self::new(
            Change::Delete(Tombstone { id: id.into(), at }),
            Origin::Remote,
        )
    }

    /// Get the record ID this operation targets.
    pub fn record_id(&self) -> &str {
        match &self.change {
            Change::Insert(patch) | Change::Update(patch) => patch.id(),
            Change::Delete(tombstone) => &tombstone.id,
        }
    }

    /// Get the modification time carried by this operation, if any.
    pub fn updated_at(&self) -> Option<Timestamp> {
        match &self.change {
            Change::Insert(patch) | Change::Update(patch) => Some(patch.updated_at()),
            Change::Delete(tombstone) => tombstone.at,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.change, Change::Delete(_))
    }
}
