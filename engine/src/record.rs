//! Record traits shared by every synced entity.
//!
//! Each table the engine syncs has a concrete row type implementing
//! [`SyncRecord`] and a matching patch type implementing [`RecordPatch`].
//! Field-level merging is written per entity, so the compiler checks it
//! instead of relying on untyped JSON blobs.

use crate::Timestamp;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

/// Origin of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written by the application on this device
    Local,
    /// Received from the remote shape log
    Remote,
}

/// How [`SyncRecord::apply_patch`] treats the fields present in a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Every field present in the patch replaces the local value.
    Overwrite,
    /// A field present in the patch is only written where the local value is empty.
    FillEmpty,
}

/// A full or partial row as delivered by the remote log.
///
/// The identifier and `updated_at` are always present; the remaining
/// columns are optional.
pub trait RecordPatch:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identifier of the targeted record.
    fn id(&self) -> &str;

    /// Remote modification time carried by the patch.
    fn updated_at(&self) -> Timestamp;
}

/// A domain row kept in sync between the local store and the remote shape.
pub trait SyncRecord:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Patch: RecordPatch;

    /// Immutable identifier of this record.
    fn id(&self) -> &str;

    /// Last modification time.
    fn updated_at(&self) -> Timestamp;

    fn set_updated_at(&mut self, at: Timestamp);

    /// A patch carrying every column of this record.
    fn to_patch(&self) -> Self::Patch;

    /// Build a full record from a patch. Fails if a required column is absent.
    fn from_patch(patch: &Self::Patch) -> crate::error::Result<Self>;

    /// Write the fields present in `patch` according to `rule`.
    ///
    /// Never touches the identifier or `updated_at`; callers decide the
    /// resulting timestamp.
    fn apply_patch(&mut self, patch: &Self::Patch, rule: FieldRule);

    /// Names of the user-editable columns that differ between `self` and `other`.
    fn changed_fields(&self, other: &Self) -> Vec<&'static str>;
}

/// Write `incoming` into `slot` when the rule allows it.
///
/// Entities use this from their [`SyncRecord::apply_patch`] implementation.
pub fn merge_field<T: Clone>(
    slot: &mut T,
    incoming: Option<&T>,
    rule: FieldRule,
    is_empty: fn(&T) -> bool,
) {
    if let Some(value) = incoming {
        if rule == FieldRule::Overwrite || is_empty(slot) {
            *slot = value.clone();
        }
    }
}
