//! Conflict resolution for incoming operations.
//!
//! This is the core of determinism. Given the current local row (if any) and
//! one incoming operation, the [`Resolver`] decides which version survives.
//! It never writes; the store applies the returned [`Action`] inside the same
//! transaction it used to read the local row.
//!
//! # Algorithm
//!
//! 1. No local row: an insert/update becomes an insert, a delete is a no-op
//! 2. Local row exists and the incoming change would not alter it: no-op
//! 3. Otherwise the collision is settled by the [`ConflictStrategy`]
//! 4. A delete only collides when the local row is newer than the tombstone

use crate::{
    error::Result,
    operation::{Change, Operation, Tombstone},
    record::{FieldRule, RecordPatch, SyncRecord},
    Error, RecordId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Strategy for settling a collision between a local row and a remote change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Greater `updated_at` wins in full, ties go to remote (default)
    #[default]
    LatestWins,
    /// Field-level merge using the record-level timestamps
    Merge,
    /// Leave the local row untouched and queue a conflict
    Manual,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LatestWins => "latest-wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "latest-wins" => Ok(ConflictStrategy::LatestWins),
            "merge" => Ok(ConflictStrategy::Merge),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(Error::InvalidStrategy(other.to_string())),
        }
    }
}

/// Kind of a pending conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Update,
    Delete,
    Create,
}

/// A collision left for an external caller to resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", bound(serialize = "R: SyncRecord"))]
pub struct SyncConflict<R: SyncRecord> {
    pub record_id: RecordId,
    pub table: String,
    /// Local row at detection time
    pub local: R,
    /// Remote payload; `None` for a delete
    pub remote: Option<R::Patch>,
    pub kind: ConflictKind,
    pub detected_at: Timestamp,
}

/// What the store must do to apply a resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Action<R: SyncRecord> {
    /// No local row existed; write this one
    Insert(R),
    /// Remote won in full
    Replace(R),
    /// Field-level merge result
    Merge(R),
    /// Local row won; nothing to write
    KeepLocal,
    Delete,
    /// The change was already reflected locally
    Unchanged,
    /// Queue a conflict; leave the local row as is
    Defer(SyncConflict<R>),
}

/// Action names as reported by the store's upsert routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyAction {
    Inserted,
    Updated,
    KeptLocal,
    Deleted,
    Unchanged,
    Deferred,
}

impl ApplyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyAction::Inserted => "inserted",
            ApplyAction::Updated => "updated",
            ApplyAction::KeptLocal => "kept_local",
            ApplyAction::Deleted => "deleted",
            ApplyAction::Unchanged => "unchanged",
            ApplyAction::Deferred => "deferred",
        }
    }
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<R: SyncRecord> Action<R> {
    pub fn kind(&self) -> ApplyAction {
        match self {
            Action::Insert(_) => ApplyAction::Inserted,
            Action::Replace(_) | Action::Merge(_) => ApplyAction::Updated,
            Action::KeepLocal => ApplyAction::KeptLocal,
            Action::Delete => ApplyAction::Deleted,
            Action::Unchanged => ApplyAction::Unchanged,
            Action::Defer(_) => ApplyAction::Deferred,
        }
    }

    /// The row to write, if this action writes one.
    pub fn record(&self) -> Option<&R> {
        match self {
            Action::Insert(r) | Action::Replace(r) | Action::Merge(r) => Some(r),
            _ => None,
        }
    }
}

/// Outcome of resolving one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<R: SyncRecord> {
    pub record_id: RecordId,
    pub action: Action<R>,
    /// A local row existed and differed from the incoming change
    pub collided: bool,
}

impl<R: SyncRecord> Resolution<R> {
    fn clean(record_id: RecordId, action: Action<R>) -> Self {
        Self {
            record_id,
            action,
            collided: false,
        }
    }

    fn collision(record_id: RecordId, action: Action<R>) -> Self {
        Self {
            record_id,
            action,
            collided: true,
        }
    }
}

/// Decides the surviving version for each incoming operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    strategy: ConflictStrategy,
}

impl Resolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve `op` against the current local row of `table`.
    ///
    /// `now` stamps any conflict that gets deferred.
    pub fn resolve<R: SyncRecord>(
        &self,
        table: &str,
        local: Option<&R>,
        op: &Operation<R>,
        now: Timestamp,
    ) -> Result<Resolution<R>> {
        match &op.change {
            Change::Insert(patch) => {
                self.resolve_upsert(table, local, patch, ConflictKind::Create, now)
            }
            Change::Update(patch) => {
                self.resolve_upsert(table, local, patch, ConflictKind::Update, now)
            }
            Change::Delete(tombstone) => Ok(self.resolve_delete(table, local, tombstone, now)),
        }
    }

    fn resolve_upsert<R: SyncRecord>(
        &self,
        table: &str,
        local: Option<&R>,
        patch: &R::Patch,
        kind: ConflictKind,
        now: Timestamp,
    ) -> Result<Resolution<R>> {
        let record_id = patch.id().to_string();

        let Some(local) = local else {
            let record = R::from_patch(patch)?;
            return Ok(Resolution::clean(record_id, Action::Insert(record)));
        };

        let remote_at = patch.updated_at();
        let mut candidate = local.clone();
        candidate.apply_patch(patch, FieldRule::Overwrite);
        candidate.set_updated_at(remote_at);

        if &candidate == local {
            return Ok(Resolution::clean(record_id, Action::Unchanged));
        }

        let local_at = local.updated_at();
        let action = match self.strategy {
            ConflictStrategy::LatestWins => {
                if remote_at >= local_at {
                    Action::Replace(candidate)
                } else {
                    Action::KeepLocal
                }
            }
            ConflictStrategy::Merge => {
                let rule = if remote_at > local_at {
                    FieldRule::Overwrite
                } else {
                    FieldRule::FillEmpty
                };
                let mut merged = local.clone();
                merged.apply_patch(patch, rule);
                merged.set_updated_at(local_at.max(remote_at));
                if &merged == local {
                    Action::KeepLocal
                } else {
                    Action::Merge(merged)
                }
            }
            ConflictStrategy::Manual => Action::Defer(SyncConflict {
                record_id: record_id.clone(),
                table: table.to_string(),
                local: local.clone(),
                remote: Some(patch.clone()),
                kind,
                detected_at: now,
            }),
        };

        Ok(Resolution::collision(record_id, action))
    }

    fn resolve_delete<R: SyncRecord>(
        &self,
        table: &str,
        local: Option<&R>,
        tombstone: &Tombstone,
        now: Timestamp,
    ) -> Resolution<R> {
        let record_id = tombstone.id.clone();

        let Some(local) = local else {
            return Resolution::clean(record_id, Action::Unchanged);
        };

        let modified_after = tombstone.at.is_some_and(|at| local.updated_at() > at);
        if !modified_after {
            return Resolution::clean(record_id, Action::Delete);
        }

        if self.strategy == ConflictStrategy::Manual {
            Resolution::collision(
                record_id.clone(),
                Action::Defer(SyncConflict {
                    record_id,
                    table: table.to_string(),
                    local: local.clone(),
                    remote: None,
                    kind: ConflictKind::Delete,
                    detected_at: now,
                }),
            )
        } else {
            Resolution::collision(record_id, Action::Delete)
        }
    }
}
