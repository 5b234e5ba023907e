//! Aggregate sync state read model.

use crate::{
    record::SyncRecord,
    resolve::{Action, Resolution, SyncConflict},
    Timestamp,
};
use serde::Serialize;

/// Counters and pending conflicts for one orchestrator instance.
///
/// Only the orchestrator mutates this; everyone else reads clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", bound(serialize = "R: SyncRecord"))]
pub struct SyncState<R: SyncRecord> {
    pub is_initialized: bool,
    pub last_sync_time: Option<Timestamp>,
    /// Collisions observed, resolved or not
    pub conflict_count: u64,
    pub synced_records: u64,
    pub failed_records: u64,
    pub subscription_errors: u64,
    pub conflicts: Vec<SyncConflict<R>>,
}

impl<R: SyncRecord> Default for SyncState<R> {
    fn default() -> Self {
        Self {
            is_initialized: false,
            last_sync_time: None,
            conflict_count: 0,
            synced_records: 0,
            failed_records: 0,
            subscription_errors: 0,
            conflicts: Vec::new(),
        }
    }
}

impl<R: SyncRecord> SyncState<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a resolution that was written successfully.
    ///
    /// Deferred conflicts are queued instead of counted as synced; a newer
    /// conflict for the same record replaces the older one.
    pub fn record(&mut self, resolution: &Resolution<R>) {
        if resolution.collided {
            self.conflict_count += 1;
        }

        match &resolution.action {
            Action::Defer(conflict) => {
                let existing = self
                    .conflicts
                    .iter_mut()
                    .find(|c| c.table == conflict.table && c.record_id == conflict.record_id);
                match existing {
                    Some(slot) => *slot = conflict.clone(),
                    None => self.conflicts.push(conflict.clone()),
                }
            }
            _ => self.synced_records += 1,
        }
    }

    pub fn record_failure(&mut self) {
        self.failed_records += 1;
    }

    pub fn record_subscription_error(&mut self) {
        self.subscription_errors += 1;
    }

    pub fn touch(&mut self, at: Timestamp) {
        self.last_sync_time = Some(at);
    }

    /// Find the pending conflict for `record_id`.
    pub fn conflict(&self, record_id: &str) -> Option<&SyncConflict<R>> {
        self.conflicts.iter().find(|c| c.record_id == record_id)
    }

    /// Remove and return the pending conflict for `record_id`.
    pub fn take_conflict(&mut self, record_id: &str) -> Option<SyncConflict<R>> {
        let index = self.conflicts.iter().position(|c| c.record_id == record_id)?;
        Some(self.conflicts.remove(index))
    }

    /// Put back a conflict taken by [`take_conflict`](Self::take_conflict) whose resolution failed.
    pub fn restore_conflict(&mut self, conflict: SyncConflict<R>) {
        self.conflicts.push(conflict);
    }

    /// Account for a manually resolved conflict.
    pub fn resolved(&mut self) {
        self.conflict_count = self.conflict_count.saturating_sub(1);
        self.synced_records += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        resolve::{ConflictKind, ConflictStrategy, Resolver},
        Operation, Task, TaskPatch,
    };
    use chrono::{TimeZone, Utc};

    fn at(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn manual_conflict(title: &str) -> Resolution<Task> {
        let local = Task::new("t1", "Draft", at(1));
        let op = Operation::remote_update(TaskPatch::new("t1", at(2)).title(title));
        Resolver::new(ConflictStrategy::Manual)
            .resolve("tasks", Some(&local), &op, at(3))
            .unwrap()
    }

    #[test]
    fn example_scenario_counts() {
        let local = Task::new("t1", "Draft", at(1));
        let op = Operation::remote_update(TaskPatch::new("t1", at(2)).title("Final"));
        let res = Resolver::default()
            .resolve("tasks", Some(&local), &op, at(3))
            .unwrap();

        let mut state = SyncState::new();
        state.record(&res);
        assert_eq!(state.conflict_count, 1);
        assert_eq!(state.synced_records, 1);
        assert!(state.conflicts.is_empty());
    }

    #[test]
    fn deferred_conflict_is_queued_once_per_record() {
        let mut state = SyncState::new();
        state.record(&manual_conflict("Final"));
        state.record(&manual_conflict("Final v2"));

        assert_eq!(state.conflict_count, 2);
        assert_eq!(state.synced_records, 0);
        assert_eq!(state.conflicts.len(), 1);
        let pending = state.conflict("t1").unwrap();
        assert_eq!(pending.kind, ConflictKind::Update);
        assert_eq!(
            pending.remote.as_ref().and_then(|p| p.title.as_deref()),
            Some("Final v2")
        );
    }

    #[test]
    fn take_and_restore_conflict() {
        let mut state = SyncState::new();
        state.record(&manual_conflict("Final"));

        let conflict = state.take_conflict("t1").unwrap();
        assert!(state.conflicts.is_empty());
        assert!(state.take_conflict("t1").is_none());

        state.restore_conflict(conflict);
        assert_eq!(state.conflicts.len(), 1);
    }

    #[test]
    fn resolved_never_underflows() {
        let mut state = SyncState::<Task>::new();
        state.resolved();
        assert_eq!(state.conflict_count, 0);
        assert_eq!(state.synced_records, 1);
    }

    #[test]
    fn reset_returns_to_initial_values() {
        let mut state = SyncState::new();
        state.is_initialized = true;
        state.touch(at(1));
        state.record(&manual_conflict("Final"));
        state.record_failure();
        state.record_subscription_error();

        state.reset();
        assert_eq!(state, SyncState::default());
    }

    #[test]
    fn state_serialization() {
        let state = SyncState::<Task>::new();
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["isInitialized"], false);
        assert!(value["lastSyncTime"].is_null());
        assert_eq!(value["conflictCount"], 0);
        assert_eq!(value["syncedRecords"], 0);
        assert_eq!(value["failedRecords"], 0);
        assert_eq!(value["subscriptionErrors"], 0);
        assert_eq!(value["conflicts"], serde_json::json!([]));
    }
}
