//! Edge case tests for ordo-sync-engine
//!
//! These tests drive the resolver the way a store would: look up the local
//! row, resolve, apply the action, then record the outcome.

use chrono::{Duration, TimeZone, Utc};
use ordo_sync_engine::{
    Action, ConflictStrategy, Error, Operation, Resolver, SyncRecord, SyncState, Task, TaskPatch,
    Timestamp,
};
use proptest::prelude::*;
use std::collections::HashMap;

fn at(day: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

/// Minimal in-memory table applying resolver actions.
struct Table {
    rows: HashMap<String, Task>,
    state: SyncState<Task>,
    resolver: Resolver,
    deferred: u64,
}

impl Table {
    fn new(strategy: ConflictStrategy) -> Self {
        Self {
            rows: HashMap::new(),
            state: SyncState::new(),
            resolver: Resolver::new(strategy),
            deferred: 0,
        }
    }

    fn apply(&mut self, op: &Operation<Task>) -> Result<(), Error> {
        let local = self.rows.get(op.record_id());
        let resolution = match self.resolver.resolve("tasks", local, op, at(20)) {
            Ok(resolution) => resolution,
            Err(err) => {
                self.state.record_failure();
                return Err(err);
            }
        };

        match &resolution.action {
            Action::Insert(r) | Action::Replace(r) | Action::Merge(r) => {
                self.rows.insert(r.id().to_string(), r.clone());
            }
            Action::Delete => {
                self.rows.remove(&resolution.record_id);
            }
            Action::Defer(_) => self.deferred += 1,
            Action::KeepLocal | Action::Unchanged => {}
        }
        self.state.record(&resolution);
        Ok(())
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn example_scenario_latest_wins() {
    let mut table = Table::new(ConflictStrategy::LatestWins);
    table
        .rows
        .insert("t1".into(), Task::new("t1", "Draft", at(1)));

    let remote = TaskPatch::new("t1", at(2)).title("Final");
    table.apply(&Operation::remote_update(remote)).unwrap();

    let resolved = &table.rows["t1"];
    assert_eq!(resolved.title, "Final");
    assert_eq!(resolved.updated_at, at(2));
    assert_eq!(table.state.conflict_count, 1);
    assert_eq!(table.state.synced_records, 1);
}

#[test]
fn initial_sync_inserts_are_clean() {
    let mut table = Table::new(ConflictStrategy::LatestWins);
    for i in 0..5 {
        let patch = TaskPatch::new(format!("t{i}"), at(1)).title(format!("Task {i}"));
        table.apply(&Operation::remote_insert(patch)).unwrap();
    }

    assert_eq!(table.rows.len(), 5);
    assert_eq!(table.state.synced_records, 5);
    assert_eq!(table.state.conflict_count, 0);
}

#[test]
fn replayed_log_is_a_no_op() {
    let mut table = Table::new(ConflictStrategy::Merge);
    let op = Operation::remote_insert(TaskPatch::new("t1", at(1)).title("Draft"));
    table.apply(&op).unwrap();
    table.apply(&op).unwrap();

    assert_eq!(table.state.synced_records, 2);
    assert_eq!(table.state.conflict_count, 0);
}

#[test]
fn incomplete_insert_is_counted_as_failure() {
    let mut table = Table::new(ConflictStrategy::LatestWins);
    let op = Operation::remote_insert(TaskPatch::new("t1", at(1)).completed(true));

    let err = table.apply(&op).unwrap_err();
    assert!(matches!(err, Error::IncompleteRecord { .. }));
    assert_eq!(table.state.failed_records, 1);
    assert!(table.rows.is_empty());
}

#[test]
fn partial_update_keeps_unsent_columns() {
    let mut table = Table::new(ConflictStrategy::LatestWins);
    table.rows.insert(
        "t1".into(),
        Task::new("t1", "Draft", at(1))
            .with_description("notes")
            .with_username("sam"),
    );

    let op = Operation::remote_update(TaskPatch::new("t1", at(2)).completed(true));
    table.apply(&op).unwrap();

    let row = &table.rows["t1"];
    assert!(row.completed);
    assert_eq!(row.description.as_deref(), Some("notes"));
    assert_eq!(row.username.as_deref(), Some("sam"));
}

#[test]
fn manual_conflicts_leave_local_row_alone() {
    let mut table = Table::new(ConflictStrategy::Manual);
    let local = Task::new("t1", "Draft", at(1));
    table.rows.insert("t1".into(), local.clone());

    let op = Operation::remote_update(TaskPatch::new("t1", at(2)).title("Final"));
    table.apply(&op).unwrap();

    assert_eq!(table.rows["t1"], local);
    assert_eq!(table.state.conflicts.len(), 1);
    assert_eq!(table.state.synced_records, 0);
}

#[test]
fn unicode_titles_survive_merge() {
    let mut table = Table::new(ConflictStrategy::Merge);
    table
        .rows
        .insert("t1".into(), Task::new("t1", "", at(2)));

    let op = Operation::remote_update(TaskPatch::new("t1", at(1)).title("日本語テスト 🎉"));
    table.apply(&op).unwrap();
    assert_eq!(table.rows["t1"].title, "日本語テスト 🎉");
    assert_eq!(table.rows["t1"].updated_at, at(2));
}

// ============================================================================
// Property Tests
// ============================================================================

#[derive(Debug, Clone)]
enum Step {
    Insert { id: u8, title: Option<String>, offset: i64 },
    Update { id: u8, title: Option<String>, completed: Option<bool>, offset: i64 },
    Delete { id: u8, offset: Option<i64> },
}

impl Step {
    fn to_operation(&self) -> Operation<Task> {
        let ts = |offset: i64| at(1) + Duration::minutes(offset);
        match self {
            Step::Insert { id, title, offset } => {
                let mut patch = TaskPatch::new(format!("t{id}"), ts(*offset));
                patch.title = title.clone();
                Operation::remote_insert(patch)
            }
            Step::Update {
                id,
                title,
                completed,
                offset,
            } => {
                let mut patch = TaskPatch::new(format!("t{id}"), ts(*offset));
                patch.title = title.clone();
                patch.completed = *completed;
                Operation::remote_update(patch)
            }
            Step::Delete { id, offset } => Operation::remote_delete(format!("t{id}"), offset.map(ts)),
        }
    }
}

fn arb_step() -> impl Strategy<Value = Step> {
    let id = 0u8..4;
    let title = proptest::option::of("[A-Za-z ]{0,8}");
    let offset = 0i64..600;
    prop_oneof![
        (id.clone(), title.clone(), offset.clone())
            .prop_map(|(id, title, offset)| Step::Insert { id, title, offset }),
        (id.clone(), title, proptest::option::of(any::<bool>()), offset.clone()).prop_map(
            |(id, title, completed, offset)| Step::Update {
                id,
                title,
                completed,
                offset
            }
        ),
        (id, proptest::option::of(offset)).prop_map(|(id, offset)| Step::Delete { id, offset }),
    ]
}

fn arb_strategy() -> impl Strategy<Value = ConflictStrategy> {
    prop_oneof![
        Just(ConflictStrategy::LatestWins),
        Just(ConflictStrategy::Merge),
        Just(ConflictStrategy::Manual),
    ]
}

proptest! {
    #[test]
    fn prop_no_silent_drops(
        strategy in arb_strategy(),
        steps in proptest::collection::vec(arb_step(), 1..40),
    ) {
        let mut table = Table::new(strategy);
        for step in &steps {
            let _ = table.apply(&step.to_operation());
        }

        let accounted = table.state.synced_records + table.state.failed_records + table.deferred;
        prop_assert_eq!(accounted, steps.len() as u64);
        prop_assert!(table.state.conflicts.len() as u64 <= table.deferred);
    }

    #[test]
    fn prop_resolution_deterministic(
        strategy in arb_strategy(),
        steps in proptest::collection::vec(arb_step(), 1..40),
    ) {
        let mut first = Table::new(strategy);
        let mut second = Table::new(strategy);
        for step in &steps {
            let op = step.to_operation();
            let _ = first.apply(&op);
            let _ = second.apply(&op);
        }

        prop_assert_eq!(first.rows, second.rows);
        prop_assert_eq!(first.state, second.state);
    }
}
