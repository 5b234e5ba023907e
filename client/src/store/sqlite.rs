//! SQLite implementation of [`LocalStore`] for tasks.

use super::{
    create_pool,
    records::{decode_timestamp, encode_timestamp, TaskRow, TASK_COLUMNS},
    run_migrations, LocalStore, PendingChange, Pool, RefetchPolicy, TableStats,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use ordo_sync_engine::{
    Action, ApplyAction, Change, Operation, Resolution, Resolver, SyncRecord, Task, Timestamp,
};
use sqlx::SqliteConnection;
use std::collections::BTreeSet;

/// Columns the sync engine reads or writes.
const REQUIRED_COLUMNS: [&str; 13] = [
    "id",
    "title",
    "description",
    "completed",
    "created_at",
    "updated_at",
    "due_date",
    "username",
    "synced",
    "sent_to_server",
    "modified_columns",
    "deleted",
    "new",
];

/// User-editable columns, recorded as modified when a row is created locally.
const EDITABLE_COLUMNS: [&str; 5] = ["title", "description", "completed", "due_date", "username"];

/// Task store backed by a single-connection SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// A migrated in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = create_pool("sqlite::memory:").await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table(table: &str) -> Result<&str, StoreError> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && table.len() <= 63;

    if valid {
        Ok(table)
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

async fn fetch_row(
    conn: &mut SqliteConnection,
    table: &str,
    id: &str,
) -> Result<Option<TaskRow>, StoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM {table} WHERE id = ?");
    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

/// Write a row as the remote side has it; clears any local bookkeeping,
/// including a local tombstone.
async fn upsert_remote(
    conn: &mut SqliteConnection,
    table: &str,
    task: &Task,
) -> Result<(), StoreError> {
    let sql = format!(
        r#"
        INSERT INTO {table} (
            id, title, description, completed, created_at, updated_at,
            due_date, username, synced, sent_to_server, modified_columns, deleted, new
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 1, '[]', 0, 0)
        ON CONFLICT (id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            completed = excluded.completed,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            due_date = excluded.due_date,
            username = excluded.username,
            synced = 1,
            sent_to_server = 1,
            modified_columns = '[]',
            deleted = 0,
            new = 0
        "#
    );

    sqlx::query(&sql)
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.completed)
        .bind(encode_timestamp(task.created_at))
        .bind(encode_timestamp(task.updated_at))
        .bind(task.due_date.map(encode_timestamp))
        .bind(&task.username)
        .execute(conn)
        .await?;

    Ok(())
}

/// Overwrite the data columns of an existing row, leaving its sync flags alone.
async fn update_fields(
    conn: &mut SqliteConnection,
    table: &str,
    task: &Task,
) -> Result<(), StoreError> {
    let sql = format!(
        r#"
        UPDATE {table} SET
            title = ?, description = ?, completed = ?, created_at = ?,
            updated_at = ?, due_date = ?, username = ?
        WHERE id = ?
        "#
    );

    sqlx::query(&sql)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.completed)
        .bind(encode_timestamp(task.created_at))
        .bind(encode_timestamp(task.updated_at))
        .bind(task.due_date.map(encode_timestamp))
        .bind(&task.username)
        .bind(&task.id)
        .execute(conn)
        .await?;

    Ok(())
}

/// The server echoed back a pushed row unchanged: it is in sync now.
async fn confirm_synced(conn: &mut SqliteConnection, table: &str, id: &str) -> Result<(), StoreError> {
    let sql = format!(
        "UPDATE {table} SET synced = 1, modified_columns = '[]', new = 0 \
         WHERE id = ? AND sent_to_server = 1"
    );
    sqlx::query(&sql).bind(id).execute(conn).await?;
    Ok(())
}

/// Hide a row behind a pending tombstone.
async fn mark_deleted(
    conn: &mut SqliteConnection,
    table: &str,
    id: &str,
    at: Timestamp,
) -> Result<(), StoreError> {
    let sql = format!(
        "UPDATE {table} SET deleted = 1, synced = 0, sent_to_server = 0, updated_at = ? \
         WHERE id = ?"
    );
    sqlx::query(&sql)
        .bind(encode_timestamp(at))
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Write a row as a pending local change. Revives a tombstoned row.
///
/// Columns already pending stay recorded until the server echoes the row back.
async fn upsert_local(
    conn: &mut SqliteConnection,
    table: &str,
    task: &Task,
    existing: Option<&TaskRow>,
) -> Result<ApplyAction, StoreError> {
    let (modified, new, action) = match existing {
        Some(row) => {
            let mut columns: BTreeSet<String> = row.modified_columns()?.into_iter().collect();
            columns.extend(
                task.changed_fields(&row.to_task()?)
                    .into_iter()
                    .map(String::from),
            );
            (columns.into_iter().collect::<Vec<_>>(), row.new, ApplyAction::Updated)
        }
        None => (
            EDITABLE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            true,
            ApplyAction::Inserted,
        ),
    };
    let modified = serde_json::to_string(&modified)
        .map_err(|e| StoreError::Corrupt(format!("modified_columns of {}: {e}", task.id)))?;

    let sql = format!(
        r#"
        INSERT INTO {table} (
            id, title, description, completed, created_at, updated_at,
            due_date, username, synced, sent_to_server, modified_columns, deleted, new
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, 0, ?)
        ON CONFLICT (id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            completed = excluded.completed,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            due_date = excluded.due_date,
            username = excluded.username,
            synced = 0,
            sent_to_server = 0,
            modified_columns = excluded.modified_columns,
            deleted = 0,
            new = excluded.new
        "#
    );

    sqlx::query(&sql)
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.completed)
        .bind(encode_timestamp(task.created_at))
        .bind(encode_timestamp(task.updated_at))
        .bind(task.due_date.map(encode_timestamp))
        .bind(&task.username)
        .bind(modified)
        .bind(new)
        .execute(conn)
        .await?;

    Ok(action)
}

async fn delete_row(conn: &mut SqliteConnection, table: &str, id: &str) -> Result<u64, StoreError> {
    let sql = format!("DELETE FROM {table} WHERE id = ?");
    let result = sqlx::query(&sql).bind(id).execute(conn).await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl LocalStore<Task> for SqliteStore {
    async fn ensure_support(&self, table: &str) -> Result<(), StoreError> {
        let table = validate_table(table)?;

        let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        if columns.is_empty() {
            return Err(StoreError::MissingTable(table.to_string()));
        }
        if let Some(missing) = REQUIRED_COLUMNS
            .iter()
            .find(|required| !columns.iter().any(|c| c == *required))
        {
            return Err(StoreError::MissingColumn {
                table: table.to_string(),
                column: missing.to_string(),
            });
        }

        let sql = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_updated_at ON {table} (updated_at)"
        );
        sqlx::query(&sql).execute(&self.pool).await?;

        tracing::debug!(table = %table, "Store support verified");
        Ok(())
    }

    async fn apply_remote(
        &self,
        table: &str,
        op: &Operation<Task>,
        resolver: &Resolver,
    ) -> Result<Resolution<Task>, StoreError> {
        let table = validate_table(table)?;
        let mut tx = self.pool.begin().await?;

        let row = fetch_row(&mut tx, table, op.record_id()).await?;
        // A remote delete of a locally deleted row confirms it; nothing to resolve
        let confirms_delete = op.is_delete() && row.as_ref().is_some_and(|r| r.deleted);
        let local = match &row {
            Some(row) if !confirms_delete => Some(row.to_task()?),
            _ => None,
        };
        let resolution = resolver.resolve(table, local.as_ref(), op, Utc::now())?;

        match &resolution.action {
            Action::Insert(task) | Action::Replace(task) => {
                upsert_remote(&mut tx, table, task).await?
            }
            Action::Merge(task) => update_fields(&mut tx, table, task).await?,
            Action::Delete => {
                delete_row(&mut tx, table, op.record_id()).await?;
            }
            Action::Unchanged if confirms_delete => {
                delete_row(&mut tx, table, op.record_id()).await?;
            }
            Action::Unchanged if row.as_ref().is_some_and(TaskRow::awaiting_echo) => {
                confirm_synced(&mut tx, table, op.record_id()).await?
            }
            Action::KeepLocal | Action::Unchanged | Action::Defer(_) => {}
        }

        tx.commit().await?;

        tracing::debug!(
            table = %table,
            record_id = %resolution.record_id,
            action = %resolution.action.kind(),
            collided = resolution.collided,
            "Applied remote operation"
        );
        Ok(resolution)
    }

    async fn write_resolved(&self, table: &str, record: &Task) -> Result<(), StoreError> {
        let table = validate_table(table)?;
        let mut tx = self.pool.begin().await?;

        let existing = fetch_row(&mut tx, table, &record.id).await?;
        upsert_local(&mut tx, table, record, existing.as_ref()).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn write_local(
        &self,
        table: &str,
        op: &Operation<Task>,
    ) -> Result<ApplyAction, StoreError> {
        let table = validate_table(table)?;
        let mut tx = self.pool.begin().await?;
        let existing = fetch_row(&mut tx, table, op.record_id()).await?;

        let action = match &op.change {
            Change::Delete(tombstone) => match &existing {
                Some(row) if !row.deleted => {
                    let at = tombstone.at.unwrap_or_else(Utc::now);
                    mark_deleted(&mut tx, table, &tombstone.id, at).await?;
                    ApplyAction::Deleted
                }
                _ => ApplyAction::Unchanged,
            },
            Change::Insert(patch) | Change::Update(patch) => match &existing {
                Some(row) => {
                    let current = row.to_task()?;
                    let mut next = current.clone();
                    next.apply_patch(patch, ordo_sync_engine::FieldRule::Overwrite);
                    next.set_updated_at(patch.updated_at);

                    if next == current && !row.deleted {
                        ApplyAction::Unchanged
                    } else {
                        upsert_local(&mut tx, table, &next, Some(row)).await?
                    }
                }
                None => {
                    let task = Task::from_patch(patch)?;
                    upsert_local(&mut tx, table, &task, None).await?
                }
            },
        };

        tx.commit().await?;

        tracing::debug!(
            table = %table,
            record_id = %op.record_id(),
            action = %action,
            "Applied local operation"
        );
        Ok(action)
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Task>, StoreError> {
        let table = validate_table(table)?;
        let mut conn = self.pool.acquire().await?;
        fetch_row(&mut conn, table, id)
            .await?
            .filter(|row| !row.deleted)
            .map(|row| row.to_task())
            .transpose()
    }

    async fn prepare_refetch(
        &self,
        table: &str,
        policy: RefetchPolicy,
    ) -> Result<u64, StoreError> {
        let table = validate_table(table)?;
        let mut tx = self.pool.begin().await?;

        let removed = match policy {
            RefetchPolicy::KeepLocal => 0,
            RefetchPolicy::ClearTable => {
                let sql = format!("DELETE FROM {table}");
                sqlx::query(&sql).execute(&mut *tx).await?.rows_affected()
            }
            RefetchPolicy::PruneOlderThan(window) => {
                let sql = format!("SELECT MAX(updated_at) FROM {table}");
                let newest: Option<String> =
                    sqlx::query_scalar(&sql).fetch_one(&mut *tx).await?;

                match newest {
                    Some(newest) => {
                        let cutoff = decode_timestamp(&newest)? - window;
                        // Unsent local changes survive the prune
                        let sql = format!(
                            "DELETE FROM {table} WHERE updated_at < ? AND sent_to_server = 1"
                        );
                        sqlx::query(&sql)
                            .bind(encode_timestamp(cutoff))
                            .execute(&mut *tx)
                            .await?
                            .rows_affected()
                    }
                    None => 0,
                }
            }
        };

        tx.commit().await?;

        tracing::info!(table = %table, removed, ?policy, "Prepared table for refetch");
        Ok(removed)
    }

    async fn stats(&self, table: &str) -> Result<TableStats, StoreError> {
        let table = validate_table(table)?;
        let sql = format!(
            r#"
            SELECT COUNT(*) - COALESCE(SUM(deleted), 0),
                   SUM(CASE WHEN sent_to_server = 0 THEN 1 ELSE 0 END),
                   MAX(updated_at)
            FROM {table}
            "#
        );
        let (total, pending, last_updated): (i64, Option<i64>, Option<String>) =
            sqlx::query_as(&sql).fetch_one(&self.pool).await?;

        Ok(TableStats {
            total_records: total as u64,
            pending_local: pending.unwrap_or(0) as u64,
            last_updated: last_updated.as_deref().map(decode_timestamp).transpose()?,
        })
    }

    async fn pending_changes(&self, table: &str) -> Result<Vec<PendingChange<Task>>, StoreError> {
        let table = validate_table(table)?;
        let sql = format!(
            r#"
            SELECT {TASK_COLUMNS} FROM {table}
            WHERE synced = 0 AND sent_to_server = 0
            ORDER BY updated_at ASC
            "#
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingChange {
                    record: row.to_task()?,
                    modified_columns: row.modified_columns()?,
                    new: row.new,
                    deleted: row.deleted,
                })
            })
            .collect()
    }

    async fn mark_sent(
        &self,
        table: &str,
        id: &str,
        updated_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let table = validate_table(table)?;
        let sql = format!("UPDATE {table} SET sent_to_server = 1 WHERE id = ? AND updated_at = ?");
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(encode_timestamp(updated_at))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ordo_sync_engine::{ConflictStrategy, TaskPatch};

    fn at(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn remote(task: &Task) -> Operation<Task> {
        Operation::remote_update(task.to_patch())
    }

    async fn store_with(task: &Task) -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .apply_remote("tasks", &remote(task), &Resolver::default())
            .await
            .unwrap();
        store
    }

    #[test]
    fn table_names_are_validated() {
        assert!(validate_table("tasks").is_ok());
        assert!(validate_table("_archive_2").is_ok());
        assert!(validate_table("").is_err());
        assert!(validate_table("1tasks").is_err());
        assert!(validate_table("tasks; DROP TABLE tasks").is_err());
    }

    #[tokio::test]
    async fn ensure_support_checks_schema() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.ensure_support("tasks").await.unwrap();
        // Idempotent
        store.ensure_support("tasks").await.unwrap();

        assert!(matches!(
            store.ensure_support("notes").await,
            Err(StoreError::MissingTable(_))
        ));

        sqlx::query("CREATE TABLE notes (id TEXT PRIMARY KEY, title TEXT)")
            .execute(store.pool())
            .await
            .unwrap();
        let err = store.ensure_support("notes").await.unwrap_err();
        assert!(err.is_missing_capability());
        assert!(matches!(err, StoreError::MissingColumn { column, .. } if column == "description"));
    }

    #[tokio::test]
    async fn remote_insert_then_latest_wins() {
        let store = store_with(&Task::new("t1", "Draft", at(1))).await;

        let resolution = store
            .apply_remote(
                "tasks",
                &remote(&Task::new("t1", "Final", at(2))),
                &Resolver::default(),
            )
            .await
            .unwrap();
        assert!(resolution.collided);
        assert_eq!(resolution.action.kind(), ApplyAction::Updated);

        let stored = store.get("tasks", "t1").await.unwrap().unwrap();
        assert_eq!(stored.title, "Final");
        assert_eq!(stored.updated_at, at(2));
    }

    #[tokio::test]
    async fn newer_local_row_is_kept() {
        let store = store_with(&Task::new("t1", "Local", at(3))).await;

        let resolution = store
            .apply_remote(
                "tasks",
                &remote(&Task::new("t1", "Stale", at(2))),
                &Resolver::default(),
            )
            .await
            .unwrap();
        assert_eq!(resolution.action.kind(), ApplyAction::KeptLocal);
        assert_eq!(store.get("tasks", "t1").await.unwrap().unwrap().title, "Local");
    }

    #[tokio::test]
    async fn merge_keeps_local_sync_flags() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .write_local(
                "tasks",
                &Operation::new(
                    Change::Insert(Task::new("t1", "Local", at(1)).to_patch()),
                    ordo_sync_engine::Origin::Local,
                ),
            )
            .await
            .unwrap();

        let patch = TaskPatch::new("t1", at(2)).description(Some("from server".into()));
        let resolution = store
            .apply_remote(
                "tasks",
                &Operation::remote_update(patch),
                &Resolver::new(ConflictStrategy::Merge),
            )
            .await
            .unwrap();
        assert_eq!(resolution.action.kind(), ApplyAction::Updated);

        let pending = store.pending_changes("tasks").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].new);
        assert_eq!(pending[0].record.description.as_deref(), Some("from server"));
    }

    #[tokio::test]
    async fn manual_strategy_leaves_row_untouched() {
        let store = store_with(&Task::new("t1", "Draft", at(1))).await;

        let resolution = store
            .apply_remote(
                "tasks",
                &remote(&Task::new("t1", "Final", at(2))),
                &Resolver::new(ConflictStrategy::Manual),
            )
            .await
            .unwrap();
        assert!(matches!(resolution.action, Action::Defer(_)));
        assert_eq!(store.get("tasks", "t1").await.unwrap().unwrap().title, "Draft");
    }

    #[tokio::test]
    async fn remote_delete_removes_row() {
        let store = store_with(&Task::new("t1", "Draft", at(1))).await;

        let resolution = store
            .apply_remote(
                "tasks",
                &Operation::remote_delete("t1", Some(at(2))),
                &Resolver::default(),
            )
            .await
            .unwrap();
        assert_eq!(resolution.action.kind(), ApplyAction::Deleted);
        assert!(store.get("tasks", "t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incomplete_insert_fails_without_writing() {
        let store = SqliteStore::in_memory().await.unwrap();
        let result = store
            .apply_remote(
                "tasks",
                &Operation::remote_insert(TaskPatch::new("t1", at(1)).completed(true)),
                &Resolver::default(),
            )
            .await;

        assert!(matches!(result, Err(StoreError::Engine(_))));
        assert!(store.get("tasks", "t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_writes_track_modified_columns() {
        let store = store_with(&Task::new("t1", "Draft", at(1))).await;

        let update = Operation::new(
            Change::Update(TaskPatch::new("t1", at(2)).title("Edited")),
            ordo_sync_engine::Origin::Local,
        );
        assert_eq!(
            store.write_local("tasks", &update).await.unwrap(),
            ApplyAction::Updated
        );
        assert_eq!(
            store.write_local("tasks", &update).await.unwrap(),
            ApplyAction::Unchanged
        );

        let pending = store.pending_changes("tasks").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].modified_columns, vec!["title"]);
        assert!(!pending[0].new);

        let stats = store.stats("tasks").await.unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.pending_local, 1);
        assert_eq!(stats.last_updated, Some(at(2)));
    }

    #[tokio::test]
    async fn mark_sent_skips_rows_changed_since() {
        let store = SqliteStore::in_memory().await.unwrap();
        let insert = Operation::new(
            Change::Insert(Task::new("t1", "Draft", at(1)).to_patch()),
            ordo_sync_engine::Origin::Local,
        );
        store.write_local("tasks", &insert).await.unwrap();

        assert!(!store.mark_sent("tasks", "t1", at(5)).await.unwrap());
        assert!(store.mark_sent("tasks", "t1", at(1)).await.unwrap());
        assert!(store.pending_changes("tasks").await.unwrap().is_empty());
    }

    fn local(change: Change<TaskPatch>) -> Operation<Task> {
        Operation::new(change, ordo_sync_engine::Origin::Local)
    }

    fn local_delete(id: &str, at: Timestamp) -> Operation<Task> {
        local(Change::Delete(ordo_sync_engine::Tombstone {
            id: id.into(),
            at: Some(at),
        }))
    }

    async fn flags(store: &SqliteStore, id: &str) -> Option<(bool, bool, bool, bool)> {
        sqlx::query_as("SELECT synced, sent_to_server, deleted, new FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn local_delete_leaves_pending_tombstone() {
        let store = store_with(&Task::new("t1", "Draft", at(1))).await;

        assert_eq!(
            store.write_local("tasks", &local_delete("t1", at(2))).await.unwrap(),
            ApplyAction::Deleted
        );
        assert_eq!(
            store.write_local("tasks", &local_delete("t1", at(3))).await.unwrap(),
            ApplyAction::Unchanged
        );
        assert!(store.get("tasks", "t1").await.unwrap().is_none());

        let stats = store.stats("tasks").await.unwrap();
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.pending_local, 1);

        let pending = store.pending_changes("tasks").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].deleted);
        assert_eq!(pending[0].record.updated_at, at(2));
    }

    #[tokio::test]
    async fn remote_delete_confirms_tombstone() {
        let store = store_with(&Task::new("t1", "Draft", at(3))).await;
        store
            .write_local("tasks", &local_delete("t1", at(4)))
            .await
            .unwrap();
        assert!(store.mark_sent("tasks", "t1", at(4)).await.unwrap());

        // The tombstone is newer, but the server's delete is not a conflict
        let resolution = store
            .apply_remote(
                "tasks",
                &Operation::remote_delete("t1", Some(at(2))),
                &Resolver::new(ConflictStrategy::Manual),
            )
            .await
            .unwrap();

        assert!(!resolution.collided);
        assert_eq!(flags(&store, "t1").await, None);
    }

    #[tokio::test]
    async fn local_insert_revives_tombstone() {
        let store = store_with(&Task::new("t1", "Draft", at(1))).await;
        store
            .write_local("tasks", &local_delete("t1", at(2)))
            .await
            .unwrap();

        let action = store
            .write_local(
                "tasks",
                &local(Change::Insert(Task::new("t1", "Again", at(3)).to_patch())),
            )
            .await
            .unwrap();

        assert_eq!(action, ApplyAction::Updated);
        assert_eq!(store.get("tasks", "t1").await.unwrap().unwrap().title, "Again");
        assert!(!store.pending_changes("tasks").await.unwrap()[0].deleted);
    }

    #[tokio::test]
    async fn echoed_push_clears_local_bookkeeping() {
        let store = SqliteStore::in_memory().await.unwrap();
        let task = Task::new("t1", "Draft", at(1));
        store
            .write_local("tasks", &local(Change::Insert(task.to_patch())))
            .await
            .unwrap();

        // An echo of a row not pushed yet leaves it pending
        store
            .apply_remote("tasks", &remote(&task), &Resolver::default())
            .await
            .unwrap();
        assert_eq!(store.pending_changes("tasks").await.unwrap().len(), 1);

        assert!(store.mark_sent("tasks", "t1", at(1)).await.unwrap());
        let resolution = store
            .apply_remote("tasks", &remote(&task), &Resolver::default())
            .await
            .unwrap();
        assert_eq!(resolution.action, Action::Unchanged);
        assert_eq!(flags(&store, "t1").await, Some((true, true, false, false)));

        let edit = local(Change::Update(TaskPatch::new("t1", at(2)).title("Edited")));
        store.write_local("tasks", &edit).await.unwrap();
        let pending = store.pending_changes("tasks").await.unwrap();
        assert_eq!(pending[0].modified_columns, vec!["title"]);
        assert!(!pending[0].new);
    }

    #[tokio::test]
    async fn prune_removes_stale_synced_rows() {
        let store = store_with(&Task::new("old", "Old", at(1))).await;
        store
            .apply_remote(
                "tasks",
                &remote(&Task::new("fresh", "Fresh", at(5))),
                &Resolver::default(),
            )
            .await
            .unwrap();
        let pending = Operation::new(
            Change::Insert(Task::new("mine", "Mine", at(2)).to_patch()),
            ordo_sync_engine::Origin::Local,
        );
        store.write_local("tasks", &pending).await.unwrap();

        let removed = store
            .prepare_refetch("tasks", RefetchPolicy::PruneOlderThan(Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("tasks", "old").await.unwrap().is_none());
        assert!(store.get("tasks", "mine").await.unwrap().is_some());

        assert_eq!(
            store
                .prepare_refetch("tasks", RefetchPolicy::KeepLocal)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .prepare_refetch("tasks", RefetchPolicy::ClearTable)
                .await
                .unwrap(),
            2
        );
    }
}
