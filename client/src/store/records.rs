//! Row mapping for the tasks table.

use crate::error::StoreError;
use chrono::SecondsFormat;
use ordo_sync_engine::{wire::parse_timestamp, Task, Timestamp};
use sqlx::{sqlite::SqliteRow, Row};

/// Columns selected for every task read.
pub(crate) const TASK_COLUMNS: &str =
    "id, title, description, completed, created_at, updated_at, due_date, username, \
     synced, sent_to_server, modified_columns, deleted, new";

/// A stored task row from the database.
#[derive(Debug)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub created_at: String,
    pub updated_at: String,
    pub due_date: Option<String>,
    pub username: Option<String>,
    pub synced: bool,
    pub sent_to_server: bool,
    pub modified_columns: String,
    pub deleted: bool,
    pub new: bool,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for TaskRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(TaskRow {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            completed: row.try_get("completed")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            due_date: row.try_get("due_date")?,
            username: row.try_get("username")?,
            synced: row.try_get("synced")?,
            sent_to_server: row.try_get("sent_to_server")?,
            modified_columns: row.try_get("modified_columns")?,
            deleted: row.try_get("deleted")?,
            new: row.try_get("new")?,
        })
    }
}

impl TaskRow {
    /// Convert database row to a `Task`.
    pub fn to_task(&self) -> Result<Task, StoreError> {
        Ok(Task {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            completed: self.completed,
            created_at: decode_timestamp(&self.created_at)?,
            updated_at: decode_timestamp(&self.updated_at)?,
            due_date: self.due_date.as_deref().map(decode_timestamp).transpose()?,
            username: self.username.clone(),
        })
    }

    /// A pushed change the server has not echoed back yet.
    pub fn awaiting_echo(&self) -> bool {
        self.sent_to_server && !self.synced
    }

    /// Columns changed locally since the last remote write.
    pub fn modified_columns(&self) -> Result<Vec<String>, StoreError> {
        serde_json::from_str(&self.modified_columns).map_err(|e| {
            StoreError::Corrupt(format!("modified_columns of {}: {e}", self.id))
        })
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so they order lexically.
pub(crate) fn encode_timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<Timestamp, StoreError> {
    parse_timestamp(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}
