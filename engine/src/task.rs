//! The `tasks` table: the entity Ordo's dashboards and task managers sync.

use crate::{
    error::Result,
    record::{merge_field, FieldRule, RecordPatch, SyncRecord},
    wire, Error, RecordId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// A task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub due_date: Option<Timestamp>,
    #[serde(default)]
    pub username: Option<String>,
}

impl Task {
    /// Create an open task with no description, due date or owner.
    pub fn new(id: impl Into<RecordId>, title: impl Into<String>, at: Timestamp) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            completed: false,
            created_at: at,
            updated_at: at,
            due_date: None,
            username: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    pub fn with_due_date(mut self, due_date: Timestamp) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// A full or partial task row from the shape log.
///
/// Nullable columns use `Option<Option<_>>`: `None` means the column was not
/// sent, `Some(None)` means it was explicitly set to null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "wire::nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "wire::flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed: Option<bool>,
    #[serde(
        default,
        deserialize_with = "wire::optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<Timestamp>,
    #[serde(deserialize_with = "wire::timestamp")]
    pub updated_at: Timestamp,
    #[serde(
        default,
        deserialize_with = "wire::nullable_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<Timestamp>>,
    #[serde(
        default,
        deserialize_with = "wire::nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<Option<String>>,
}

impl TaskPatch {
    /// A patch that only carries the identifier and timestamp.
    pub fn new(id: impl Into<RecordId>, updated_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            title: None,
            description: None,
            completed: None,
            created_at: None,
            updated_at,
            due_date: None,
            username: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }
}

impl RecordPatch for TaskPatch {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

fn never_empty<T>(_: &T) -> bool {
    false
}

impl SyncRecord for Task {
    type Patch = TaskPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: Timestamp) {
        self.updated_at = at;
    }

    fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            id: self.id.clone(),
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            completed: Some(self.completed),
            created_at: Some(self.created_at),
            updated_at: self.updated_at,
            due_date: Some(self.due_date),
            username: Some(self.username.clone()),
        }
    }

    fn from_patch(patch: &TaskPatch) -> Result<Self> {
        let title = patch.title.clone().ok_or_else(|| Error::IncompleteRecord {
            id: patch.id.clone(),
            field: "title".into(),
        })?;

        Ok(Self {
            id: patch.id.clone(),
            title,
            description: patch.description.clone().flatten(),
            completed: patch.completed.unwrap_or(false),
            created_at: patch.created_at.unwrap_or(patch.updated_at),
            updated_at: patch.updated_at,
            due_date: patch.due_date.flatten(),
            username: patch.username.clone().flatten(),
        })
    }

    fn apply_patch(&mut self, patch: &TaskPatch, rule: FieldRule) {
        merge_field(&mut self.title, patch.title.as_ref(), rule, |t| t.is_empty());
        merge_field(&mut self.description, patch.description.as_ref(), rule, blank);
        merge_field(&mut self.completed, patch.completed.as_ref(), rule, never_empty);
        merge_field(&mut self.created_at, patch.created_at.as_ref(), rule, never_empty);
        merge_field(&mut self.due_date, patch.due_date.as_ref(), rule, Option::is_none);
        merge_field(&mut self.username, patch.username.as_ref(), rule, blank);
    }

    fn changed_fields(&self, other: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.title != other.title {
            changed.push("title");
        }
        if self.description != other.description {
            changed.push("description");
        }
        if self.completed != other.completed {
            changed.push("completed");
        }
        if self.due_date != other.due_date {
            changed.push("due_date");
        }
        if self.username != other.username {
            changed.push("username");
        }
        changed
    }
}
