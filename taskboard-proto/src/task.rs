//! Task rows, drafts, and partial updates.
//!
//! A [`Task`] is stored and broadcast as a whole JSON row; the engine never
//! merges field by field. [`NewTask`] is the draft a user submits before the
//! row exists, and [`TaskPatch`] is the partial update sent for an edit.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BoardId, TaskId, UserId};

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Position given to a freshly created task when its bucket is empty or
/// holds only low positions. Pending a future reorder pass.
pub const NEW_TASK_POSITION: i64 = 9999;

/// Column a task lives in. Each status maps to exactly one drop zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Not started.
    Todo,
    /// Being worked on.
    InProgress,
    /// Finished.
    Done,
}

impl TaskStatus {
    /// All statuses in column order.
    pub const ALL: [Self; 3] = [Self::Todo, Self::InProgress, Self::Done];

    /// Wire representation, as stored in the `status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    /// Low priority.
    Low,
    /// Medium priority (default for new tasks).
    #[default]
    Medium,
    /// High priority.
    High,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// A task row as stored in the `tasks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// Board this task belongs to.
    pub board_id: BoardId,
    /// Task title.
    pub title: String,
    /// Optional free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Column the task is in.
    pub status: TaskStatus,
    /// Task priority.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Ordering key within the status bucket (ascending).
    pub position: i64,
    /// Optional due date.
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// Optional assignee.
    #[serde(default)]
    pub assignee_id: Option<UserId>,
}

/// A task draft submitted from the create form.
///
/// The id is generated on the client so the optimistic insert and the
/// confirmed row are recognized as the same task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Client-generated identifier.
    pub id: TaskId,
    /// Task title.
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Initial column.
    pub status: TaskStatus,
    /// Priority.
    pub priority: TaskPriority,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Optional assignee.
    pub assignee_id: Option<UserId>,
}

impl NewTask {
    /// Creates a draft in the `TODO` column with medium priority.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::default(),
            due_date: None,
            assignee_id: None,
        }
    }

    /// Sets the initial column.
    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the assignee.
    #[must_use]
    pub const fn with_assignee(mut self, assignee: UserId) -> Self {
        self.assignee_id = Some(assignee);
        self
    }

    /// Builds the full row for `board_id` at the given position.
    #[must_use]
    pub fn into_task(self, board_id: BoardId, position: i64) -> Task {
        Task {
            id: self.id,
            board_id,
            title: self.title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            position,
            due_date: self.due_date,
            assignee_id: self.assignee_id,
        }
    }
}

/// A partial update to a task.
///
/// `None` leaves a field untouched. For nullable columns `Some(None)`
/// clears the value. Serializes to a JSON object containing only the
/// touched columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskPatch {
    /// New title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description, or `Some(None)` to clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    /// New column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// New priority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    /// New ordering key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    /// New due date, or `Some(None)` to clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    /// New assignee, or `Some(None)` to unassign.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Option<UserId>>,
}

impl TaskPatch {
    /// A patch that only moves the task to another column.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// A patch that only changes the title.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Returns `true` if the patch touches no column.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.position.is_none()
            && self.due_date.is_none()
            && self.assignee_id.is_none()
    }

    /// Applies every touched column to `task`.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(position) = self.position {
            task.position = position;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(assignee_id) = self.assignee_id {
            task.assignee_id = assignee_id;
        }
    }
}

/// The contents of the task edit form.
///
/// Saving a draft either creates a task (no existing id) or replaces every
/// editable column of an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    /// Task title.
    pub title: String,
    /// Description; empty means none.
    pub description: Option<String>,
    /// Column.
    pub status: TaskStatus,
    /// Priority.
    pub priority: TaskPriority,
    /// Due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Assignee.
    pub assignee_id: Option<UserId>,
}

impl TaskDraft {
    /// A draft with the given title in the `TODO` column.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::default(),
            due_date: None,
            assignee_id: None,
        }
    }

    /// A draft pre-filled from an existing task.
    #[must_use]
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            priority: task.priority,
            due_date: task.due_date,
            assignee_id: task.assignee_id,
        }
    }

    fn description(&self) -> Option<String> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(ToString::to_string)
    }

    /// Converts the draft into a new task with a fresh id.
    #[must_use]
    pub fn into_new_task(self) -> NewTask {
        NewTask {
            id: TaskId::new(),
            title: self.title.trim().to_string(),
            description: self.description(),
            status: self.status,
            priority: self.priority,
            due_date: self.due_date,
            assignee_id: self.assignee_id,
        }
    }

    /// Converts the draft into a patch touching every editable column.
    #[must_use]
    pub fn into_patch(self) -> TaskPatch {
        TaskPatch {
            description: Some(self.description()),
            title: Some(self.title.trim().to_string()),
            status: Some(self.status),
            priority: Some(self.priority),
            position: None,
            due_date: Some(self.due_date),
            assignee_id: Some(self.assignee_id),
        }
    }
}

/// Position for a new task appended to `status`: above every position
/// already in that bucket, and never below [`NEW_TASK_POSITION`].
pub fn append_position<'a>(tasks: impl IntoIterator<Item = &'a Task>, status: TaskStatus) -> i64 {
    tasks
        .into_iter()
        .filter(|t| t.status == status)
        .map(|t| t.position.saturating_add(1))
        .fold(NEW_TASK_POSITION, i64::max)
}
