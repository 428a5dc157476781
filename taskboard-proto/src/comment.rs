//! Comment rows on a task's discussion thread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CommentId, TaskId, UserId};

/// A row of the `comments` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Client-generated identifier.
    pub id: CommentId,
    /// Task the comment belongs to.
    pub task_id: TaskId,
    /// Author.
    pub user_id: UserId,
    /// Comment body.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Creates a comment with a fresh client-side id, stamped now.
    pub fn new(task_id: TaskId, user_id: UserId, content: impl Into<String>) -> Self {
        Self {
            id: CommentId::new(),
            task_id,
            user_id,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
