//! Board rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BoardId, UserId};

/// A board as stored in the `boards` table.
///
/// Owned by its creator and readable by accepted members. Deleting a board
/// is terminal for every session that has it open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// Unique board identifier.
    pub id: BoardId,
    /// Board title.
    pub title: String,
    /// User who created the board.
    pub owner_id: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Board {
    /// Creates a new board owned by `owner_id`, stamped with the current time.
    pub fn new(title: impl Into<String>, owner_id: UserId) -> Self {
        Self {
            id: BoardId::new(),
            title: title.into(),
            owner_id,
            created_at: Utc::now(),
        }
    }
}
