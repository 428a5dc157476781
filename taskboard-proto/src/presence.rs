//! Presence records published on a board's presence channel.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, UserId};

/// One connected session's presence on a board.
///
/// Ephemeral: exists only while the session is joined to the channel.
/// Republishing replaces the previous record for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    /// User the session belongs to.
    pub user_id: UserId,
    /// User's e-mail, shown on the avatar.
    pub email: String,
    /// When this record was (re)published.
    pub online_at: DateTime<Utc>,
    /// Task the user currently has open, if any. Advisory only.
    #[serde(default)]
    pub editing_task_id: Option<TaskId>,
}

impl PresenceEntry {
    /// Returns `true` if this user has `task_id` open.
    #[must_use]
    pub fn is_editing(&self, task_id: &TaskId) -> bool {
        self.editing_task_id.as_ref() == Some(task_id)
    }
}

/// Server-reported presence state: presence key to every record reported
/// under that key. More than one record per key only happens with stale
/// replicas during reconnection.
pub type PresenceState = BTreeMap<String, Vec<PresenceEntry>>;
