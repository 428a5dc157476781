//! Notification rows used by the invitation flow.

use serde::{Deserialize, Serialize};

use crate::ids::{BoardId, NotificationId, UserId};

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// Invitation to collaborate on a board.
    Invite,
}

/// Payload of an invite notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteMeta {
    /// Board the recipient was invited to.
    pub board_id: BoardId,
    /// E-mail of the inviting user.
    #[serde(default)]
    pub inviter: Option<String>,
}

/// A row of the `notifications` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification identifier.
    pub id: NotificationId,
    /// Recipient.
    pub user_id: UserId,
    /// Notification kind.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Human-readable text.
    pub content: String,
    /// Invite payload.
    pub meta_data: InviteMeta,
    /// Whether the recipient has acted on it.
    #[serde(default)]
    pub is_read: bool,
}
