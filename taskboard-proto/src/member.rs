//! Board membership, user profiles, and assignee display data.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{BoardId, UserId};

/// Invitation state of a board membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    /// Invited but not yet accepted. Not visible as a collaborator.
    Pending,
    /// Accepted. May be assigned tasks and appears in presence.
    Accepted,
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
        }
    }
}

/// A row of the `board_members` table. `(board_id, user_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Board the membership belongs to.
    pub board_id: BoardId,
    /// Invited user.
    pub user_id: UserId,
    /// Invitation state.
    pub status: MemberStatus,
}

/// A row of the `profiles` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// User identifier.
    pub id: UserId,
    /// Login e-mail.
    pub email: String,
    /// Optional display name.
    #[serde(default)]
    pub full_name: Option<String>,
}

impl Profile {
    /// Full name if set, otherwise the local part of the e-mail.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.full_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// A collaborator on a board: membership joined with its profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// User identifier.
    pub user_id: UserId,
    /// Login e-mail.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Invitation state.
    pub status: MemberStatus,
}

impl Member {
    /// Joins a membership row with the member's profile.
    #[must_use]
    pub fn from_parts(membership: &Membership, profile: &Profile) -> Self {
        Self {
            user_id: membership.user_id,
            email: profile.email.clone(),
            name: profile.display_name(),
            status: membership.status,
        }
    }
}

/// A user a task can be assigned to, with avatar initials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignee {
    /// User identifier.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Login e-mail.
    pub email: String,
    /// Two upper-case letters for the avatar, `??` when the name is empty.
    pub initials: String,
}

impl From<&Profile> for Assignee {
    fn from(profile: &Profile) -> Self {
        let name = profile.display_name();
        Self {
            user_id: profile.id,
            initials: initials(&name),
            name,
            email: profile.email.clone(),
        }
    }
}

/// First two characters of `name`, upper-cased.
#[must_use]
pub fn initials(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "??".to_string();
    }
    trimmed.chars().take(2).flat_map(char::to_uppercase).collect()
}
