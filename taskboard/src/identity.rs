//! The signed-in user.

use taskboard_proto::ids::UserId;

/// Who this client acts as. Presence records, comments, invitations, and
/// new boards are attributed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The user's id.
    pub user_id: UserId,
    /// The user's e-mail, shown to collaborators.
    pub email: String,
}

impl Identity {
    /// Creates an identity.
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
        }
    }
}
