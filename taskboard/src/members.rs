//! Board collaborators and the invitation flow.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use taskboard_proto::feed::{RowFilter, Table};
use taskboard_proto::ids::{BoardId, NotificationId, UserId};
use taskboard_proto::member::{Assignee, Member, MemberStatus, Membership, Profile};
use taskboard_proto::notification::{InviteMeta, Notification, NotificationKind};

use crate::backend::{Persistence, Query};
use crate::error::{FetchError, MutationError};
use crate::identity::Identity;
use crate::mutation::with_timeout;

/// Text of the notification an invitee receives.
pub const INVITE_MESSAGE: &str = "You have been invited to collaborate on a board.";

/// Why an invitation was not sent.
#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    /// No profile has that e-mail.
    #[error("User not found")]
    UserNotFound(String),
    /// The user already has a membership row for this board.
    #[error("User already invited")]
    AlreadyInvited(String),
    /// Looking the profile up failed.
    #[error("lookup failed: {0}")]
    Lookup(#[from] FetchError),
    /// Writing the membership or notification failed.
    #[error("invite failed: {0}")]
    Write(#[from] MutationError),
}

async fn select_rows<B: Persistence, T: serde::de::DeserializeOwned>(
    backend: &B,
    query: &Query,
) -> Result<Vec<T>, FetchError> {
    let rows = backend.select(query).await?;
    Ok(rows
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()?)
}

/// Fetches one profile by id.
async fn profile_of<B: Persistence>(backend: &B, user_id: UserId) -> Result<Option<Profile>, FetchError> {
    let query = Query::table(Table::Profiles).eq("id", user_id);
    Ok(select_rows(backend, &query).await?.into_iter().next())
}

/// Accepted members of one board.
pub struct Collaborators<B> {
    backend: Arc<B>,
    board_id: BoardId,
    identity: Identity,
    members: Mutex<Vec<Member>>,
    timeout: Duration,
}

impl<B: Persistence + 'static> Collaborators<B> {
    /// Creates an empty list for `board_id`.
    pub fn new(backend: Arc<B>, board_id: BoardId, identity: Identity, timeout: Duration) -> Self {
        Self {
            backend,
            board_id,
            identity,
            members: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// Fetches the accepted members with their profiles.
    ///
    /// A member without a profile row is listed with an empty e-mail.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if a select fails.
    pub async fn load(&self) -> Result<Vec<Member>, FetchError> {
        let query = Query::table(Table::BoardMembers)
            .eq("board_id", self.board_id)
            .eq("status", MemberStatus::Accepted);
        let memberships: Vec<Membership> = select_rows(&*self.backend, &query).await?;

        let mut members = Vec::with_capacity(memberships.len());
        for membership in &memberships {
            let profile = profile_of(&*self.backend, membership.user_id)
                .await?
                .unwrap_or_else(|| Profile {
                    id: membership.user_id,
                    email: String::new(),
                    full_name: None,
                });
            members.push(Member::from_parts(membership, &profile));
        }
        tracing::debug!(board_id = %self.board_id, count = members.len(), "members loaded");
        self.members.lock().clone_from(&members);
        Ok(members)
    }

    /// Members as of the last load.
    #[must_use]
    pub fn members(&self) -> Vec<Member> {
        self.members.lock().clone()
    }

    /// Who a task can be assigned to: the owner first, then accepted
    /// members, each user once.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the owner's profile cannot be fetched.
    pub async fn assignees(&self, owner_id: UserId) -> Result<Vec<Assignee>, FetchError> {
        let mut assignees: Vec<Assignee> = Vec::new();
        if let Some(owner) = profile_of(&*self.backend, owner_id).await? {
            assignees.push(Assignee::from(&owner));
        }
        for member in self.members() {
            if assignees.iter().any(|a| a.user_id == member.user_id) {
                continue;
            }
            let profile = Profile {
                id: member.user_id,
                email: member.email,
                full_name: Some(member.name),
            };
            assignees.push(Assignee::from(&profile));
        }
        Ok(assignees)
    }

    /// Invites the user with `email` to the board.
    ///
    /// Creates a pending membership, then notifies the invitee.
    ///
    /// # Errors
    ///
    /// Returns [`InviteError::UserNotFound`] for an unknown e-mail and
    /// [`InviteError::AlreadyInvited`] if a membership already exists.
    pub async fn invite(&self, email: &str) -> Result<(), InviteError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(InviteError::UserNotFound(String::new()));
        }
        let query = Query::table(Table::Profiles).eq("email", email);
        let Some(profile) = select_rows::<_, Profile>(&*self.backend, &query)
            .await?
            .into_iter()
            .next()
        else {
            return Err(InviteError::UserNotFound(email.to_string()));
        };

        let membership = Membership {
            board_id: self.board_id,
            user_id: profile.id,
            status: MemberStatus::Pending,
        };
        let row = serde_json::to_value(&membership).map_err(MutationError::from)?;
        match with_timeout(self.timeout, self.backend.insert(Table::BoardMembers, row)).await {
            Ok(_) => {}
            Err(MutationError::Backend(e)) if e.is_unique_violation() => {
                return Err(InviteError::AlreadyInvited(email.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let notification = Notification {
            id: NotificationId::new(),
            user_id: profile.id,
            kind: NotificationKind::Invite,
            content: INVITE_MESSAGE.to_string(),
            meta_data: InviteMeta {
                board_id: self.board_id,
                inviter: Some(self.identity.email.clone()),
            },
            is_read: false,
        };
        let row = serde_json::to_value(&notification).map_err(MutationError::from)?;
        with_timeout(self.timeout, self.backend.insert(Table::Notifications, row)).await?;
        tracing::info!(board_id = %self.board_id, invitee = %profile.id, "invite sent");
        Ok(())
    }
}

/// Unread invitations addressed to the signed-in user.
pub struct InviteInbox<B> {
    backend: Arc<B>,
    identity: Identity,
    timeout: Duration,
}

impl<B: Persistence + 'static> InviteInbox<B> {
    /// Creates an inbox for `identity`.
    pub const fn new(backend: Arc<B>, identity: Identity, timeout: Duration) -> Self {
        Self {
            backend,
            identity,
            timeout,
        }
    }

    /// Unread invitations.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the select fails.
    pub async fn pending(&self) -> Result<Vec<Notification>, FetchError> {
        let query = Query::table(Table::Notifications)
            .eq("user_id", self.identity.user_id)
            .eq("is_read", false);
        let notifications: Vec<Notification> = select_rows(&*self.backend, &query).await?;
        Ok(notifications
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Invite)
            .collect())
    }

    fn membership_filters(&self, invite: &Notification) -> [RowFilter; 2] {
        [
            RowFilter::eq("board_id", invite.meta_data.board_id),
            RowFilter::eq("user_id", self.identity.user_id),
        ]
    }

    async fn mark_read(&self, invite: &Notification) -> Result<(), MutationError> {
        let filters = [RowFilter::eq("id", invite.id)];
        with_timeout(
            self.timeout,
            self.backend
                .update(Table::Notifications, &filters, json!({ "is_read": true })),
        )
        .await?;
        Ok(())
    }

    /// Joins the board. The notification is marked read either way.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::RowMissing`] if the invitation was withdrawn,
    /// or the backend failure.
    pub async fn accept(&self, invite: &Notification) -> Result<(), MutationError> {
        let filters = self.membership_filters(invite);
        let joined = with_timeout(
            self.timeout,
            self.backend.update(
                Table::BoardMembers,
                &filters,
                json!({ "status": MemberStatus::Accepted }),
            ),
        )
        .await;
        self.mark_read(invite).await?;
        if joined?.is_empty() {
            return Err(MutationError::RowMissing);
        }
        tracing::info!(board_id = %invite.meta_data.board_id, "invite accepted");
        Ok(())
    }

    /// Declines the invitation and removes the pending membership.
    ///
    /// # Errors
    ///
    /// Returns the backend failure.
    pub async fn reject(&self, invite: &Notification) -> Result<(), MutationError> {
        self.mark_read(invite).await?;
        let filters = self.membership_filters(invite);
        with_timeout(self.timeout, self.backend.delete(Table::BoardMembers, &filters)).await?;
        tracing::info!(board_id = %invite.meta_data.board_id, "invite rejected");
        Ok(())
    }
}
