//! Integration tests for inviting collaborators, answering invitations,
//! assignee lists, and task comment threads.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use taskboard::backend::memory::MemoryBackend;
use taskboard::backend::{BackendError, Persistence};
use taskboard::boards::BoardDirectory;
use taskboard::comments::CommentError;
use taskboard::config::SyncConfig;
use taskboard::error::MutationError;
use taskboard::events::SessionEvent;
use taskboard::identity::Identity;
use taskboard::members::{INVITE_MESSAGE, InviteError, InviteInbox};
use taskboard::session::BoardSession;
use taskboard_proto::board::Board;
use taskboard_proto::feed::{RowFilter, Table};
use taskboard_proto::ids::UserId;
use taskboard_proto::member::{MemberStatus, Membership, Profile};
use taskboard_proto::task::{NewTask, Task};
use tokio::sync::mpsc::UnboundedReceiver;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TIMEOUT: Duration = Duration::from_secs(1);

struct Team {
    backend: Arc<MemoryBackend>,
    ada: Identity,
    bob: Identity,
    board: Board,
}

async fn team() -> Team {
    let backend = Arc::new(MemoryBackend::new());
    let ada = Identity::new(UserId::new(), "ada@example.com");
    let bob = Identity::new(UserId::new(), "bob@example.com");
    seed_profile(&backend, &ada, Some("Ada Lovelace"));
    seed_profile(&backend, &bob, None);
    let board = BoardDirectory::new(Arc::clone(&backend), ada.clone(), TIMEOUT)
        .create("Research")
        .await
        .expect("board should be created");
    Team {
        backend,
        ada,
        bob,
        board,
    }
}

fn seed_profile(backend: &MemoryBackend, identity: &Identity, name: Option<&str>) {
    let profile = Profile {
        id: identity.user_id,
        email: identity.email.clone(),
        full_name: name.map(str::to_string),
    };
    backend.seed(Table::Profiles, serde_json::to_value(&profile).unwrap());
}

impl Team {
    async fn open(&self, identity: &Identity) -> (BoardSession<MemoryBackend>, UnboundedReceiver<SessionEvent>) {
        BoardSession::open(
            Arc::clone(&self.backend),
            identity.clone(),
            self.board.id,
            &SyncConfig::default(),
        )
        .await
        .expect("session should open")
    }

    fn inbox(&self, identity: &Identity) -> InviteInbox<MemoryBackend> {
        InviteInbox::new(Arc::clone(&self.backend), identity.clone(), TIMEOUT)
    }

    fn membership_status(&self, user: &Identity) -> Option<String> {
        self.backend
            .rows(Table::BoardMembers)
            .into_iter()
            .find(|r| r["user_id"] == user.user_id.to_string())
            .and_then(|r| r["status"].as_str().map(str::to_string))
    }
}

async fn confirmed_task(session: &BoardSession<MemoryBackend>, title: &str) -> Task {
    let new = NewTask::new(title);
    let id = new.id;
    session.create_task(new).unwrap().settled().await.unwrap();
    session.tasks().task(&id).unwrap()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// Invitations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accepted_invite_adds_the_member_to_open_sessions() {
    let team = team().await;
    let (ada_view, mut ada_rx) = team.open(&team.ada).await;

    ada_view.invite("  bob@example.com ").await.unwrap();
    assert_eq!(team.membership_status(&team.bob).as_deref(), Some("pending"));
    assert!(ada_view.members().is_empty());

    let inbox = team.inbox(&team.bob);
    let pending = inbox.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].content, INVITE_MESSAGE);
    assert_eq!(pending[0].meta_data.board_id, team.board.id);
    assert_eq!(pending[0].meta_data.inviter.as_deref(), Some("ada@example.com"));

    inbox.accept(&pending[0]).await.unwrap();
    assert_eq!(team.membership_status(&team.bob).as_deref(), Some("accepted"));
    assert!(inbox.pending().await.unwrap().is_empty());

    eventually("ada sees bob as a member", || {
        ada_view.members().iter().any(|m| m.user_id == team.bob.user_id)
    })
    .await;
    let member = ada_view
        .members()
        .into_iter()
        .find(|m| m.user_id == team.bob.user_id)
        .unwrap();
    assert_eq!(member.name, "bob");
    assert_eq!(member.status, MemberStatus::Accepted);

    let mut changed = false;
    while let Ok(event) = ada_rx.try_recv() {
        changed |= event == SessionEvent::MembersChanged;
    }
    assert!(changed);
}

#[tokio::test]
async fn inviting_twice_is_a_conflict() {
    let team = team().await;
    let (ada_view, _rx) = team.open(&team.ada).await;

    ada_view.invite("bob@example.com").await.unwrap();
    let err = ada_view.invite("bob@example.com").await.unwrap_err();
    assert!(matches!(err, InviteError::AlreadyInvited(ref email) if email == "bob@example.com"));
    assert_eq!(err.to_string(), "User already invited");
    assert_eq!(team.backend.rows(Table::Notifications).len(), 1);
}

#[tokio::test]
async fn inviting_an_unknown_email_fails() {
    let team = team().await;
    let (ada_view, _rx) = team.open(&team.ada).await;

    let err = ada_view.invite("nobody@example.com").await.unwrap_err();
    assert!(matches!(err, InviteError::UserNotFound(_)));
    assert_eq!(err.to_string(), "User not found");
    assert!(team.backend.rows(Table::BoardMembers).is_empty());
    assert!(team.backend.rows(Table::Notifications).is_empty());
}

#[tokio::test]
async fn rejecting_removes_the_pending_membership() {
    let team = team().await;
    let (ada_view, _rx) = team.open(&team.ada).await;
    ada_view.invite("bob@example.com").await.unwrap();

    let inbox = team.inbox(&team.bob);
    let invite = inbox.pending().await.unwrap().remove(0);
    inbox.reject(&invite).await.unwrap();

    assert!(team.membership_status(&team.bob).is_none());
    assert!(inbox.pending().await.unwrap().is_empty());
    let notification = &team.backend.rows(Table::Notifications)[0];
    assert_eq!(notification["is_read"], true);

    // The invite can be sent again after a rejection.
    ada_view.invite("bob@example.com").await.unwrap();
}

#[tokio::test]
async fn accepting_a_withdrawn_invite_reports_it() {
    let team = team().await;
    let (ada_view, _rx) = team.open(&team.ada).await;
    ada_view.invite("bob@example.com").await.unwrap();

    let inbox = team.inbox(&team.bob);
    let invite = inbox.pending().await.unwrap().remove(0);
    team.backend
        .delete(
            Table::BoardMembers,
            &[RowFilter::eq("user_id", team.bob.user_id)],
        )
        .await
        .unwrap();

    let err = inbox.accept(&invite).await.unwrap_err();
    assert!(matches!(err, MutationError::RowMissing));
    assert!(inbox.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_notification_lookup_is_reported() {
    let team = team().await;
    team.backend.fail_next_read(BackendError::new("timeout"));
    assert!(team.inbox(&team.bob).pending().await.is_err());
}

// ---------------------------------------------------------------------------
// Assignees
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assignees_list_the_owner_first_without_duplicates() {
    let team = team().await;
    for user in [&team.ada, &team.bob] {
        let membership = Membership {
            board_id: team.board.id,
            user_id: user.user_id,
            status: MemberStatus::Accepted,
        };
        team.backend
            .seed(Table::BoardMembers, serde_json::to_value(&membership).unwrap());
    }
    let (bob_view, _rx) = team.open(&team.bob).await;

    let assignees = bob_view.assignees().await.unwrap();
    let summary: Vec<(String, String)> = assignees
        .into_iter()
        .map(|a| (a.name, a.initials))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Ada Lovelace".to_string(), "AD".to_string()),
            ("bob".to_string(), "BO".to_string()),
        ]
    );
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn comments_reach_other_open_threads() {
    let team = team().await;
    let (ada_view, _ada_rx) = team.open(&team.ada).await;
    let (bob_view, _bob_rx) = team.open(&team.bob).await;
    let task = confirmed_task(&ada_view, "Literature review").await;

    ada_view.open_comments(task.id).await.unwrap();
    bob_view.open_comments(task.id).await.unwrap();

    ada_view
        .send_comment("Found two more papers")
        .unwrap()
        .settled()
        .await
        .unwrap();
    assert_eq!(ada_view.comments().len(), 1);
    eventually("bob sees the comment", || bob_view.comments().len() == 1).await;
    assert_eq!(bob_view.comments()[0].content, "Found two more papers");
    assert_eq!(bob_view.comments()[0].user_id, team.ada.user_id);

    // A thread opened later loads the history.
    bob_view.close_comments();
    assert!(bob_view.comments().is_empty());
    bob_view.open_comments(task.id).await.unwrap();
    assert_eq!(bob_view.comments().len(), 1);
}

#[tokio::test]
async fn failed_comment_is_removed_and_reported() {
    let team = team().await;
    let (ada_view, mut rx) = team.open(&team.ada).await;
    let task = confirmed_task(&ada_view, "Budget").await;
    ada_view.open_comments(task.id).await.unwrap();

    team.backend.fail_next_write(BackendError::new("offline"));
    let handle = ada_view.send_comment("Numbers attached").unwrap();
    assert_eq!(ada_view.comments().len(), 1);
    assert!(handle.settled().await.is_err());
    assert!(ada_view.comments().is_empty());

    let mut failed = false;
    while let Ok(event) = rx.try_recv() {
        failed |= matches!(event, SessionEvent::CommentFailed { task_id, .. } if task_id == task.id);
    }
    assert!(failed);
}

#[tokio::test]
async fn blank_or_threadless_comments_are_rejected() {
    let team = team().await;
    let (ada_view, _rx) = team.open(&team.ada).await;
    let task = confirmed_task(&ada_view, "Quiet").await;

    assert_eq!(ada_view.send_comment("hi").unwrap_err(), CommentError::Closed);
    ada_view.open_comments(task.id).await.unwrap();
    assert_eq!(ada_view.send_comment("   ").unwrap_err(), CommentError::Empty);
    assert!(team.backend.rows(Table::Comments).is_empty());
}
