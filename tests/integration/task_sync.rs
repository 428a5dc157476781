//! Integration tests for optimistic task mutations against a shared backend.
//!
//! Covers:
//! 1. Creates, updates, and deletes are visible before the backend answers.
//! 2. Failed calls restore the last state the server confirmed.
//! 3. Remote events for a task with a local change in flight are held off.
//! 4. A remote delete seen during a pending change is not undone by it.
//! 5. Stalled calls time out and roll back.
//! 6. Two sessions on one board converge.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskboard::backend::BackendError;
use taskboard::backend::memory::MemoryBackend;
use taskboard::boards::BoardDirectory;
use taskboard::config::SyncConfig;
use taskboard::error::{FetchError, MutationError};
use taskboard::events::SessionEvent;
use taskboard::identity::Identity;
use taskboard::session::BoardSession;
use taskboard::tasks::{MutationKind, TaskError};
use taskboard_proto::board::Board;
use taskboard_proto::feed::{ChangeEvent, ChangeOperation, Table};
use taskboard_proto::ids::UserId;
use taskboard_proto::task::{NEW_TASK_POSITION, NewTask, Task, TaskPatch, TaskStatus};
use tokio::sync::mpsc::UnboundedReceiver;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn board_on(backend: &Arc<MemoryBackend>) -> (Identity, Board) {
    let owner = Identity::new(UserId::new(), "ada@example.com");
    let directory = BoardDirectory::new(Arc::clone(backend), owner.clone(), Duration::from_secs(1));
    let board = directory.create("Sprint").await.expect("board should be created");
    (owner, board)
}

async fn open(
    backend: &Arc<MemoryBackend>,
    identity: &Identity,
    board: &Board,
    config: &SyncConfig,
) -> (BoardSession<MemoryBackend>, UnboundedReceiver<SessionEvent>) {
    BoardSession::open(Arc::clone(backend), identity.clone(), board.id, config)
        .await
        .expect("session should open")
}

/// Creates a task and waits for the backend to confirm it.
async fn confirmed_task(session: &BoardSession<MemoryBackend>, title: &str) -> Task {
    let new = NewTask::new(title);
    let id = new.id;
    session
        .create_task(new)
        .expect("create should be accepted")
        .settled()
        .await
        .expect("create should persist");
    session.tasks().task(&id).expect("task should be cached")
}

fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn failures(events: &[SessionEvent]) -> Vec<MutationKind> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::MutationFailed { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
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

fn stored_title(backend: &MemoryBackend, task: &Task) -> Option<String> {
    backend
        .rows(Table::Tasks)
        .into_iter()
        .find(|r| r["id"] == task.id.to_string())
        .and_then(|r| r["title"].as_str().map(str::to_string))
}

fn remote(operation: ChangeOperation, task: &Task) -> ChangeEvent {
    let row = serde_json::to_value(task).unwrap();
    match operation {
        ChangeOperation::Delete => ChangeEvent::new(
            operation,
            Table::Tasks,
            None,
            Some(json!({ "id": task.id, "board_id": task.board_id })),
        ),
        _ => ChangeEvent::new(operation, Table::Tasks, Some(row), None),
    }
}

// ---------------------------------------------------------------------------
// Optimistic apply
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_is_visible_before_the_backend_answers() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, _rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;

    backend.hold_writes().await;
    let new = NewTask::new("Draft agenda");
    let id = new.id;
    let handle = session.create_task(new).unwrap();

    let task = session.tasks().task(&id).expect("optimistic task should be visible");
    assert_eq!(task.position, NEW_TASK_POSITION);
    assert!(session.tasks().is_pending(&id));
    assert!(backend.rows(Table::Tasks).is_empty());

    backend.release_writes();
    handle.settled().await.unwrap();
    assert!(!session.tasks().is_pending(&id));
    assert_eq!(stored_title(&backend, &task).as_deref(), Some("Draft agenda"));
}

#[tokio::test]
async fn invalid_title_is_rejected_without_touching_the_backend() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, _rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;

    let err = session.create_task(NewTask::new("   ")).unwrap_err();
    assert_eq!(err, TaskError::TitleEmpty);
    let long = "x".repeat(257);
    let err = session.create_task(NewTask::new(long)).unwrap_err();
    assert_eq!(err, TaskError::TitleTooLong(256));

    assert!(session.tasks().tasks().is_empty());
    assert!(backend.rows(Table::Tasks).is_empty());
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_update_restores_the_previous_record() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, mut rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;
    let original = confirmed_task(&session, "Review PR").await;
    drain(&mut rx);

    backend.fail_next_write(BackendError::new("permission denied"));
    let handle = session
        .update_task(original.id, TaskPatch::status(TaskStatus::Done))
        .unwrap();
    assert_eq!(session.tasks().task(&original.id).unwrap().status, TaskStatus::Done);

    let err = handle.settled().await.unwrap_err();
    assert!(matches!(err, MutationError::Backend(_)));
    assert_eq!(session.tasks().task(&original.id), Some(original));
    assert_eq!(failures(&drain(&mut rx)), vec![MutationKind::Update]);
}

#[tokio::test]
async fn failed_burst_rolls_back_to_the_state_before_its_first_edit() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, mut rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;
    let original = confirmed_task(&session, "A").await;
    drain(&mut rx);

    backend.hold_writes().await;
    backend.fail_next_write(BackendError::new("offline"));
    backend.fail_next_write(BackendError::new("offline"));
    let first = session.update_task(original.id, TaskPatch::title("B")).unwrap();
    let second = session.update_task(original.id, TaskPatch::title("C")).unwrap();
    assert_eq!(session.tasks().task(&original.id).unwrap().title, "C");

    backend.release_writes();
    assert!(first.settled().await.is_err());
    assert!(second.settled().await.is_err());

    assert_eq!(session.tasks().task(&original.id), Some(original));
    assert_eq!(failures(&drain(&mut rx)), vec![MutationKind::Update]);
}

#[tokio::test]
async fn failed_delete_reinserts_the_exact_record() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, mut rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;
    let original = confirmed_task(&session, "Keep me").await;
    drain(&mut rx);

    backend.fail_next_write(BackendError::new("row-level security"));
    let handle = session.delete_task(original.id).unwrap();
    assert!(session.tasks().task(&original.id).is_none());

    handle.settled().await.unwrap_err();
    assert_eq!(session.tasks().task(&original.id), Some(original));

    let notices: Vec<String> = drain(&mut rx).iter().filter_map(SessionEvent::notice).collect();
    assert_eq!(notices, vec!["Could not delete task. Check permissions.".to_string()]);
}

#[tokio::test]
async fn failed_create_removes_the_optimistic_task() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, mut rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;

    backend.fail_next_write(BackendError::new("offline"));
    let new = NewTask::new("Ghost");
    let id = new.id;
    session.create_task(new).unwrap().settled().await.unwrap_err();

    assert!(session.tasks().task(&id).is_none());
    assert_eq!(failures(&drain(&mut rx)), vec![MutationKind::Create]);
}

#[tokio::test]
async fn failed_edit_queued_behind_a_create_keeps_the_created_task() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, mut rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;

    backend.hold_writes().await;
    backend.pass_next_write();
    backend.fail_next_write(BackendError::new("permission denied"));
    let new = NewTask::new("Draft");
    let id = new.id;
    let created = session.create_task(new).unwrap();
    let edited = session.update_task(id, TaskPatch::title("Final")).unwrap();
    assert_eq!(session.tasks().task(&id).unwrap().title, "Final");

    backend.release_writes();
    created.settled().await.unwrap();
    assert!(edited.settled().await.is_err());

    let task = session.tasks().task(&id).expect("persisted task should stay cached");
    assert_eq!(task.title, "Draft");
    assert!(!session.tasks().is_pending(&id));
    assert_eq!(stored_title(&backend, &task).as_deref(), Some("Draft"));
    assert_eq!(failures(&drain(&mut rx)), vec![MutationKind::Update]);
}

#[tokio::test]
async fn failed_delete_after_failed_edit_restores_the_stored_record() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, mut rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;
    let original = confirmed_task(&session, "Stored").await;
    drain(&mut rx);

    backend.hold_writes().await;
    backend.fail_next_write(BackendError::new("offline"));
    backend.fail_next_write(BackendError::new("offline"));
    let edit = session.update_task(original.id, TaskPatch::title("Unsaved")).unwrap();
    let delete = session.delete_task(original.id).unwrap();
    assert!(session.tasks().task(&original.id).is_none());

    backend.release_writes();
    assert!(edit.settled().await.is_err());
    assert!(delete.settled().await.is_err());

    assert_eq!(session.tasks().task(&original.id), Some(original));
    assert_eq!(
        failures(&drain(&mut rx)),
        vec![MutationKind::Update, MutationKind::Delete]
    );
}

#[tokio::test]
async fn second_delete_while_first_is_in_flight_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, _rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;
    let task = confirmed_task(&session, "Once").await;

    backend.hold_writes().await;
    let handle = session.delete_task(task.id).unwrap();
    assert_eq!(
        session.delete_task(task.id).unwrap_err(),
        TaskError::DeleteInFlight(task.id.to_string())
    );
    backend.release_writes();
    handle.settled().await.unwrap();
    assert!(backend.rows(Table::Tasks).is_empty());
}

#[tokio::test]
async fn stalled_call_times_out_and_rolls_back() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let config = SyncConfig {
        mutation_timeout: Duration::from_millis(50),
        ..SyncConfig::default()
    };
    let (session, mut rx) = open(&backend, &owner, &board, &config).await;
    let original = confirmed_task(&session, "Slow").await;
    drain(&mut rx);

    backend.hold_writes().await;
    let handle = session.update_task(original.id, TaskPatch::title("Faster")).unwrap();
    let err = handle.settled().await.unwrap_err();
    assert!(matches!(err, MutationError::TimedOut(_)));
    assert_eq!(session.tasks().task(&original.id), Some(original.clone()));
    assert_eq!(failures(&drain(&mut rx)), vec![MutationKind::Update]);

    backend.release_writes();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(stored_title(&backend, &original).as_deref(), Some("Slow"));
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remote_update_is_ignored_while_a_local_change_is_pending() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, _rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;
    let original = confirmed_task(&session, "Base").await;

    backend.hold_writes().await;
    let handle = session.update_task(original.id, TaskPatch::title("Local")).unwrap();

    let mut theirs = original.clone();
    theirs.title = "Remote".to_string();
    backend.emit(&remote(ChangeOperation::Update, &theirs));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(session.tasks().task(&original.id).unwrap().title, "Local");

    backend.release_writes();
    handle.settled().await.unwrap();
    assert_eq!(session.tasks().task(&original.id).unwrap().title, "Local");
    assert!(!session.tasks().is_pending(&original.id));
}

#[tokio::test]
async fn remote_delete_during_pending_update_is_not_undone() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (session, _rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;
    let original = confirmed_task(&session, "Contested").await;

    backend.hold_writes().await;
    let handle = session.update_task(original.id, TaskPatch::title("Mine")).unwrap();
    backend.emit(&remote(ChangeOperation::Delete, &original));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(session.tasks().task(&original.id).is_some());

    backend.release_writes();
    handle.settled().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(session.tasks().task(&original.id).is_none());

    // Late echoes of the row do not bring it back either.
    backend.emit(&remote(ChangeOperation::Update, &original));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(session.tasks().task(&original.id).is_none());
}

#[tokio::test]
async fn events_for_other_boards_are_ignored() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let (_, other_board) = board_on(&backend).await;
    let (session, _rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;

    let stray = NewTask::new("Elsewhere").into_task(other_board.id, 0);
    backend.emit(&remote(ChangeOperation::Insert, &stray));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(session.tasks().tasks().is_empty());
}

#[tokio::test]
async fn two_sessions_converge() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let peer = Identity::new(UserId::new(), "bob@example.com");
    let (ada, _ada_rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;
    let (bob, _bob_rx) = open(&backend, &peer, &board, &SyncConfig::default()).await;

    let task = confirmed_task(&ada, "Shared").await;
    eventually("peer sees the new task", || bob.tasks().task(&task.id).is_some()).await;

    bob.update_task(task.id, TaskPatch::status(TaskStatus::InProgress))
        .unwrap()
        .settled()
        .await
        .unwrap();
    eventually("owner sees the move", || {
        ada.tasks()
            .task(&task.id)
            .is_some_and(|t| t.status == TaskStatus::InProgress)
    })
    .await;

    bob.delete_task(task.id).unwrap().settled().await.unwrap();
    eventually("owner sees the delete", || ada.tasks().task(&task.id).is_none()).await;
}

#[tokio::test]
async fn update_of_a_row_deleted_elsewhere_drops_the_task() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    let peer = Identity::new(UserId::new(), "bob@example.com");
    let (ada, _ada_rx) = open(&backend, &owner, &board, &SyncConfig::default()).await;
    let task = confirmed_task(&ada, "Racy").await;

    let (bob, _bob_rx) = open(&backend, &peer, &board, &SyncConfig::default()).await;
    eventually("peer sees the task", || bob.tasks().task(&task.id).is_some()).await;

    // Writes apply in issue order: the peer's delete lands first.
    backend.hold_writes().await;
    let delete = bob.delete_task(task.id).unwrap();
    let update = ada.update_task(task.id, TaskPatch::title("Edited")).unwrap();
    backend.release_writes();

    delete.settled().await.unwrap();
    let err = update.settled().await.unwrap_err();
    assert!(matches!(err, MutationError::RowMissing));
    assert!(ada.tasks().task(&task.id).is_none());
    assert!(backend.rows(Table::Tasks).is_empty());
}

#[tokio::test]
async fn malformed_rows_fail_the_load_and_leave_nothing_subscribed() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    backend.seed(
        Table::Tasks,
        json!({ "id": "not-a-uuid", "board_id": board.id, "title": 7 }),
    );

    let result = BoardSession::open(Arc::clone(&backend), owner, board.id, &SyncConfig::default()).await;
    assert!(matches!(result, Err(FetchError::Decode(_))));
    assert_eq!(backend.subscription_count(), 0);
}

#[tokio::test]
async fn failed_board_fetch_is_reported() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, board) = board_on(&backend).await;
    backend.fail_next_read(BackendError::new("connection reset"));

    let result = BoardSession::open(Arc::clone(&backend), owner, board.id, &SyncConfig::default()).await;
    assert!(matches!(result, Err(FetchError::Backend(_))));
    assert_eq!(backend.subscription_count(), 0);
}
