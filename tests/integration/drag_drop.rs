//! Integration tests for dragging cards between columns of an open board.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use taskboard::backend::BackendError;
use taskboard::backend::memory::MemoryBackend;
use taskboard::boards::BoardDirectory;
use taskboard::config::SyncConfig;
use taskboard::dnd::{DropOutcome, PointerPosition, Rect};
use taskboard::events::SessionEvent;
use taskboard::identity::Identity;
use taskboard::session::BoardSession;
use taskboard::tasks::MutationKind;
use taskboard_proto::feed::Table;
use taskboard_proto::ids::UserId;
use taskboard_proto::task::{NewTask, Task, TaskStatus};
use tokio::sync::mpsc::UnboundedReceiver;

const COLUMN_WIDTH: f64 = 300.0;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn open_board(config: &SyncConfig) -> (
    Arc<MemoryBackend>,
    BoardSession<MemoryBackend>,
    UnboundedReceiver<SessionEvent>,
) {
    let backend = Arc::new(MemoryBackend::new());
    let owner = Identity::new(UserId::new(), "ada@example.com");
    let board = BoardDirectory::new(Arc::clone(&backend), owner.clone(), Duration::from_secs(1))
        .create("Kanban")
        .await
        .expect("board should be created");
    let (session, rx) = BoardSession::open(Arc::clone(&backend), owner, board.id, config)
        .await
        .expect("session should open");
    (backend, session, rx)
}

/// Lays the three columns out left to right, `COLUMN_WIDTH` apart.
fn register_columns(session: &BoardSession<MemoryBackend>) {
    for (i, status) in TaskStatus::ALL.into_iter().enumerate() {
        let x = COLUMN_WIDTH * f64::from(u32::try_from(i).unwrap());
        session.register_column(status, Rect::new(x, 0.0, COLUMN_WIDTH - 1.0, 600.0));
    }
}

/// Center of the column for `status`.
fn over(status: TaskStatus) -> (f64, f64) {
    let i = TaskStatus::ALL.iter().position(|s| *s == status).unwrap();
    (COLUMN_WIDTH * f64::from(u32::try_from(i).unwrap()) + COLUMN_WIDTH / 2.0, 100.0)
}

async fn confirmed_task(session: &BoardSession<MemoryBackend>, title: &str) -> Task {
    let new = NewTask::new(title);
    let id = new.id;
    session.create_task(new).unwrap().settled().await.unwrap();
    session.tasks().task(&id).unwrap()
}

fn stored_status(backend: &MemoryBackend, task: &Task) -> Option<String> {
    backend
        .rows(Table::Tasks)
        .into_iter()
        .find(|r| r["id"] == task.id.to_string())
        .and_then(|r| r["status"].as_str().map(str::to_string))
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
// Drops
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dropping_on_another_column_moves_the_task() {
    let (backend, session, _rx) = open_board(&SyncConfig::default()).await;
    register_columns(&session);
    let task = confirmed_task(&session, "Ship it").await;

    assert!(session.start_drag(&task.id));
    assert!(session.is_hidden(&task.id));
    let (x, y) = over(TaskStatus::Done);
    session.move_pointer(x, y);

    let outcome = session.end_drag(x, y);
    assert_eq!(
        outcome,
        DropOutcome::Accepted {
            task_id: task.id,
            from: TaskStatus::Todo,
            to: TaskStatus::Done,
        }
    );
    assert_eq!(session.tasks().task(&task.id).unwrap().status, TaskStatus::Done);
    assert!(!session.is_hidden(&task.id));
    assert!(session.active_drag().is_none());

    eventually("the move persists", || {
        stored_status(&backend, &task).as_deref() == Some("DONE") && !session.tasks().is_pending(&task.id)
    })
    .await;
}

#[tokio::test]
async fn dropping_on_the_same_column_does_nothing() {
    let (backend, session, _rx) = open_board(&SyncConfig::default()).await;
    register_columns(&session);
    let task = confirmed_task(&session, "Stay").await;

    assert!(session.start_drag(&task.id));
    let (x, y) = over(TaskStatus::Todo);
    assert_eq!(session.end_drag(x, y), DropOutcome::SameColumn { task_id: task.id });
    assert!(!session.tasks().is_pending(&task.id));
    assert_eq!(stored_status(&backend, &task).as_deref(), Some("TODO"));
}

#[tokio::test]
async fn releasing_outside_every_column_cancels() {
    let (_backend, session, _rx) = open_board(&SyncConfig::default()).await;
    register_columns(&session);
    let task = confirmed_task(&session, "Snap back").await;

    assert!(session.start_drag(&task.id));
    let outcome = session.end_drag(COLUMN_WIDTH * 3.0 + 50.0, 100.0);
    assert_eq!(outcome, DropOutcome::Cancelled { task_id: task.id });
    assert_eq!(session.tasks().task(&task.id), Some(task));
}

#[tokio::test]
async fn column_edges_count_as_inside() {
    let (_backend, session, _rx) = open_board(&SyncConfig::default()).await;
    register_columns(&session);
    let task = confirmed_task(&session, "Edge").await;

    assert!(session.start_drag(&task.id));
    let right_edge_of_done = COLUMN_WIDTH * 2.0 + COLUMN_WIDTH - 1.0;
    assert!(matches!(
        session.end_drag(right_edge_of_done, 600.0),
        DropOutcome::Accepted { to: TaskStatus::Done, .. }
    ));
}

#[tokio::test]
async fn re_registered_column_uses_only_its_new_bounds() {
    let (_backend, session, _rx) = open_board(&SyncConfig::default()).await;
    session.register_column(TaskStatus::Done, Rect::new(0.0, 0.0, 200.0, 200.0));
    session.register_column(TaskStatus::Done, Rect::new(0.0, 0.0, 50.0, 50.0));
    let task = confirmed_task(&session, "Resize").await;

    assert!(session.start_drag(&task.id));
    assert_eq!(
        session.end_drag(150.0, 150.0),
        DropOutcome::Cancelled { task_id: task.id }
    );

    assert!(session.start_drag(&task.id));
    assert!(matches!(session.end_drag(25.0, 25.0), DropOutcome::Accepted { .. }));
}

#[tokio::test]
async fn unregistered_column_no_longer_accepts() {
    let (_backend, session, _rx) = open_board(&SyncConfig::default()).await;
    register_columns(&session);
    session.unregister_column(TaskStatus::Done);
    let task = confirmed_task(&session, "Nowhere").await;

    assert!(session.start_drag(&task.id));
    let (x, y) = over(TaskStatus::Done);
    assert_eq!(session.end_drag(x, y), DropOutcome::Cancelled { task_id: task.id });
}

#[tokio::test]
async fn failed_move_snaps_the_card_back() {
    let (backend, session, mut rx) = open_board(&SyncConfig::default()).await;
    register_columns(&session);
    let task = confirmed_task(&session, "Blocked").await;

    backend.fail_next_write(BackendError::new("permission denied"));
    assert!(session.start_drag(&task.id));
    let (x, y) = over(TaskStatus::InProgress);
    assert!(matches!(session.end_drag(x, y), DropOutcome::Accepted { .. }));

    eventually("the move rolls back", || {
        session
            .tasks()
            .task(&task.id)
            .is_some_and(|t| t.status == TaskStatus::Todo)
            && !session.tasks().is_pending(&task.id)
    })
    .await;
    let mut failed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::MutationFailed { kind, .. } = event {
            failed.push(kind);
        }
    }
    assert_eq!(failed, vec![MutationKind::Update]);
}

// ---------------------------------------------------------------------------
// Drag state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pointer_stream_follows_the_drag_and_parks_afterwards() {
    let config = SyncConfig {
        offscreen_sentinel: -500.0,
        ..SyncConfig::default()
    };
    let (_backend, session, _rx) = open_board(&config).await;
    let task = confirmed_task(&session, "Follow").await;
    let pointer = session.pointer_stream();
    assert_eq!(*pointer.borrow(), PointerPosition::new(-500.0, -500.0));

    session.move_pointer(10.0, 10.0);
    assert_eq!(*pointer.borrow(), PointerPosition::new(-500.0, -500.0));

    assert!(session.start_drag(&task.id));
    session.move_pointer(42.0, 7.0);
    assert_eq!(*pointer.borrow(), PointerPosition::new(42.0, 7.0));

    let _ = session.end_drag(42.0, 7.0);
    assert_eq!(*pointer.borrow(), PointerPosition::new(-500.0, -500.0));
}

#[tokio::test]
async fn drag_of_a_task_deleted_mid_gesture_is_cancelled() {
    let (_backend, session, _rx) = open_board(&SyncConfig::default()).await;
    register_columns(&session);
    let task = confirmed_task(&session, "Vanishing").await;

    assert!(session.start_drag(&task.id));
    let _ = session.delete_task(task.id).unwrap();
    let (x, y) = over(TaskStatus::Done);
    assert_eq!(session.end_drag(x, y), DropOutcome::NotDragging);
}

#[tokio::test]
async fn same_column_check_uses_the_latest_status() {
    let (_backend, session, _rx) = open_board(&SyncConfig::default()).await;
    register_columns(&session);
    let task = confirmed_task(&session, "Moved meanwhile").await;

    assert!(session.start_drag(&task.id));
    let _ = session.on_drop_task(task.id, TaskStatus::Done).unwrap();
    let (x, y) = over(TaskStatus::Done);
    assert_eq!(session.end_drag(x, y), DropOutcome::SameColumn { task_id: task.id });
}

#[tokio::test]
async fn drop_callback_skips_tasks_already_in_the_column() {
    let (_backend, session, _rx) = open_board(&SyncConfig::default()).await;
    let task = confirmed_task(&session, "Already there").await;

    assert!(session.on_drop_task(task.id, TaskStatus::Todo).unwrap().is_none());
    let handle = session
        .on_drop_task(task.id, TaskStatus::InProgress)
        .unwrap()
        .expect("a move should be issued");
    handle.settled().await.unwrap();
    assert_eq!(session.tasks().task(&task.id).unwrap().status, TaskStatus::InProgress);
}

#[tokio::test]
async fn closing_the_session_drops_zones_and_drag_state() {
    let (_backend, session, _rx) = open_board(&SyncConfig::default()).await;
    register_columns(&session);
    let task = confirmed_task(&session, "Closing").await;
    assert!(session.start_drag(&task.id));

    session.close();
    assert!(session.active_drag().is_none());
    assert_eq!(session.end_drag(10.0, 10.0), DropOutcome::NotDragging);
    assert!(!session.start_drag(&task.id));
    session.register_column(TaskStatus::Todo, Rect::new(0.0, 0.0, 10.0, 10.0));
    assert!(!session.start_drag(&task.id));
}
