//! Notifications from a board session to its UI layer.

use tokio::sync::mpsc;

use taskboard_proto::ids::{BoardId, CommentId, TaskId};
use taskboard_proto::presence::PresenceEntry;

use crate::tasks::MutationKind;

/// Something the view should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The visible task list changed (local edit, rollback, or remote event).
    TasksChanged,
    /// An optimistic task mutation was rolled back.
    MutationFailed {
        /// The affected task.
        task_id: TaskId,
        /// What was attempted.
        kind: MutationKind,
        /// Backend or timeout description.
        reason: String,
    },
    /// The set of online collaborators changed.
    PresenceChanged(Vec<PresenceEntry>),
    /// The accepted-member list changed.
    MembersChanged,
    /// The comment list of an open thread changed.
    CommentsChanged {
        /// The task whose thread changed.
        task_id: TaskId,
    },
    /// An optimistic comment was removed because it did not persist.
    CommentFailed {
        /// The task whose thread changed.
        task_id: TaskId,
        /// The removed comment.
        comment_id: CommentId,
        /// Backend or timeout description.
        reason: String,
    },
    /// A live channel failed to open; the view works without it.
    LiveUpdatesUnavailable {
        /// The channel that failed.
        channel: String,
        /// Backend description.
        reason: String,
    },
    /// The open board was deleted. Terminal: the session has shut down.
    BoardDeleted {
        /// The deleted board.
        board_id: BoardId,
    },
}

impl SessionEvent {
    /// The user-facing message for failure events, if any.
    #[must_use]
    pub fn notice(&self) -> Option<String> {
        match self {
            Self::MutationFailed { kind, .. } => Some(match kind {
                MutationKind::Create => "Could not create task.".to_string(),
                MutationKind::Update => "Could not update task.".to_string(),
                MutationKind::Delete => "Could not delete task. Check permissions.".to_string(),
            }),
            Self::CommentFailed { .. } => Some("Could not send comment.".to_string()),
            Self::BoardDeleted { .. } => Some("This board has been deleted.".to_string()),
            _ => None,
        }
    }
}

/// Sending half of a session's event stream.
///
/// Emitting never fails; once the receiver is gone events are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    /// Creates a sink and the receiver the UI drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Delivers `event` if anyone is still listening.
    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("session event dropped, receiver closed");
        }
    }
}
