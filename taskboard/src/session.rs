//! One open board view: the coordinator that owns every board-scoped
//! resource.
//!
//! [`BoardSession::open`] subscribes to the board's task, membership, and
//! lifecycle channels, joins its presence topic, and then loads the task
//! and member lists. Everything it creates is torn down exactly once, by
//! [`close`](BoardSession::close), by dropping the session, or when the
//! board itself is deleted. Handlers registered with the change feed and
//! the drop zones only hold a weak reference, so a late event after
//! teardown finds nothing to write into.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use taskboard_proto::board::Board;
use taskboard_proto::comment::Comment;
use taskboard_proto::feed::{ChangeEvent, EventFilter, RowFilter, SubscriptionSpec, Table};
use taskboard_proto::ids::{BoardId, TaskId};
use taskboard_proto::member::{Assignee, Member};
use taskboard_proto::presence::PresenceEntry;
use taskboard_proto::task::{NewTask, Task, TaskDraft, TaskPatch, TaskStatus};

use crate::backend::Backend;
use crate::boards::fetch_board;
use crate::comments::{CommentError, CommentThread};
use crate::config::SyncConfig;
use crate::dnd::{DragController, DropOutcome, DropZoneRegistry, PointerPosition, Rect};
use crate::error::{FetchError, SubscriptionError};
use crate::events::{EventSink, SessionEvent};
use crate::feed::{ChangeFeedClient, SubscriptionHandle};
use crate::identity::Identity;
use crate::members::{Collaborators, InviteError};
use crate::mutation::MutationHandle;
use crate::presence::PresenceTracker;
use crate::tasks::{TaskError, TaskFilter, TaskStore};

/// Change-feed channel carrying the board's task rows.
#[must_use]
pub fn tasks_channel(board_id: BoardId) -> String {
    format!("realtime:tasks:{board_id}")
}

/// Change-feed channel carrying the board's membership rows.
#[must_use]
pub fn members_channel(board_id: BoardId) -> String {
    format!("members_realtime:{board_id}")
}

/// Change-feed channel watching for the board's deletion.
#[must_use]
pub fn lifecycle_channel(board_id: BoardId) -> String {
    format!("board_life_check:{board_id}")
}

/// Presence topic of the board.
#[must_use]
pub fn presence_topic(board_id: BoardId) -> String {
    format!("presence:board:{board_id}")
}

struct SessionCore<B: Backend> {
    board: Board,
    identity: Identity,
    config: SyncConfig,
    backend: Arc<B>,
    events: EventSink,
    tasks: TaskStore<B>,
    members: Collaborators<B>,
    filter: Mutex<TaskFilter>,
    subscriptions: Mutex<Vec<SubscriptionHandle<B>>>,
    presence: Mutex<Option<PresenceTracker<B>>>,
    comments: Mutex<Option<CommentThread<B>>>,
    zones: Mutex<DropZoneRegistry>,
    drag: Mutex<DragController>,
    closed: AtomicBool,
}

impl<B: Backend> SessionCore<B> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Opens a change-feed channel whose handler sees the live core.
    /// Failure is reported and the session continues without it.
    async fn subscribe_channel<F>(self: &Arc<Self>, channel: String, spec: SubscriptionSpec, on_event: F)
    where
        F: Fn(&Arc<Self>, ChangeEvent) + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        let result = ChangeFeedClient::new(Arc::clone(&self.backend))
            .subscribe(&channel, spec, move |event| {
                if let Some(core) = weak.upgrade()
                    && !core.is_closed()
                {
                    on_event(&core, event);
                }
            })
            .await;
        match result {
            Ok(handle) => self.subscriptions.lock().push(handle),
            Err(e) => self.live_updates_unavailable(channel, &e),
        }
    }

    fn live_updates_unavailable(&self, channel: String, error: &SubscriptionError) {
        tracing::warn!(board_id = %self.board.id, %channel, error = %error, "live updates unavailable");
        self.events.emit(SessionEvent::LiveUpdatesUnavailable {
            channel,
            reason: error.to_string(),
        });
    }

    fn reload_members(self: &Arc<Self>) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            match core.members.load().await {
                Ok(_) if !core.is_closed() => core.events.emit(SessionEvent::MembersChanged),
                Ok(_) => {}
                Err(e) => tracing::warn!(board_id = %core.board.id, error = %e, "member reload failed"),
            }
        });
    }

    fn board_deleted(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(board_id = %self.board.id, "board deleted, closing session");
        self.teardown();
        self.events.emit(SessionEvent::BoardDeleted {
            board_id: self.board.id,
        });
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.teardown();
        tracing::info!(board_id = %self.board.id, "board session closed");
    }

    fn teardown(&self) {
        self.zones.lock().clear();
        self.drag.lock().reset();
        self.tasks.close();
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        if let Some(presence) = self.presence.lock().take() {
            presence.stop();
        }
        if let Some(mut thread) = self.comments.lock().take() {
            thread.close();
        }
    }
}

/// An open board view.
///
/// Dropping the session closes it.
pub struct BoardSession<B: Backend> {
    core: Arc<SessionCore<B>>,
}

impl<B: Backend> BoardSession<B> {
    /// Opens `board_id` as `identity`.
    ///
    /// Returns the session and the stream of [`SessionEvent`]s for the view.
    /// Channels that fail to open are reported on that stream as
    /// [`SessionEvent::LiveUpdatesUnavailable`]; the session works without
    /// them.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the board, its tasks, or its members
    /// cannot be loaded. Nothing stays subscribed in that case.
    pub async fn open(
        backend: Arc<B>,
        identity: Identity,
        board_id: BoardId,
        config: &SyncConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), FetchError> {
        let (events, rx) = EventSink::channel();
        let board = fetch_board(&*backend, board_id).await?;

        let core = Arc::new(SessionCore {
            tasks: TaskStore::new(Arc::clone(&backend), board_id, events.clone(), config),
            members: Collaborators::new(
                Arc::clone(&backend),
                board_id,
                identity.clone(),
                config.mutation_timeout,
            ),
            board,
            identity,
            config: config.clone(),
            backend,
            events,
            filter: Mutex::new(TaskFilter::default()),
            subscriptions: Mutex::new(Vec::new()),
            presence: Mutex::new(None),
            comments: Mutex::new(None),
            zones: Mutex::new(DropZoneRegistry::new()),
            drag: Mutex::new(DragController::new(config.offscreen_sentinel)),
            closed: AtomicBool::new(false),
        });
        let session = Self { core };
        let core = &session.core;

        core.subscribe_channel(
            tasks_channel(board_id),
            SubscriptionSpec::table(Table::Tasks).filter(RowFilter::eq("board_id", board_id)),
            |core, event| core.tasks.reconcile(&event),
        )
        .await;
        core.subscribe_channel(
            members_channel(board_id),
            SubscriptionSpec::table(Table::BoardMembers).filter(RowFilter::eq("board_id", board_id)),
            |core, _| core.reload_members(),
        )
        .await;
        core.subscribe_channel(
            lifecycle_channel(board_id),
            SubscriptionSpec::table(Table::Boards)
                .event(EventFilter::Delete)
                .filter(RowFilter::eq("id", board_id)),
            |core, _| core.board_deleted(),
        )
        .await;

        let topic = presence_topic(board_id);
        match PresenceTracker::start(
            Arc::clone(&core.backend),
            &topic,
            &core.identity,
            core.events.clone(),
        )
        .await
        {
            Ok(tracker) => *core.presence.lock() = Some(tracker),
            Err(e) => core.live_updates_unavailable(topic, &e),
        }

        core.tasks.load().await?;
        core.members.load().await?;
        tracing::info!(%board_id, title = %core.board.title, "board session opened");
        Ok((session, rx))
    }

    /// The board.
    #[must_use]
    pub fn board(&self) -> &Board {
        &self.core.board
    }

    /// The board's id.
    #[must_use]
    pub fn board_id(&self) -> BoardId {
        self.core.board.id
    }

    /// The signed-in user.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.core.identity
    }

    /// Returns `true` once the session has shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// The task store.
    #[must_use]
    pub fn tasks(&self) -> &TaskStore<B> {
        &self.core.tasks
    }

    /// Sets the search and priority filter used by [`columns`](Self::columns).
    pub fn set_filter(&self, filter: TaskFilter) {
        *self.core.filter.lock() = filter;
    }

    /// Filtered tasks, one column per status, ordered by position.
    #[must_use]
    pub fn columns(&self) -> Vec<(TaskStatus, Vec<Task>)> {
        let tasks = self.core.tasks.tasks();
        self.core.filter.lock().columns(&tasks)
    }

    /// Creates a task.
    ///
    /// # Errors
    ///
    /// See [`TaskStore::create`].
    pub fn create_task(&self, new: NewTask) -> Result<MutationHandle, TaskError> {
        self.core.tasks.create(new)
    }

    /// Updates a task.
    ///
    /// # Errors
    ///
    /// See [`TaskStore::update`].
    pub fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<MutationHandle, TaskError> {
        self.core.tasks.update(id, patch)
    }

    /// Deletes a task.
    ///
    /// # Errors
    ///
    /// See [`TaskStore::delete`].
    pub fn delete_task(&self, id: TaskId) -> Result<MutationHandle, TaskError> {
        self.core.tasks.delete(id)
    }

    // -- Presence --

    /// Collaborators online on the board.
    #[must_use]
    pub fn active_users(&self) -> Vec<PresenceEntry> {
        self.core
            .presence
            .lock()
            .as_ref()
            .map(PresenceTracker::active_users)
            .unwrap_or_default()
    }

    /// Collaborators who have `task_id` open.
    #[must_use]
    pub fn editors_of(&self, task_id: &TaskId) -> Vec<PresenceEntry> {
        self.core
            .presence
            .lock()
            .as_ref()
            .map(|p| p.editors_of(task_id))
            .unwrap_or_default()
    }

    fn set_editing(&self, task_id: Option<TaskId>) {
        if let Some(presence) = self.core.presence.lock().as_ref() {
            presence.set_editing_task_id(task_id);
        }
    }

    // -- Members --

    /// Accepted members as of the last load.
    #[must_use]
    pub fn members(&self) -> Vec<Member> {
        self.core.members.members()
    }

    /// The board owner and accepted members.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the owner's profile cannot be fetched.
    pub async fn assignees(&self) -> Result<Vec<Assignee>, FetchError> {
        self.core.members.assignees(self.core.board.owner_id).await
    }

    /// Invites a user by e-mail.
    ///
    /// # Errors
    ///
    /// See [`Collaborators::invite`].
    pub async fn invite(&self, email: &str) -> Result<(), InviteError> {
        self.core.members.invite(email).await
    }

    // -- Drag and drop --

    /// Registers the drop zone of a column. Dropping a card from another
    /// column there moves the card into `status`.
    pub fn register_column(&self, status: TaskStatus, rect: Rect) {
        if self.is_closed() {
            return;
        }
        let weak = Arc::downgrade(&self.core);
        self.core.zones.lock().register(status, rect, move |task: &Task| {
            let Some(core) = weak.upgrade() else {
                return;
            };
            if let Err(e) = core.tasks.move_task(task.id, status) {
                tracing::warn!(task_id = %task.id, error = %e, "drop rejected");
            }
        });
    }

    /// Removes a column's drop zone.
    pub fn unregister_column(&self, status: TaskStatus) {
        self.core.zones.lock().unregister(status);
    }

    /// Starts dragging a task. Returns `false` if it is not on the board.
    pub fn start_drag(&self, task_id: &TaskId) -> bool {
        if self.is_closed() {
            return false;
        }
        let Some(task) = self.core.tasks.task(task_id) else {
            return false;
        };
        self.core.drag.lock().start_drag(task);
        true
    }

    /// Reports a pointer move during a drag.
    pub fn move_pointer(&self, x: f64, y: f64) {
        self.core.drag.lock().move_pointer(x, y);
    }

    /// Pointer positions for the drag overlay.
    #[must_use]
    pub fn pointer_stream(&self) -> watch::Receiver<PointerPosition> {
        self.core.drag.lock().pointer_stream()
    }

    /// The dragged task, if any.
    #[must_use]
    pub fn active_drag(&self) -> Option<Task> {
        self.core.drag.lock().active_item().cloned()
    }

    /// Returns `true` if the card for `task_id` is hidden behind the drag
    /// overlay.
    #[must_use]
    pub fn is_hidden(&self, task_id: &TaskId) -> bool {
        self.core.drag.lock().is_hidden(task_id)
    }

    /// Releases the drag at `(x, y)`.
    ///
    /// The same-column check uses the task's current status in the store.
    pub fn end_drag(&self, x: f64, y: f64) -> DropOutcome {
        let zones = self.core.zones.lock().clone();
        let mut drag = self.core.drag.lock();
        if let Some(id) = drag.active_item().map(|t| t.id) {
            drag.sync_active(self.core.tasks.task(&id));
        }
        drag.end_drag(x, y, &zones)
    }

    // -- UI callbacks --

    /// A card was opened: publishes that this user is editing it.
    #[must_use]
    pub fn on_task_press(&self, task_id: TaskId) -> Option<Task> {
        let task = self.core.tasks.task(&task_id)?;
        self.set_editing(Some(task_id));
        Some(task)
    }

    /// The open card was closed.
    pub fn on_task_dismiss(&self) {
        self.set_editing(None);
    }

    /// The edit form was saved: updates `existing`, or creates a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the draft is rejected.
    pub fn on_save(&self, existing: Option<TaskId>, draft: TaskDraft) -> Result<MutationHandle, TaskError> {
        let handle = match existing {
            Some(id) => self.core.tasks.update(id, draft.into_patch())?,
            None => self.core.tasks.create(draft.into_new_task())?,
        };
        self.set_editing(None);
        Ok(handle)
    }

    /// The delete button of an open card was pressed.
    ///
    /// # Errors
    ///
    /// See [`TaskStore::delete`].
    pub fn on_delete(&self, task_id: TaskId) -> Result<MutationHandle, TaskError> {
        let handle = self.core.tasks.delete(task_id)?;
        self.set_editing(None);
        Ok(handle)
    }

    /// A card was dropped on a column. Returns `None` when it already
    /// belongs there.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TaskNotFound`] if the task is not on the board.
    pub fn on_drop_task(&self, task_id: TaskId, status: TaskStatus) -> Result<Option<MutationHandle>, TaskError> {
        let task = self
            .core
            .tasks
            .task(&task_id)
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
        if task.status == status {
            return Ok(None);
        }
        self.core.tasks.move_task(task_id, status).map(Some)
    }

    // -- Comments --

    /// Opens the comment thread of a task, closing any other open thread.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the thread cannot be loaded.
    pub async fn open_comments(&self, task_id: TaskId) -> Result<(), FetchError> {
        self.close_comments();
        let thread = CommentThread::open(
            Arc::clone(&self.core.backend),
            self.core.identity.clone(),
            task_id,
            self.core.events.clone(),
            self.core.config.mutation_timeout,
        )
        .await?;
        if self.is_closed() {
            return Ok(());
        }
        *self.core.comments.lock() = Some(thread);
        Ok(())
    }

    /// Comments of the open thread, oldest first.
    #[must_use]
    pub fn comments(&self) -> Vec<Comment> {
        self.core
            .comments
            .lock()
            .as_ref()
            .map(CommentThread::comments)
            .unwrap_or_default()
    }

    /// Posts to the open thread.
    ///
    /// # Errors
    ///
    /// Returns [`CommentError::Closed`] if no thread is open.
    pub fn send_comment(&self, content: &str) -> Result<MutationHandle, CommentError> {
        self.core
            .comments
            .lock()
            .as_ref()
            .ok_or(CommentError::Closed)?
            .send(content)
    }

    /// Closes the open comment thread, if any.
    pub fn close_comments(&self) {
        if let Some(mut thread) = self.core.comments.lock().take() {
            thread.close();
        }
    }

    /// Shuts the session down: drop zones, drag state, subscriptions,
    /// presence, and cached tasks are released synchronously. In-flight
    /// mutations keep running but settle into nothing. Idempotent.
    pub fn close(&self) {
        self.core.close();
    }
}

impl<B: Backend> Drop for BoardSession<B> {
    fn drop(&mut self) {
        self.close();
    }
}
