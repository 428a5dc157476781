//! Optimistic task store: the cache plus its persistence calls.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use taskboard_proto::feed::{ChangeEvent, RowFilter, Table};
use taskboard_proto::ids::{BoardId, TaskId};
use taskboard_proto::task::{NewTask, Task, TaskPatch, TaskStatus};

use super::TaskError;
use super::cache::{Settled, TaskCache};
use super::pending::MutationTicket;
use crate::backend::{Persistence, Query};
use crate::config::SyncConfig;
use crate::error::{FetchError, MutationError};
use crate::events::{EventSink, SessionEvent};
use crate::mutation::{MutationHandle, with_timeout};

/// Tasks of one board, mutated optimistically.
///
/// Every mutation updates the cache before returning, then spawns the
/// persistence call. The returned [`MutationHandle`] may be awaited or
/// dropped. Failures roll the cache back and surface as
/// [`SessionEvent::MutationFailed`].
pub struct TaskStore<B> {
    backend: Arc<B>,
    board_id: BoardId,
    cache: Arc<Mutex<TaskCache>>,
    events: EventSink,
    timeout: Duration,
}

impl<B: Persistence + 'static> TaskStore<B> {
    /// Creates an empty store for `board_id`.
    pub fn new(backend: Arc<B>, board_id: BoardId, events: EventSink, config: &SyncConfig) -> Self {
        Self {
            backend,
            board_id,
            cache: Arc::new(Mutex::new(TaskCache::new(board_id, config.max_task_title_len))),
            events,
            timeout: config.mutation_timeout,
        }
    }

    /// The board this store holds.
    #[must_use]
    pub const fn board_id(&self) -> BoardId {
        self.board_id
    }

    /// Fetches every task of the board, ordered by position.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the select fails or a row is malformed.
    /// The cache keeps its rows; feed events that arrived meanwhile still
    /// apply.
    pub async fn load(&self) -> Result<Vec<Task>, FetchError> {
        self.cache.lock().begin_load();
        let fetched = self.fetch().await;

        let mut cache = self.cache.lock();
        let tasks = match fetched {
            Ok(tasks) if !cache.is_closed() => tasks,
            Ok(_) => {
                cache.abandon_load();
                return Ok(Vec::new());
            }
            Err(e) => {
                let changed = cache.abandon_load();
                drop(cache);
                if changed {
                    self.events.emit(SessionEvent::TasksChanged);
                }
                return Err(e);
            }
        };
        cache.finish_load(tasks);
        let view = cache.tasks();
        drop(cache);
        self.events.emit(SessionEvent::TasksChanged);
        Ok(view)
    }

    async fn fetch(&self) -> Result<Vec<Task>, FetchError> {
        let query = Query::table(Table::Tasks)
            .eq("board_id", self.board_id)
            .order("position", true);
        let rows = self.backend.select(&query).await?;
        let tasks = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Task>, _>>()?;
        tracing::debug!(board_id = %self.board_id, count = tasks.len(), "tasks loaded");
        Ok(tasks)
    }

    /// Adds a task to the end of its column.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the draft is rejected; nothing is applied
    /// or sent in that case.
    pub fn create(&self, new: NewTask) -> Result<MutationHandle, TaskError> {
        let (task, ticket) = self.cache.lock().begin_create(new)?;
        tracing::info!(task_id = %task.id, status = %task.status, position = task.position, "task created");
        self.events.emit(SessionEvent::TasksChanged);

        let backend = Arc::clone(&self.backend);
        let limit = self.timeout;
        Ok(self.settle_in_background(ticket, async move {
            let row = serde_json::to_value(&task)?;
            let stored = with_timeout(limit, backend.insert(Table::Tasks, row)).await?;
            Ok::<_, MutationError>(Some(serde_json::from_value(stored)?))
        }))
    }

    /// Applies `patch` to a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the task is not cached or the patch is
    /// rejected.
    pub fn update(&self, id: TaskId, patch: TaskPatch) -> Result<MutationHandle, TaskError> {
        let (_, ticket) = self.cache.lock().begin_update(&id, &patch)?;
        tracing::info!(task_id = %id, burst = ticket.burst, "task updated");
        self.events.emit(SessionEvent::TasksChanged);

        let backend = Arc::clone(&self.backend);
        let limit = self.timeout;
        Ok(self.settle_in_background(ticket, async move {
            let body = serde_json::to_value(&patch)?;
            let filters = [RowFilter::eq("id", id)];
            let rows = with_timeout(limit, backend.update(Table::Tasks, &filters, body)).await?;
            let row = rows.into_iter().next().ok_or(MutationError::RowMissing)?;
            Ok::<_, MutationError>(Some(serde_json::from_value(row)?))
        }))
    }

    /// Moves a task to another column.
    ///
    /// # Errors
    ///
    /// See [`update`](Self::update).
    pub fn move_task(&self, id: TaskId, status: TaskStatus) -> Result<MutationHandle, TaskError> {
        self.update(id, TaskPatch::status(status))
    }

    /// Removes a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the task is not cached or a delete of it is
    /// already in flight.
    pub fn delete(&self, id: TaskId) -> Result<MutationHandle, TaskError> {
        let ticket = self.cache.lock().begin_delete(&id)?;
        tracing::info!(task_id = %id, "task deleted");
        self.events.emit(SessionEvent::TasksChanged);

        let backend = Arc::clone(&self.backend);
        let limit = self.timeout;
        Ok(self.settle_in_background(ticket, async move {
            let filters = [RowFilter::eq("id", id)];
            // Zero rows means someone else deleted it first; same outcome.
            with_timeout(limit, backend.delete(Table::Tasks, &filters)).await?;
            Ok::<Option<Task>, MutationError>(None)
        }))
    }

    /// Merges a remote change event.
    pub fn reconcile(&self, event: &ChangeEvent) {
        if self.cache.lock().reconcile(event) {
            tracing::debug!(operation = %event.operation, "remote task change applied");
            self.events.emit(SessionEvent::TasksChanged);
        }
    }

    /// Tasks ordered by position.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.cache.lock().tasks()
    }

    /// Tasks in one column, ordered by position.
    #[must_use]
    pub fn column(&self, status: TaskStatus) -> Vec<Task> {
        self.cache.lock().column(status)
    }

    /// A cached task.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.cache.lock().task(id).cloned()
    }

    /// Returns `true` if `id` has an unsettled local mutation.
    #[must_use]
    pub fn is_pending(&self, id: &TaskId) -> bool {
        self.cache.lock().is_pending(id)
    }

    /// Discards all cached state. In-flight calls still run, but their
    /// settlement no longer touches the cache or emits events.
    pub fn close(&self) {
        self.cache.lock().close();
    }

    fn settle_in_background<F>(&self, ticket: MutationTicket, call: F) -> MutationHandle
    where
        F: std::future::Future<Output = Result<Option<Task>, MutationError>> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        let events = self.events.clone();
        MutationHandle::spawn(async move {
            let result = call.await;
            let settled = cache.lock().settle(&ticket, result.as_ref().cloned());
            match (&settled, &result) {
                (Settled::RolledBack { kind }, Err(e)) => {
                    tracing::warn!(task_id = %ticket.task_id, %kind, error = %e, "task mutation rolled back");
                    events.emit(SessionEvent::TasksChanged);
                    events.emit(SessionEvent::MutationFailed {
                        task_id: ticket.task_id,
                        kind: *kind,
                        reason: e.to_string(),
                    });
                }
                (Settled::Superseded { kind }, Err(e)) => {
                    tracing::warn!(task_id = %ticket.task_id, %kind, error = %e, "task mutation failed under a pending delete");
                    events.emit(SessionEvent::MutationFailed {
                        task_id: ticket.task_id,
                        kind: *kind,
                        reason: e.to_string(),
                    });
                }
                (Settled::Confirmed { changed }, _) => {
                    tracing::debug!(task_id = %ticket.task_id, kind = %ticket.kind, "task mutation confirmed");
                    if *changed {
                        events.emit(SessionEvent::TasksChanged);
                    }
                }
                _ => {}
            }
            result.map(|_| ())
        })
    }
}
