//! The board's task list plus its pending-mutation gate.
//!
//! [`TaskCache`] is plain synchronous state. [`TaskStore`] wraps it in a
//! lock and drives the persistence calls.
//!
//! [`TaskStore`]: super::TaskStore

use std::collections::HashSet;

use taskboard_proto::feed::{ChangeEvent, ChangeOperation, Table};
use taskboard_proto::ids::{BoardId, TaskId};
use taskboard_proto::task::{NewTask, Task, TaskPatch, TaskStatus, append_position};

use super::TaskError;
use super::pending::{MutationKind, MutationTicket, PendingTable, Settlement};
use crate::error::MutationError;

/// What settling a call did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Superseded, already failed, or the cache was closed.
    Ignored,
    /// Other calls from the same burst are still in flight.
    Pending,
    /// The burst succeeded. `changed` is set if the confirmed row differed
    /// from the optimistic one.
    Confirmed {
        /// Whether the visible list changed.
        changed: bool,
    },
    /// The burst failed and the cache was restored.
    RolledBack {
        /// What the failed call did.
        kind: MutationKind,
    },
    /// A call failed after a delete replaced its burst. The delete owns
    /// the rollback; the failure still has to be reported.
    Superseded {
        /// What the failed call did.
        kind: MutationKind,
    },
}

/// Cached tasks of one board.
#[derive(Debug)]
pub struct TaskCache {
    board_id: BoardId,
    /// Fetch order; views sort stably by position.
    tasks: Vec<Task>,
    pending: PendingTable,
    /// Ids the server has deleted. Deletion is terminal.
    tombstones: HashSet<TaskId>,
    max_title_len: usize,
    closed: bool,
    /// Feed events held back while a snapshot is in flight.
    loading: Option<Vec<ChangeEvent>>,
}

impl TaskCache {
    /// Creates an empty cache for `board_id`.
    #[must_use]
    pub fn new(board_id: BoardId, max_title_len: usize) -> Self {
        Self {
            board_id,
            tasks: Vec::new(),
            pending: PendingTable::new(),
            tombstones: HashSet::new(),
            max_title_len,
            closed: false,
            loading: None,
        }
    }

    /// The board this cache holds.
    #[must_use]
    pub const fn board_id(&self) -> BoardId {
        self.board_id
    }

    /// Tasks ordered by position; equal positions keep fetch order.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks = self.tasks.clone();
        tasks.sort_by_key(|t| t.position);
        tasks
    }

    /// Tasks in `status`, ordered by position.
    #[must_use]
    pub fn column(&self, status: TaskStatus) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.position);
        tasks
    }

    /// The cached task with `id`.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == *id)
    }

    /// Number of cached tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if no task is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns `true` if `id` has an unsettled local mutation.
    #[must_use]
    pub fn is_pending(&self, id: &TaskId) -> bool {
        self.pending.contains(id)
    }

    /// The pending-mutation table.
    #[must_use]
    pub const fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Returns `true` once [`close`](Self::close) has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn index_of(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == *id)
    }

    fn check_open(&self) -> Result<(), TaskError> {
        if self.closed {
            Err(TaskError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn check_title(&self, title: &str) -> Result<(), TaskError> {
        if title.trim().is_empty() {
            return Err(TaskError::TitleEmpty);
        }
        if title.chars().count() > self.max_title_len {
            return Err(TaskError::TitleTooLong(self.max_title_len));
        }
        Ok(())
    }

    /// Replaces the list with freshly fetched rows.
    ///
    /// Tasks with pending mutations keep their local state; tombstoned ids
    /// are dropped.
    pub fn replace_all(&mut self, fetched: Vec<Task>) {
        let mut next: Vec<Task> = fetched
            .into_iter()
            .filter(|t| t.board_id == self.board_id)
            .filter(|t| !self.tombstones.contains(&t.id) && !self.pending.contains(&t.id))
            .collect();
        next.extend(
            self.tasks
                .iter()
                .filter(|t| self.pending.contains(&t.id))
                .cloned(),
        );
        self.tasks = next;
    }

    /// Holds back change events until the snapshot being fetched is applied
    /// with [`finish_load`](Self::finish_load). Events that land while the
    /// select is in flight can be newer than the rows it returns.
    pub fn begin_load(&mut self) {
        self.loading = Some(Vec::new());
    }

    /// Replaces the list with `fetched`, then applies the events held back
    /// since [`begin_load`](Self::begin_load) in arrival order.
    pub fn finish_load(&mut self, fetched: Vec<Task>) {
        let held = self.loading.take().unwrap_or_default();
        self.replace_all(fetched);
        for event in &held {
            self.reconcile(event);
        }
    }

    /// Stops holding events back and applies them to the current list.
    /// Returns `true` if any of them changed it.
    pub fn abandon_load(&mut self) -> bool {
        let held = self.loading.take().unwrap_or_default();
        held.iter().fold(false, |changed, event| self.reconcile(event) || changed)
    }

    /// Optimistically inserts a new task at the end of its column.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the title is invalid, the id is already
    /// known, or the cache is closed.
    pub fn begin_create(&mut self, new: NewTask) -> Result<(Task, MutationTicket), TaskError> {
        self.check_open()?;
        self.check_title(&new.title)?;
        if self.index_of(&new.id).is_some() || self.tombstones.contains(&new.id) {
            return Err(TaskError::DuplicateTask(new.id.to_string()));
        }
        let position = append_position(&self.tasks, new.status);
        let task = new.into_task(self.board_id, position);
        let ticket = self.pending.record_create(task.id, self.tasks.len());
        self.tasks.push(task.clone());
        Ok((task, ticket))
    }

    /// Optimistically applies `patch` to a cached task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the task is unknown, the new title is
    /// invalid, or the cache is closed.
    pub fn begin_update(
        &mut self,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<(Task, MutationTicket), TaskError> {
        self.check_open()?;
        if let Some(title) = &patch.title {
            self.check_title(title)?;
        }
        let index = self
            .index_of(id)
            .ok_or_else(|| TaskError::TaskNotFound(id.to_string()))?;
        let ticket = self.pending.record_update(&self.tasks[index], index);
        let task = &mut self.tasks[index];
        patch.apply_to(task);
        Ok((task.clone(), ticket))
    }

    /// Optimistically removes a cached task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::DeleteInFlight`] if a delete of the task has not
    /// settled yet, [`TaskError::TaskNotFound`] if it is not cached.
    pub fn begin_delete(&mut self, id: &TaskId) -> Result<MutationTicket, TaskError> {
        self.check_open()?;
        if self
            .pending
            .get(id)
            .is_some_and(|p| p.kind == MutationKind::Delete)
        {
            return Err(TaskError::DeleteInFlight(id.to_string()));
        }
        let index = self
            .index_of(id)
            .ok_or_else(|| TaskError::TaskNotFound(id.to_string()))?;
        let removed = self.tasks.remove(index);
        Ok(self.pending.record_delete(&removed, index))
    }

    fn upsert(&mut self, task: Task) -> bool {
        match self.index_of(&task.id) {
            Some(idx) if self.tasks[idx] == task => false,
            Some(idx) => {
                self.tasks[idx] = task;
                true
            }
            None => {
                self.tasks.push(task);
                true
            }
        }
    }

    fn remove(&mut self, id: &TaskId) -> bool {
        self.index_of(id).map(|idx| self.tasks.remove(idx)).is_some()
    }

    /// Settles one persistence call.
    ///
    /// On success of the burst's last call the confirmed row overwrites the
    /// cached one. On failure the last state the server confirmed is
    /// restored, unless the server has since deleted the task, in which
    /// case it is dropped. A row confirmed after its burst already closed
    /// is server truth the change feed may have been gated from, so it is
    /// applied unless the task is tombstoned or pending again.
    pub fn settle(
        &mut self,
        ticket: &MutationTicket,
        result: Result<Option<Task>, &MutationError>,
    ) -> Settled {
        if self.closed {
            return Settled::Ignored;
        }
        let row_missing = matches!(result, Err(MutationError::RowMissing));
        let late_row = match &result {
            Ok(Some(row)) => Some(row.clone()),
            _ => None,
        };
        match self.pending.settle(ticket, result.map_err(|_| ())) {
            Settlement::Stale => match late_row {
                Some(row)
                    if row.board_id == self.board_id
                        && !self.pending.contains(&row.id)
                        && !self.tombstones.contains(&row.id) =>
                {
                    Settled::Confirmed {
                        changed: self.upsert(row),
                    }
                }
                _ => Settled::Ignored,
            },
            Settlement::Outstanding => Settled::Pending,
            Settlement::ReplacedFailed(kind) => Settled::Superseded { kind },
            Settlement::Confirmed(entry) => {
                let changed = if self.tombstones.contains(&entry.task_id) {
                    self.remove(&entry.task_id)
                } else if entry.kind == MutationKind::Delete
                    && ticket.kind == MutationKind::Delete
                {
                    self.tombstones.insert(entry.task_id);
                    false
                } else if let Some((_, row)) = entry.confirmed {
                    self.upsert(row)
                } else {
                    false
                };
                Settled::Confirmed { changed }
            }
            Settlement::Failed(entry) => {
                if row_missing || self.tombstones.contains(&entry.task_id) {
                    self.tombstones.insert(entry.task_id);
                    self.remove(&entry.task_id);
                } else {
                    entry.rollback(&mut self.tasks);
                }
                Settled::RolledBack { kind: ticket.kind }
            }
        }
    }

    /// Merges a remote change event. Returns `true` if the visible list
    /// changed.
    ///
    /// Events for tasks with a pending mutation are ignored until it
    /// settles; a delete seen meanwhile is remembered. Never fails: rows
    /// that do not decode are logged and skipped.
    pub fn reconcile(&mut self, event: &ChangeEvent) -> bool {
        if self.closed || event.table != Table::Tasks {
            return false;
        }
        if let Some(held) = self.loading.as_mut() {
            held.push(event.clone());
            return false;
        }
        let Some(id) = event.record_id::<TaskId>() else {
            tracing::warn!(operation = %event.operation, "task event without id");
            return false;
        };
        let other_board = event
            .record()
            .and_then(|r| r.get("board_id"))
            .and_then(|b| b.as_str())
            .is_some_and(|b| b != self.board_id.to_string());
        if other_board {
            return false;
        }
        if self.pending.contains(&id) {
            if event.operation == ChangeOperation::Delete {
                self.tombstones.insert(id);
            }
            tracing::debug!(task_id = %id, operation = %event.operation, "remote event ignored, local change pending");
            return false;
        }
        if self.tombstones.contains(&id) {
            return false;
        }
        match event.operation {
            ChangeOperation::Insert | ChangeOperation::Update => match event.decode::<Task>() {
                Ok(task) => self.upsert(task),
                Err(e) => {
                    tracing::warn!(task_id = %id, error = %e, "malformed task row in change event");
                    false
                }
            },
            ChangeOperation::Delete => {
                self.tombstones.insert(id);
                self.remove(&id)
            }
        }
    }

    /// Drops all state. Later calls are rejected and settlements ignored.
    pub fn close(&mut self) {
        self.closed = true;
        self.tasks.clear();
        self.pending.clear();
        self.tombstones.clear();
    }
}
