//! Bookkeeping for optimistic mutations that have not settled yet.
//!
//! Each task has at most one [`PendingMutation`]. Consecutive edits to a
//! task coalesce into one burst whose rollback target is the last state the
//! server confirmed: the record before the burst, moved forward whenever a
//! call of the burst returns its stored row. Issuing another update never
//! moves it, so a single rollback skips every unconfirmed intermediate.
//!
//! A delete opens a new burst but inherits the rollback target of the
//! burst it replaces, and keeps listening to that burst's calls: their
//! confirmed rows still move the target, and their failures are still
//! reported once.

use std::collections::HashMap;
use std::fmt;

use taskboard_proto::ids::TaskId;
use taskboard_proto::task::Task;

/// What an optimistic mutation did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// Inserted a new task.
    Create,
    /// Patched an existing task.
    Update,
    /// Removed a task.
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Identifies one persistence call within a burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationTicket {
    /// The task the call writes.
    pub task_id: TaskId,
    /// The burst the call belongs to.
    pub burst: u64,
    /// Issue order within the burst, starting at 1.
    pub seq: u32,
    /// What this particular call does.
    pub kind: MutationKind,
}

/// A burst that a delete replaced while some of its calls were in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacedBurst {
    /// Its identifier.
    pub burst: u64,
    /// Issue order of its latest confirmed call, 0 if none.
    pub confirmed_seq: u32,
    /// Set once one of its failures has been reported.
    pub failed: bool,
}

/// An in-flight burst of local changes to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    /// The task.
    pub task_id: TaskId,
    /// The mutation that opened the burst.
    pub kind: MutationKind,
    /// Burst identifier; settlements from older bursts are stale.
    pub burst: u64,
    /// What a rollback restores: the last state the server confirmed,
    /// `None` while the server has no row.
    pub previous: Option<Task>,
    /// Where the task sat in the cache when the burst opened.
    pub previous_index: usize,
    /// Calls issued in this burst.
    pub issued: u32,
    /// Calls still in flight.
    pub outstanding: u32,
    /// Latest confirmed row of this burst, by issue order.
    pub confirmed: Option<(u32, Task)>,
    /// The burst this one replaced.
    pub replaced: Option<ReplacedBurst>,
}

impl PendingMutation {
    /// Puts `previous` back into `tasks`, or removes the task when the
    /// server has no row for it.
    pub fn rollback(&self, tasks: &mut Vec<Task>) {
        let current = tasks.iter().position(|t| t.id == self.task_id);
        match (&self.previous, current) {
            (Some(previous), Some(idx)) => tasks[idx] = previous.clone(),
            (Some(previous), None) => {
                let idx = self.previous_index.min(tasks.len());
                tasks.insert(idx, previous.clone());
            }
            (None, Some(idx)) => {
                tasks.remove(idx);
            }
            (None, None) => {}
        }
    }

    fn confirm(&mut self, seq: u32, row: Task) {
        if self.confirmed.as_ref().is_none_or(|(latest, _)| *latest < seq) {
            self.previous = Some(row.clone());
            self.confirmed = Some((seq, row));
        }
    }

    fn settle_replaced(&mut self, ticket: &MutationTicket, result: Result<Option<Task>, ()>) -> Settlement {
        let Some(replaced) = self.replaced.as_mut().filter(|r| r.burst == ticket.burst) else {
            return Settlement::Stale;
        };
        match result {
            Ok(Some(row)) => {
                if replaced.confirmed_seq < ticket.seq {
                    replaced.confirmed_seq = ticket.seq;
                    self.previous = Some(row);
                }
                Settlement::Outstanding
            }
            Ok(None) => Settlement::Outstanding,
            Err(()) if replaced.failed => Settlement::Stale,
            Err(()) => {
                replaced.failed = true;
                Settlement::ReplacedFailed(ticket.kind)
            }
        }
    }
}

/// Result of settling one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// No matching burst; the call was superseded or the table was cleared.
    Stale,
    /// The call succeeded but others from the same burst are in flight.
    Outstanding,
    /// The last call of the burst succeeded.
    Confirmed(PendingMutation),
    /// A call of the burst failed. The burst is closed; its remaining calls
    /// will settle as [`Settlement::Stale`].
    Failed(PendingMutation),
    /// A call of a burst replaced by a pending delete failed. The delete's
    /// burst owns the rollback, so nothing is undone now.
    ReplacedFailed(MutationKind),
}

/// Pending mutations keyed by task id.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<TaskId, PendingMutation>,
    next_burst: u64,
}

impl PendingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The pending entry for `task_id`.
    #[must_use]
    pub fn get(&self, task_id: &TaskId) -> Option<&PendingMutation> {
        self.entries.get(task_id)
    }

    /// Returns `true` if `task_id` has an unsettled mutation.
    #[must_use]
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.entries.contains_key(task_id)
    }

    /// Number of tasks with unsettled mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn open(
        &mut self,
        task_id: TaskId,
        kind: MutationKind,
        previous: Option<Task>,
        previous_index: usize,
    ) -> &mut PendingMutation {
        self.next_burst += 1;
        let entry = PendingMutation {
            task_id,
            kind,
            burst: self.next_burst,
            previous,
            previous_index,
            issued: 1,
            outstanding: 1,
            confirmed: None,
            replaced: None,
        };
        self.entries.entry(task_id).insert_entry(entry).into_mut()
    }

    /// Records a create. The task must not have a pending entry.
    pub fn record_create(&mut self, task_id: TaskId, index: usize) -> MutationTicket {
        let entry = self.open(task_id, MutationKind::Create, None, index);
        first_ticket(entry)
    }

    /// Records an update to `current` (its state before this patch).
    ///
    /// Joins the pending burst if there is one, leaving its rollback target
    /// untouched.
    pub fn record_update(&mut self, current: &Task, index: usize) -> MutationTicket {
        if let Some(entry) = self.entries.get_mut(&current.id)
            && entry.kind != MutationKind::Delete
        {
            entry.issued += 1;
            entry.outstanding += 1;
            return MutationTicket {
                task_id: current.id,
                burst: entry.burst,
                seq: entry.issued,
                kind: MutationKind::Update,
            };
        }
        let entry = self.open(current.id, MutationKind::Update, Some(current.clone()), index);
        first_ticket(entry)
    }

    /// Records a delete of `current`.
    ///
    /// Replaces any pending burst, inheriting its rollback target: a failed
    /// delete restores the last confirmed state, not unconfirmed edits.
    pub fn record_delete(&mut self, current: &Task, index: usize) -> MutationTicket {
        let older = self.entries.remove(&current.id);
        let entry = self.open(current.id, MutationKind::Delete, Some(current.clone()), index);
        if let Some(older) = older {
            entry.previous = older.previous;
            entry.replaced = Some(ReplacedBurst {
                burst: older.burst,
                confirmed_seq: older.confirmed.map_or(0, |(seq, _)| seq),
                failed: false,
            });
        }
        first_ticket(entry)
    }

    /// Settles one call. `result` is the confirmed row on success, if the
    /// backend returned one.
    pub fn settle(&mut self, ticket: &MutationTicket, result: Result<Option<Task>, ()>) -> Settlement {
        let Some(entry) = self.entries.get_mut(&ticket.task_id) else {
            return Settlement::Stale;
        };
        if entry.burst != ticket.burst {
            return entry.settle_replaced(ticket, result);
        }
        match result {
            Err(()) => self
                .entries
                .remove(&ticket.task_id)
                .map_or(Settlement::Stale, Settlement::Failed),
            Ok(row) => {
                entry.outstanding = entry.outstanding.saturating_sub(1);
                if let Some(row) = row {
                    entry.confirm(ticket.seq, row);
                }
                if entry.outstanding > 0 {
                    return Settlement::Outstanding;
                }
                self.entries
                    .remove(&ticket.task_id)
                    .map_or(Settlement::Stale, Settlement::Confirmed)
            }
        }
    }

    /// Forgets every pending entry. Later settlements become stale.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn first_ticket(entry: &PendingMutation) -> MutationTicket {
    MutationTicket {
        task_id: entry.task_id,
        burst: entry.burst,
        seq: 1,
        kind: entry.kind,
    }
}
