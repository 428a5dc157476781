//! Optimistic task cache for one board.
//!
//! Local mutations are applied to the cache immediately and recorded in a
//! [`PendingTable`] with the pre-image needed to undo them. The persistence
//! call then runs in the background. While a task has a pending entry,
//! remote change events for it are ignored so the view never regresses to
//! a snapshot older than the local edit. When the call settles the
//! confirmed row replaces the cached one, or the pre-image is restored.

pub mod cache;
pub mod filter;
pub mod pending;
pub mod store;

pub use cache::{Settled, TaskCache};
pub use filter::TaskFilter;
pub use pending::{MutationKind, MutationTicket, PendingMutation, PendingTable, ReplacedBurst, Settlement};
pub use store::TaskStore;

use thiserror::Error;

/// Errors that reject a task operation before anything is applied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Task title cannot be empty.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds the maximum length.
    #[error("task title too long (max {0} characters)")]
    TitleTooLong(usize),
    /// Task with the given ID was not found.
    #[error("task not found: {0}")]
    TaskNotFound(String),
    /// A task with this ID already exists or was deleted.
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),
    /// A delete for this task is already in flight.
    #[error("delete already in flight for task {0}")]
    DeleteInFlight(String),
    /// The board session has been closed.
    #[error("board session closed")]
    SessionClosed,
}
