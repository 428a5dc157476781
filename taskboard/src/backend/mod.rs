//! Backing-store abstraction for `Taskboard`.
//!
//! The engine talks to three external surfaces, each a trait here:
//! - [`Persistence`]: request/response CRUD over the application tables
//! - [`ChangeFeed`]: per-channel subscriptions to row changes
//! - [`PresenceTransport`]: ephemeral per-session presence records
//!
//! [`Backend`] bundles all three. [`memory::MemoryBackend`] is the
//! in-process implementation used by tests and the demo binary.

pub mod memory;

use std::fmt;

use serde_json::Value;
use tokio::sync::mpsc;

use taskboard_proto::feed::{ChangeEvent, RowFilter, SubscriptionSpec, Table};
use taskboard_proto::presence::{PresenceEntry, PresenceState};

/// Provider code for a unique-constraint violation.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Provider code for "no rows" on a single-row select.
pub const NO_ROWS: &str = "PGRST116";

/// Error returned by any backend call.
///
/// Carries the provider-specific code when there is one, which callers may
/// inspect (the invite flow maps [`UNIQUE_VIOLATION`] to a conflict).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    /// Provider error code, if any.
    pub code: Option<String>,
    /// Human-readable description.
    pub message: String,
}

impl BackendError {
    /// An error without a provider code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// An error with a provider code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Returns `true` if this is a unique-constraint violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(UNIQUE_VIOLATION)
    }
}

/// Sort key for a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Column to sort by.
    pub column: String,
    /// Ascending when `true`.
    pub ascending: bool,
}

/// A filtered, ordered select over one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Table to read.
    pub table: Table,
    /// Equality filters, all of which must match.
    pub filters: Vec<RowFilter>,
    /// Sort keys, applied in order. Rows with equal keys keep store order.
    pub order: Vec<Order>,
}

impl Query {
    /// Selects every row of `table`.
    #[must_use]
    pub const fn table(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Adds a `column=eq.value` filter.
    #[must_use]
    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters.push(RowFilter::eq(column, value));
        self
    }

    /// Adds a sort key.
    #[must_use]
    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }
}

/// Handle for an open change-feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle for a joined presence channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PresenceChannelId(pub u64);

impl fmt::Display for PresenceChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "presence-{}", self.0)
    }
}

/// Signals delivered on a joined presence channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceSignal {
    /// The join handshake completed; the session may now `track`.
    Subscribed,
    /// The merged presence state changed.
    Sync(PresenceState),
}

/// Request/response CRUD over the application tables.
///
/// Rows are JSON objects. Every call either returns data or a
/// [`BackendError`].
pub trait Persistence: Send + Sync {
    /// Reads the rows matching `query`.
    fn select(
        &self,
        query: &Query,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, BackendError>> + Send;

    /// Inserts one row and returns it as stored.
    fn insert(
        &self,
        table: Table,
        row: Value,
    ) -> impl std::future::Future<Output = Result<Value, BackendError>> + Send;

    /// Merges `patch` into every row matching `filters` and returns the
    /// updated rows. Matching nothing is not an error.
    fn update(
        &self,
        table: Table,
        filters: &[RowFilter],
        patch: Value,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, BackendError>> + Send;

    /// Deletes every row matching `filters` and returns the deleted rows.
    fn delete(
        &self,
        table: Table,
        filters: &[RowFilter],
    ) -> impl std::future::Future<Output = Result<Vec<Value>, BackendError>> + Send;
}

/// Subscriptions to row changes.
///
/// Events on one subscription arrive in the order the store emitted them.
/// Nothing is guaranteed across subscriptions.
pub trait ChangeFeed: Send + Sync {
    /// Opens a subscription named `channel` for changes matching `spec`.
    fn subscribe(
        &self,
        channel: &str,
        spec: &SubscriptionSpec,
    ) -> impl std::future::Future<
        Output = Result<(SubscriptionId, mpsc::UnboundedReceiver<ChangeEvent>), BackendError>,
    > + Send;

    /// Closes a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Ephemeral presence channels.
pub trait PresenceTransport: Send + Sync {
    /// Joins `topic` under presence key `key`.
    ///
    /// The returned receiver yields [`PresenceSignal::Subscribed`] once the
    /// join completes, then [`PresenceSignal::Sync`] on every state change.
    fn join(
        &self,
        topic: &str,
        key: &str,
    ) -> impl std::future::Future<
        Output = Result<(PresenceChannelId, mpsc::UnboundedReceiver<PresenceSignal>), BackendError>,
    > + Send;

    /// Publishes (or replaces) this session's presence record.
    fn track(
        &self,
        channel: PresenceChannelId,
        entry: &PresenceEntry,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Leaves the channel, removing this session's record. Unknown ids are
    /// ignored.
    fn leave(&self, channel: PresenceChannelId);
}

/// Everything a board session needs from the backing store.
pub trait Backend: Persistence + ChangeFeed + PresenceTransport + 'static {}

impl<T: Persistence + ChangeFeed + PresenceTransport + 'static> Backend for T {}
