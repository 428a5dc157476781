//! Change-feed vocabulary: tables, row filters, subscription specs, and the
//! change events delivered to subscribers.
//!
//! Row filters use the `column=eq.value` form of the backing store's
//! realtime API. Records are carried as JSON rows and decoded by the
//! consumer that owns the table.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema every application table lives in.
pub const DEFAULT_SCHEMA: &str = "public";

/// Application tables reachable through persistence and the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Boards.
    Boards,
    /// Tasks.
    Tasks,
    /// Board memberships.
    BoardMembers,
    /// Task comments.
    Comments,
    /// User profiles.
    Profiles,
    /// User notifications.
    Notifications,
}

impl Table {
    /// Table name as known to the backing store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boards => "boards",
            Self::Tasks => "tasks",
            Self::BoardMembers => "board_members",
            Self::Comments => "comments",
            Self::Profiles => "profiles",
            Self::Notifications => "notifications",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOperation {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Which operations a subscription wants to receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFilter {
    /// Inserts only.
    #[serde(rename = "INSERT")]
    Insert,
    /// Updates only.
    #[serde(rename = "UPDATE")]
    Update,
    /// Deletes only.
    #[serde(rename = "DELETE")]
    Delete,
    /// Every operation (`*`).
    #[default]
    #[serde(rename = "*")]
    All,
}

impl EventFilter {
    /// Returns `true` if `op` passes this filter.
    #[must_use]
    pub const fn matches(self, op: ChangeOperation) -> bool {
        matches!(
            (self, op),
            (Self::All, _)
                | (Self::Insert, ChangeOperation::Insert)
                | (Self::Update, ChangeOperation::Update)
                | (Self::Delete, ChangeOperation::Delete)
        )
    }
}

/// Errors produced when parsing a row filter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterParseError {
    /// The filter has no `=` separating column and predicate.
    #[error("missing '=' in filter: {0}")]
    MissingSeparator(String),
    /// Only the `eq` operator is supported.
    #[error("unsupported filter operator in: {0}")]
    UnsupportedOperator(String),
    /// The column name is empty.
    #[error("empty column in filter: {0}")]
    EmptyColumn(String),
}

/// Equality filter on one column, written `column=eq.value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowFilter {
    /// Column to compare.
    pub column: String,
    /// Expected value in its string form.
    pub value: String,
}

impl RowFilter {
    /// Builds `column=eq.value`.
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// Returns `true` if `record[column]` equals the expected value.
    ///
    /// Strings compare directly; numbers and booleans compare by their JSON
    /// text. Missing columns and `null` never match.
    #[must_use]
    pub fn matches(&self, record: &Value) -> bool {
        match record.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

impl FromStr for RowFilter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, predicate) = s
            .split_once('=')
            .ok_or_else(|| FilterParseError::MissingSeparator(s.to_string()))?;
        if column.is_empty() {
            return Err(FilterParseError::EmptyColumn(s.to_string()));
        }
        let value = predicate
            .strip_prefix("eq.")
            .ok_or_else(|| FilterParseError::UnsupportedOperator(s.to_string()))?;
        Ok(Self::eq(column, value))
    }
}

/// What a change-feed subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Schema name, normally [`DEFAULT_SCHEMA`].
    pub schema: String,
    /// Table to watch.
    pub table: Table,
    /// Operations of interest.
    pub event: EventFilter,
    /// Optional row filter.
    pub filter: Option<RowFilter>,
}

impl SubscriptionSpec {
    /// Every change on `table` in the default schema.
    #[must_use]
    pub fn table(table: Table) -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table,
            event: EventFilter::All,
            filter: None,
        }
    }

    /// Restricts the operations delivered.
    #[must_use]
    pub const fn event(mut self, event: EventFilter) -> Self {
        self.event = event;
        self
    }

    /// Restricts delivery to rows matching `filter`.
    #[must_use]
    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Returns `true` if `event` should be delivered to this subscription.
    ///
    /// The row filter is checked against the new record, or the old record
    /// for deletes.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.schema != self.schema || event.table != self.table {
            return false;
        }
        if !self.event.matches(event.operation) {
            return false;
        }
        self.filter
            .as_ref()
            .is_none_or(|f| event.record().is_some_and(|r| f.matches(r)))
    }
}

/// A single row change delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened to the row.
    #[serde(rename = "eventType")]
    pub operation: ChangeOperation,
    /// Schema of the table.
    pub schema: String,
    /// Table the row belongs to.
    pub table: Table,
    /// Row after the change (inserts and updates).
    #[serde(default)]
    pub new: Option<Value>,
    /// Row before the change (updates and deletes).
    #[serde(default)]
    pub old: Option<Value>,
}

impl ChangeEvent {
    /// Builds an event in the default schema.
    #[must_use]
    pub fn new(operation: ChangeOperation, table: Table, new: Option<Value>, old: Option<Value>) -> Self {
        Self {
            operation,
            schema: DEFAULT_SCHEMA.to_string(),
            table,
            new,
            old,
        }
    }

    /// The row this event is about: `new` for inserts and updates, `old`
    /// for deletes.
    #[must_use]
    pub const fn record(&self) -> Option<&Value> {
        match self.operation {
            ChangeOperation::Insert | ChangeOperation::Update => self.new.as_ref(),
            ChangeOperation::Delete => self.old.as_ref(),
        }
    }

    /// Decodes [`record`](Self::record) into a typed row.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the record is missing or malformed.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let record = self.record().cloned().unwrap_or(Value::Null);
        serde_json::from_value(record)
    }

    /// Parses the `id` column of [`record`](Self::record).
    ///
    /// Works for deletes that only carry the primary key.
    #[must_use]
    pub fn record_id<T: FromStr>(&self) -> Option<T> {
        self.record()?.get("id")?.as_str()?.parse().ok()
    }
}
