//! In-process backend for tests and the demo binary.
//!
//! [`MemoryBackend`] keeps every table as a list of JSON rows, fans row
//! changes out to matching subscriptions, and runs presence channels keyed
//! by presence key. Several clients share one backend through an `Arc`,
//! which is how peer edits are simulated.
//!
//! Writes are serialized through a fair lane so they apply in the order
//! they were issued. Tests can hold that lane to keep persistence calls in
//! flight, and can queue failures for the next write, read, subscription,
//! or presence join.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::DateTime;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{OwnedMutexGuard, mpsc};

use taskboard_proto::feed::{ChangeEvent, ChangeOperation, RowFilter, SubscriptionSpec, Table};
use taskboard_proto::presence::{PresenceEntry, PresenceState};

use super::{
    BackendError, ChangeFeed, Order, Persistence, PresenceChannelId, PresenceSignal,
    PresenceTransport, Query, SubscriptionId, UNIQUE_VIOLATION,
};

/// A live change-feed subscription.
struct Subscriber {
    channel: String,
    spec: SubscriptionSpec,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

/// One session joined to a presence topic.
struct PresenceMember {
    id: PresenceChannelId,
    key: String,
    entry: Option<PresenceEntry>,
    tx: mpsc::UnboundedSender<PresenceSignal>,
}

#[derive(Default)]
struct State {
    tables: BTreeMap<Table, Vec<Value>>,
    subscriptions: HashMap<SubscriptionId, Subscriber>,
    /// Topic -> members in join order.
    presence: BTreeMap<String, Vec<PresenceMember>>,
    next_id: u64,
    write_failures: VecDeque<Option<BackendError>>,
    read_failures: VecDeque<BackendError>,
    subscription_failures: VecDeque<BackendError>,
    presence_failures: VecDeque<BackendError>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn broadcast(&self, event: &ChangeEvent) {
        for sub in self.subscriptions.values() {
            if sub.spec.matches(event) {
                // A dropped receiver just means the subscriber went away.
                let _ = sub.tx.send(event.clone());
            }
        }
    }

    fn sync_presence(&self, topic: &str) {
        let Some(members) = self.presence.get(topic) else {
            return;
        };
        let mut state = PresenceState::new();
        for member in members {
            if let Some(entry) = &member.entry {
                state.entry(member.key.clone()).or_default().push(entry.clone());
            }
        }
        for member in members {
            let _ = member.tx.send(PresenceSignal::Sync(state.clone()));
        }
    }

    fn check_unique(&self, table: Table, row: &Value) -> Result<(), BackendError> {
        let rows = self.tables.get(&table).map(Vec::as_slice).unwrap_or_default();
        if let Some(id) = row.get("id")
            && rows.iter().any(|r| r.get("id") == Some(id))
        {
            return Err(BackendError::with_code(
                UNIQUE_VIOLATION,
                format!("duplicate key value violates unique constraint \"{table}_pkey\""),
            ));
        }
        if table == Table::BoardMembers
            && rows.iter().any(|r| {
                r.get("board_id") == row.get("board_id") && r.get("user_id") == row.get("user_id")
            })
        {
            return Err(BackendError::with_code(
                UNIQUE_VIOLATION,
                "duplicate key value violates unique constraint \"board_members_board_id_user_id_key\"",
            ));
        }
        Ok(())
    }
}

/// In-process implementation of every backend trait.
pub struct MemoryBackend {
    state: Mutex<State>,
    write_lane: Arc<tokio::sync::Mutex<()>>,
    held: Mutex<Option<OwnedMutexGuard<()>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            write_lane: Arc::new(tokio::sync::Mutex::new(())),
            held: Mutex::new(None),
        }
    }

    /// Inserts a row directly, without unique checks or change events.
    pub fn seed(&self, table: Table, row: Value) {
        self.state.lock().tables.entry(table).or_default().push(row);
    }

    /// Returns a copy of every row in `table`.
    #[must_use]
    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.state.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    /// Broadcasts `event` to matching subscriptions without touching any
    /// table. Simulates a change made outside this process.
    pub fn emit(&self, event: &ChangeEvent) {
        self.state.lock().broadcast(event);
    }

    /// Makes the next write (insert, update, delete) fail with `err`.
    pub fn fail_next_write(&self, err: BackendError) {
        self.state.lock().write_failures.push_back(Some(err));
    }

    /// Lets the next write through even when failures are queued behind it.
    /// Combined with [`fail_next_write`](Self::fail_next_write) this fails a
    /// later write of a sequence.
    pub fn pass_next_write(&self) {
        self.state.lock().write_failures.push_back(None);
    }

    /// Makes the next select fail with `err`.
    pub fn fail_next_read(&self, err: BackendError) {
        self.state.lock().read_failures.push_back(err);
    }

    /// Makes the next change-feed subscription fail with `err`.
    pub fn fail_next_subscription(&self, err: BackendError) {
        self.state.lock().subscription_failures.push_back(err);
    }

    /// Makes the next presence join fail with `err`.
    pub fn fail_next_presence_join(&self, err: BackendError) {
        self.state.lock().presence_failures.push_back(err);
    }

    /// Blocks every write until [`release_writes`](Self::release_writes).
    ///
    /// Writes issued meanwhile queue up and apply in issue order once
    /// released.
    pub async fn hold_writes(&self) {
        let guard = Arc::clone(&self.write_lane).lock_owned().await;
        *self.held.lock() = Some(guard);
    }

    /// Lets held writes proceed.
    pub fn release_writes(&self) {
        self.held.lock().take();
    }

    /// Number of open change-feed subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Names of the open change-feed channels, sorted.
    #[must_use]
    pub fn subscribed_channels(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .subscriptions
            .values()
            .map(|s| s.channel.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of sessions joined to presence `topic`.
    #[must_use]
    pub fn presence_members(&self, topic: &str) -> usize {
        self.state.lock().presence.get(topic).map_or(0, Vec::len)
    }

    /// Runs `apply` once the write lane is free, unless a failure is queued.
    async fn write<T>(
        &self,
        apply: impl FnOnce(&mut State) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let _lane = self.write_lane.lock().await;
        let mut state = self.state.lock();
        if let Some(Some(err)) = state.write_failures.pop_front() {
            return Err(err);
        }
        apply(&mut state)
    }
}

fn matches_all(filters: &[RowFilter], row: &Value) -> bool {
    filters.iter().all(|f| f.matches(row))
}

/// Orders two column values: numbers numerically, RFC 3339 strings as
/// instants, other strings lexically, nulls last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(dx), Ok(dy)) => dx.cmp(&dy),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn sort_rows(rows: &mut [Value], order: &[Order]) {
    rows.sort_by(|a, b| {
        order
            .iter()
            .map(|o| {
                let ord = compare_values(a.get(&o.column), b.get(&o.column));
                if o.ascending { ord } else { ord.reverse() }
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

impl Persistence for MemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        let mut state = self.state.lock();
        if let Some(err) = state.read_failures.pop_front() {
            return Err(err);
        }
        let mut rows: Vec<Value> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| matches_all(&query.filters, r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(state);
        sort_rows(&mut rows, &query.order);
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError> {
        self.write(move |state| {
            if !row.is_object() {
                return Err(BackendError::new("row must be a JSON object"));
            }
            state.check_unique(table, &row)?;
            state.tables.entry(table).or_default().push(row.clone());
            state.broadcast(&ChangeEvent::new(
                ChangeOperation::Insert,
                table,
                Some(row.clone()),
                None,
            ));
            Ok(row)
        })
        .await
    }

    async fn update(
        &self,
        table: Table,
        filters: &[RowFilter],
        patch: Value,
    ) -> Result<Vec<Value>, BackendError> {
        self.write(move |state| {
            let Value::Object(patch) = patch else {
                return Err(BackendError::new("patch must be a JSON object"));
            };
            let mut changes = Vec::new();
            for row in state.tables.entry(table).or_default().iter_mut() {
                if !matches_all(filters, row) {
                    continue;
                }
                let old = row.clone();
                if let Value::Object(fields) = row {
                    for (column, value) in &patch {
                        fields.insert(column.clone(), value.clone());
                    }
                }
                changes.push((old, row.clone()));
            }
            let mut updated = Vec::with_capacity(changes.len());
            for (old, new) in changes {
                state.broadcast(&ChangeEvent::new(
                    ChangeOperation::Update,
                    table,
                    Some(new.clone()),
                    Some(old),
                ));
                updated.push(new);
            }
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, table: Table, filters: &[RowFilter]) -> Result<Vec<Value>, BackendError> {
        self.write(move |state| {
            let rows = state.tables.entry(table).or_default();
            let (deleted, kept): (Vec<Value>, Vec<Value>) =
                rows.drain(..).partition(|r| matches_all(filters, r));
            *rows = kept;
            for old in &deleted {
                state.broadcast(&ChangeEvent::new(
                    ChangeOperation::Delete,
                    table,
                    None,
                    Some(old.clone()),
                ));
            }
            Ok(deleted)
        })
        .await
    }
}

impl ChangeFeed for MemoryBackend {
    async fn subscribe(
        &self,
        channel: &str,
        spec: &SubscriptionSpec,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<ChangeEvent>), BackendError> {
        let mut state = self.state.lock();
        if let Some(err) = state.subscription_failures.pop_front() {
            return Err(err);
        }
        let id = SubscriptionId(state.next_id());
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscriptions.insert(
            id,
            Subscriber {
                channel: channel.to_string(),
                spec: spec.clone(),
                tx,
            },
        );
        tracing::trace!(%id, channel, "memory backend subscription opened");
        Ok((id, rx))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.state.lock().subscriptions.remove(&id).is_some() {
            tracing::trace!(%id, "memory backend subscription closed");
        }
    }
}

impl PresenceTransport for MemoryBackend {
    async fn join(
        &self,
        topic: &str,
        key: &str,
    ) -> Result<(PresenceChannelId, mpsc::UnboundedReceiver<PresenceSignal>), BackendError> {
        let mut state = self.state.lock();
        if let Some(err) = state.presence_failures.pop_front() {
            return Err(err);
        }
        let id = PresenceChannelId(state.next_id());
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(PresenceSignal::Subscribed);
        state
            .presence
            .entry(topic.to_string())
            .or_default()
            .push(PresenceMember {
                id,
                key: key.to_string(),
                entry: None,
                tx,
            });
        Ok((id, rx))
    }

    async fn track(&self, channel: PresenceChannelId, entry: &PresenceEntry) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let topic = state.presence.iter_mut().find_map(|(topic, members)| {
            let member = members.iter_mut().find(|m| m.id == channel)?;
            member.entry = Some(entry.clone());
            Some(topic.clone())
        });
        let Some(topic) = topic else {
            return Err(BackendError::new(format!("{channel} is not joined")));
        };
        state.sync_presence(&topic);
        Ok(())
    }

    fn leave(&self, channel: PresenceChannelId) {
        let mut state = self.state.lock();
        let topic = state.presence.iter_mut().find_map(|(topic, members)| {
            let before = members.len();
            members.retain(|m| m.id != channel);
            (members.len() != before).then(|| topic.clone())
        });
        if let Some(topic) = topic {
            state.sync_presence(&topic);
        }
    }
}
