//! Who is online on a board, and which card each of them has open.
//!
//! Each session joins the board's presence topic under its user id and,
//! once the join is confirmed, publishes its [`PresenceEntry`]. Every sync
//! from the transport rebuilds the active-user list from scratch: the first
//! entry reported for each key wins, later duplicates for the same key are
//! stale replicas left over from a reconnect.
//!
//! Editing is advisory. A user "is editing" a task when their entry's
//! `editing_task_id` points at it; nothing is locked.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use taskboard_proto::ids::TaskId;
use taskboard_proto::presence::{PresenceEntry, PresenceState};

use crate::backend::{PresenceChannelId, PresenceSignal, PresenceTransport};
use crate::error::SubscriptionError;
use crate::events::{EventSink, SessionEvent};
use crate::identity::Identity;

/// Collapses a presence state to one entry per key, keeping the first
/// entry reported for each key. Keys with no entries are skipped.
#[must_use]
pub fn collapse_presence(state: &PresenceState) -> Vec<PresenceEntry> {
    state
        .values()
        .filter_map(|entries| entries.first().cloned())
        .collect()
}

#[derive(Debug)]
struct Shared {
    /// This session's record, republished on every change.
    own: PresenceEntry,
    active: Vec<PresenceEntry>,
    stopped: bool,
}

/// Maintains this session's presence record and the merged online set.
pub struct PresenceTracker<B: PresenceTransport> {
    backend: Arc<B>,
    topic: String,
    channel: PresenceChannelId,
    shared: Arc<Mutex<Shared>>,
    republish: mpsc::UnboundedSender<()>,
    pump: JoinHandle<()>,
}

impl<B: PresenceTransport + 'static> PresenceTracker<B> {
    /// Joins `topic` as `identity` and starts tracking.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError`] if the transport refuses the join.
    pub async fn start(
        backend: Arc<B>,
        topic: &str,
        identity: &Identity,
        events: EventSink,
    ) -> Result<Self, SubscriptionError> {
        let key = identity.user_id.to_string();
        let (channel, mut signals) = backend.join(topic, &key).await?;
        tracing::info!(%channel, topic, "presence joined");

        let shared = Arc::new(Mutex::new(Shared {
            own: PresenceEntry {
                user_id: identity.user_id,
                email: identity.email.clone(),
                online_at: Utc::now(),
                editing_task_id: None,
            },
            active: Vec::new(),
            stopped: false,
        }));
        let (republish, mut requests) = mpsc::unbounded_channel::<()>();

        let pump = tokio::spawn({
            let backend = Arc::clone(&backend);
            let shared = Arc::clone(&shared);
            async move {
                let mut subscribed = false;
                loop {
                    tokio::select! {
                        signal = signals.recv() => match signal {
                            Some(PresenceSignal::Subscribed) => {
                                subscribed = true;
                                publish(&*backend, channel, &shared).await;
                            }
                            Some(PresenceSignal::Sync(state)) => {
                                let users = collapse_presence(&state);
                                let mut guard = shared.lock();
                                if guard.stopped {
                                    break;
                                }
                                guard.active.clone_from(&users);
                                drop(guard);
                                tracing::debug!(%channel, online = users.len(), "presence sync");
                                events.emit(SessionEvent::PresenceChanged(users));
                            }
                            None => break,
                        },
                        request = requests.recv() => match request {
                            Some(()) if subscribed => publish(&*backend, channel, &shared).await,
                            Some(()) => {}
                            None => break,
                        },
                    }
                }
            }
        });

        Ok(Self {
            backend,
            topic: topic.to_string(),
            channel,
            shared,
            republish,
            pump,
        })
    }
}

/// Tracks the current own record on `channel`.
async fn publish<B: PresenceTransport>(backend: &B, channel: PresenceChannelId, shared: &Mutex<Shared>) {
    let entry = shared.lock().own.clone();
    if let Err(e) = backend.track(channel, &entry).await {
        tracing::warn!(%channel, error = %e, "presence track failed");
    }
}

impl<B: PresenceTransport> PresenceTracker<B> {
    /// The presence topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Marks the card this session has open, or `None` when closed.
    ///
    /// Republishes the whole record with a fresh `online_at`. Calls made
    /// before the join is confirmed take effect with the first publish.
    pub fn set_editing_task_id(&self, task_id: Option<TaskId>) {
        {
            let mut shared = self.shared.lock();
            if shared.stopped {
                return;
            }
            shared.own.editing_task_id = task_id;
            shared.own.online_at = Utc::now();
        }
        if self.republish.send(()).is_err() {
            tracing::trace!(topic = %self.topic, "presence republish dropped, tracker stopped");
        }
    }

    /// The card this session has open.
    #[must_use]
    pub fn editing_task_id(&self) -> Option<TaskId> {
        self.shared.lock().own.editing_task_id
    }

    /// Users online on the board, one entry each, as of the last sync.
    #[must_use]
    pub fn active_users(&self) -> Vec<PresenceEntry> {
        self.shared.lock().active.clone()
    }

    /// Online users whose open card is `task_id`.
    #[must_use]
    pub fn editors_of(&self, task_id: &TaskId) -> Vec<PresenceEntry> {
        self.shared
            .lock()
            .active
            .iter()
            .filter(|u| u.is_editing(task_id))
            .cloned()
            .collect()
    }

    /// Leaves the topic. Idempotent; also runs on drop.
    pub fn stop(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.stopped {
                return;
            }
            shared.stopped = true;
            shared.active.clear();
        }
        self.pump.abort();
        self.backend.leave(self.channel);
        tracing::debug!(channel = %self.channel, topic = %self.topic, "presence left");
    }
}

impl<B: PresenceTransport> Drop for PresenceTracker<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
