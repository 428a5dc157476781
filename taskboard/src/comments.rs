//! A task's discussion thread.
//!
//! Comments get a client-generated id, so the optimistic echo and the row
//! the change feed later delivers are recognized as the same comment and
//! never shown twice. A comment that fails to persist is removed again.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use taskboard_proto::comment::Comment;
use taskboard_proto::feed::{EventFilter, RowFilter, SubscriptionSpec, Table};
use taskboard_proto::ids::{CommentId, TaskId};

use crate::backend::{Backend, Query};
use crate::error::{FetchError, MutationError};
use crate::events::{EventSink, SessionEvent};
use crate::feed::{ChangeFeedClient, SubscriptionHandle};
use crate::identity::Identity;
use crate::mutation::{MutationHandle, with_timeout};

/// Errors that reject a comment before it is shown.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommentError {
    /// Blank comments are not sent.
    #[error("comment cannot be empty")]
    Empty,
    /// The thread has been closed.
    #[error("comment thread closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Thread {
    /// Ordered by `created_at`.
    comments: Vec<Comment>,
    closed: bool,
}

impl Thread {
    /// Inserts or replaces by id. Returns `true` if the list changed.
    fn upsert(&mut self, comment: Comment) -> bool {
        if let Some(existing) = self.comments.iter_mut().find(|c| c.id == comment.id) {
            if *existing == comment {
                return false;
            }
            *existing = comment;
        } else {
            self.comments.push(comment);
        }
        self.comments.sort_by_key(|c| c.created_at);
        true
    }

    fn remove(&mut self, id: CommentId) -> bool {
        let before = self.comments.len();
        self.comments.retain(|c| c.id != id);
        self.comments.len() != before
    }
}

/// The open comment thread of one task.
pub struct CommentThread<B: Backend> {
    task_id: TaskId,
    identity: Identity,
    backend: Arc<B>,
    thread: Arc<Mutex<Thread>>,
    events: EventSink,
    timeout: Duration,
    subscription: Option<SubscriptionHandle<B>>,
}

impl<B: Backend> CommentThread<B> {
    /// Subscribes to new comments on `task_id`, then loads the thread.
    ///
    /// A failed subscription is reported as
    /// [`SessionEvent::LiveUpdatesUnavailable`] and the thread still opens.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the initial load fails.
    pub async fn open(
        backend: Arc<B>,
        identity: Identity,
        task_id: TaskId,
        events: EventSink,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let thread = Arc::new(Mutex::new(Thread::default()));
        let channel = format!("comments:{task_id}");
        let spec = SubscriptionSpec::table(Table::Comments)
            .event(EventFilter::Insert)
            .filter(RowFilter::eq("task_id", task_id));

        let subscription = ChangeFeedClient::new(Arc::clone(&backend))
            .subscribe(&channel, spec, {
                let thread = Arc::clone(&thread);
                let events = events.clone();
                move |event| match event.decode::<Comment>() {
                    Ok(comment) => {
                        let mut thread = thread.lock();
                        if !thread.closed && thread.upsert(comment) {
                            drop(thread);
                            events.emit(SessionEvent::CommentsChanged { task_id });
                        }
                    }
                    Err(e) => tracing::warn!(%task_id, error = %e, "malformed comment row"),
                }
            })
            .await;
        let subscription = match subscription {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "comment feed unavailable");
                events.emit(SessionEvent::LiveUpdatesUnavailable {
                    channel,
                    reason: e.to_string(),
                });
                None
            }
        };

        let query = Query::table(Table::Comments)
            .eq("task_id", task_id)
            .order("created_at", true);
        let rows = backend.select(&query).await?;
        let loaded = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Comment>, _>>()?;
        {
            let mut thread = thread.lock();
            for comment in loaded {
                thread.upsert(comment);
            }
        }
        events.emit(SessionEvent::CommentsChanged { task_id });

        Ok(Self {
            task_id,
            identity,
            backend,
            thread,
            events,
            timeout,
            subscription,
        })
    }

    /// The task this thread belongs to.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Comments, oldest first.
    #[must_use]
    pub fn comments(&self) -> Vec<Comment> {
        self.thread.lock().comments.clone()
    }

    /// Posts a comment as the signed-in user.
    ///
    /// The comment is visible immediately and removed again if it does not
    /// persist.
    ///
    /// # Errors
    ///
    /// Returns [`CommentError`] for blank content or a closed thread.
    pub fn send(&self, content: &str) -> Result<MutationHandle, CommentError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CommentError::Empty);
        }
        let comment = Comment::new(self.task_id, self.identity.user_id, content);
        let comment_id = comment.id;
        {
            let mut thread = self.thread.lock();
            if thread.closed {
                return Err(CommentError::Closed);
            }
            thread.upsert(comment.clone());
        }
        self.events.emit(SessionEvent::CommentsChanged { task_id: self.task_id });

        let backend = Arc::clone(&self.backend);
        let thread = Arc::clone(&self.thread);
        let events = self.events.clone();
        let limit = self.timeout;
        let task_id = self.task_id;
        Ok(MutationHandle::spawn(async move {
            let result = async {
                let row = serde_json::to_value(&comment)?;
                with_timeout(limit, backend.insert(Table::Comments, row)).await?;
                Ok::<(), MutationError>(())
            }
            .await;
            if let Err(e) = &result {
                let removed = {
                    let mut thread = thread.lock();
                    !thread.closed && thread.remove(comment_id)
                };
                if removed {
                    tracing::warn!(%task_id, %comment_id, error = %e, "comment rolled back");
                    events.emit(SessionEvent::CommentsChanged { task_id });
                    events.emit(SessionEvent::CommentFailed {
                        task_id,
                        comment_id,
                        reason: e.to_string(),
                    });
                }
            }
            result
        }))
    }

    /// Unsubscribes and drops the thread. Idempotent; also runs on drop.
    pub fn close(&mut self) {
        self.thread.lock().closed = true;
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl<B: Backend> Drop for CommentThread<B> {
    fn drop(&mut self) {
        self.close();
    }
}
