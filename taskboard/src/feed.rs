//! Typed subscriptions over the backend change feed.
//!
//! [`ChangeFeedClient::subscribe`] opens a channel and pumps its events into
//! a handler on a background task, one at a time and in delivery order.
//! The returned [`SubscriptionHandle`] tears the channel down exactly once,
//! whether through [`unsubscribe`](SubscriptionHandle::unsubscribe) or drop.

use std::sync::Arc;

use tokio::task::JoinHandle;

use taskboard_proto::feed::{ChangeEvent, SubscriptionSpec};

use crate::backend::{ChangeFeed, SubscriptionId};
use crate::error::SubscriptionError;

/// Opens change-feed subscriptions.
pub struct ChangeFeedClient<B> {
    backend: Arc<B>,
}

impl<B> Clone for ChangeFeedClient<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: ChangeFeed + 'static> ChangeFeedClient<B> {
    /// Creates a client over `backend`.
    pub const fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Subscribes `channel` to events matching `spec`, calling `on_event`
    /// for each.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError`] if the backend refuses the channel.
    pub async fn subscribe<F>(
        &self,
        channel: &str,
        spec: SubscriptionSpec,
        mut on_event: F,
    ) -> Result<SubscriptionHandle<B>, SubscriptionError>
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let (id, mut rx) = self.backend.subscribe(channel, &spec).await?;
        tracing::info!(%id, channel, table = %spec.table, filter = ?spec.filter.as_ref().map(ToString::to_string), "subscribed");

        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                on_event(event);
            }
        });

        Ok(SubscriptionHandle {
            id,
            channel: channel.to_string(),
            backend: Arc::clone(&self.backend),
            pump,
            active: true,
        })
    }
}

/// An open subscription. Dropping it unsubscribes.
pub struct SubscriptionHandle<B: ChangeFeed> {
    id: SubscriptionId,
    channel: String,
    backend: Arc<B>,
    pump: JoinHandle<()>,
    active: bool,
}

impl<B: ChangeFeed> SubscriptionHandle<B> {
    /// The backend's id for this subscription.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Closes the subscription. No handler call starts afterwards.
    pub fn unsubscribe(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.pump.abort();
        self.backend.unsubscribe(self.id);
        tracing::debug!(id = %self.id, channel = %self.channel, "unsubscribed");
    }
}

impl<B: ChangeFeed> Drop for SubscriptionHandle<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
