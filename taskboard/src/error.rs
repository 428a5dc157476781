//! Error types shared across the engine.
//!
//! Failures are resolved at the boundary where they occur. A failed
//! mutation rolls back locally and becomes a [`SessionEvent`]; only load
//! failures propagate to the caller as a value.
//!
//! [`SessionEvent`]: crate::events::SessionEvent

use std::time::Duration;

use crate::backend::BackendError;

/// Loading a board, list, or thread failed. The caller may retry.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The backend rejected the select.
    #[error("fetch failed: {0}")]
    Backend(#[from] BackendError),

    /// A returned row did not decode.
    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A create, update, or delete did not persist.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    /// The backend rejected the write.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// The call did not settle within the configured timeout.
    #[error("no response after {0:?}")]
    TimedOut(Duration),

    /// The write matched no row; the record is gone on the server.
    #[error("row no longer exists")]
    RowMissing,

    /// The payload could not be encoded, or the response decoded.
    #[error("malformed payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The settlement task was dropped before it finished.
    #[error("mutation abandoned")]
    Abandoned,
}

/// A live-update channel could not be established.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// The backend refused the subscription or presence join.
    #[error("subscription failed: {0}")]
    Backend(#[from] BackendError),
}
