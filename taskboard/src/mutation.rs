//! Settlement plumbing for optimistic writes.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::backend::BackendError;
use crate::error::MutationError;

/// A persistence call running in the background.
///
/// The optimistic change is already visible when this is returned. Awaiting
/// [`settled`](Self::settled) is optional; dropping the handle does not
/// cancel the call.
#[derive(Debug)]
pub struct MutationHandle {
    inner: JoinHandle<Result<(), MutationError>>,
}

impl MutationHandle {
    /// Runs `settle` on the tokio runtime.
    pub(crate) fn spawn<F>(settle: F) -> Self
    where
        F: Future<Output = Result<(), MutationError>> + Send + 'static,
    {
        Self {
            inner: tokio::spawn(settle),
        }
    }

    /// Waits for the call to settle and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns the [`MutationError`] the call failed with. The local cache
    /// has already been rolled back by then.
    pub async fn settled(self) -> Result<(), MutationError> {
        self.inner.await.unwrap_or(Err(MutationError::Abandoned))
    }

    /// Returns `true` once the call has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Awaits a backend call, giving up after `limit`.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, MutationError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(MutationError::from),
        Err(_) => Err(MutationError::TimedOut(limit)),
    }
}
