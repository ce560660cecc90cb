//! Handle for background requests that deliver their result to a callback.

use std::future::Future;

use tokio::task::JoinHandle;

/// Cancellable background request.
///
/// Dropping the handle does not cancel the request; call [`cancel`](Self::cancel).
#[derive(Debug)]
pub struct CancellableTask {
    handle: JoinHandle<()>,
}

impl CancellableTask {
    /// Spawn `future` on the current Tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// Cancel the request. The callback will not run if it has not already.
    /// Safe to call after completion.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the request has finished, by completion or cancellation.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the request to finish. Returns `false` if it was cancelled.
    pub async fn join(self) -> bool {
        self.handle.await.is_ok()
    }
}
