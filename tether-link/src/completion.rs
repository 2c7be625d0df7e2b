use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

// ---

use tokio::sync::oneshot;

// ---

use tether_domain::{LinkError, Result};

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Outcome of one facade call, resolved exactly once by the link actor.
///
/// `T` is the kind-specific success marker (`MessageCompleted`,
/// `MessageEnqueued`, `()` for attach). Dropping a `Completion` means the
/// caller does not care about the outcome; the operation still runs.
///
/// Always resolves asynchronously, even when the link is already attached,
/// so a caller reacting to one completion can safely issue the next call.
#[must_use = "drop the completion explicitly if the outcome is not needed"]
pub struct Completion<T> {
    // ---
    rx: oneshot::Receiver<Result<()>>,
    _kind: PhantomData<fn() -> T>,
}

// ---

impl<T> Completion<T> {
    // ---
    pub(crate) fn new(rx: oneshot::Receiver<Result<()>>) -> Self {
        Self {
            rx,
            _kind: PhantomData,
        }
    }
}

// ---

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

// ---

impl<T: Default> Future for Completion<T> {
    // ---
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // ---
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(Ok(()))) => Poll::Ready(Ok(T::default())),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            // The actor dropped the resolver: it has shut down.
            Poll::Ready(Err(_)) => Poll::Ready(Err(LinkError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
