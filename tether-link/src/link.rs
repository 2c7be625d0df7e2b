use std::sync::atomic::{AtomicU64, Ordering};

// ---

use tokio::sync::{broadcast, mpsc, oneshot, watch};

// ---

use tether_domain::{LinkError, LinkState, Message};

// ---

use super::queue::{Operation, Payload};
use super::{Completion, LinkCmd};

// ---------------------------------------------------------------------------
// LinkConfig
// ---------------------------------------------------------------------------

/// Per-link tuning.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    // ---
    /// Capacity of the `error` event channel. Observers that fall further
    /// behind than this miss the oldest errors.
    pub error_capacity: usize,
}

// ---

impl Default for LinkConfig {
    fn default() -> Self {
        Self { error_capacity: 16 }
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Lifecycle surface shared by [`ReceiverLink`](crate::ReceiverLink) and
/// [`SenderLink`](crate::SenderLink).
pub trait Link {
    // ---
    /// Routing address, fixed at construction.
    fn address(&self) -> &str;

    /// Attach the underlying link if it is not already attached.
    ///
    /// Resolves `Ok(())` once attached (immediately if it already is) or
    /// with the attach error. Concurrent calls share one attach attempt.
    fn attach(&self) -> Completion<()>;

    /// Release the underlying link. Fire and forget; a no-op when detached.
    /// Operations still waiting for an attach fail with
    /// [`LinkError::Detached`].
    fn detach(&self);

    /// Current lifecycle state.
    fn state(&self) -> LinkState;

    /// Subscribe to lifecycle state changes.
    fn state_rx(&self) -> watch::Receiver<LinkState>;

    /// Subscribe to link-level errors: failures no per-call completion
    /// could carry (unsolicited detach with an error, transport errors,
    /// attach failures nobody was waiting on).
    fn errors(&self) -> broadcast::Receiver<LinkError>;
}

// ---------------------------------------------------------------------------
// LinkRef
// ---------------------------------------------------------------------------

/// The facade's side of the link actor: every request goes through here.
pub(crate) struct LinkRef {
    // ---
    address: String,
    cmd_tx: mpsc::UnboundedSender<LinkCmd>,
    state_rx: watch::Receiver<LinkState>,
    error_tx: broadcast::Sender<LinkError>,
    next_subscription: AtomicU64,
}

// ---

impl LinkRef {
    // ---
    pub(crate) fn new(
        address: String,
        cmd_tx: mpsc::UnboundedSender<LinkCmd>,
        state_rx: watch::Receiver<LinkState>,
        error_tx: broadcast::Sender<LinkError>,
    ) -> Self {
        // ---
        Self {
            address,
            cmd_tx,
            state_rx,
            error_tx,
            next_subscription: AtomicU64::new(0),
        }
    }

    // ---

    /// Hand `cmd` to the actor. If the actor is gone the command, and any
    /// resolver inside it, is dropped; callers then observe `Closed`.
    fn send(&self, cmd: LinkCmd) {
        // ---
        if self.cmd_tx.send(cmd).is_err() {
            tracing::debug!(address = %self.address, "link actor gone, dropping command");
        }
    }

    // ---

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    // ---

    pub(crate) fn attach(&self) -> Completion<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.send(LinkCmd::Attach(Some(tx)));
        Completion::new(rx)
    }

    // ---

    pub(crate) fn detach(&self) {
        self.send(LinkCmd::Detach);
    }

    // ---

    pub(crate) fn request<T>(&self, payload: Payload) -> Completion<T> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.send(LinkCmd::Operation(Operation::new(payload, tx)));
        Completion::new(rx)
    }

    // ---

    pub(crate) fn subscribe(&self) -> MessageSubscription {
        // ---
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(LinkCmd::Subscribe { id, tx });
        MessageSubscription {
            id,
            rx,
            cmd_tx: self.cmd_tx.downgrade(),
        }
    }

    // ---

    pub(crate) fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    // ---

    pub(crate) fn state_rx(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    // ---

    pub(crate) fn errors(&self) -> broadcast::Receiver<LinkError> {
        self.error_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// MessageSubscription
// ---------------------------------------------------------------------------

/// A live `message` subscription on a receiving link.
///
/// While at least one subscription exists the link keeps itself attached.
/// Dropping the last one detaches it.
pub struct MessageSubscription {
    // ---
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
    /// Weak so a lingering subscription does not keep a dropped link alive.
    cmd_tx: mpsc::WeakUnboundedSender<LinkCmd>,
}

// ---

impl MessageSubscription {
    // ---
    /// Next received message. `None` once the link facade has been dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    // ---

    /// A message if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

// ---

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        // ---
        if let Some(cmd_tx) = self.cmd_tx.upgrade() {
            let _ = cmd_tx.send(LinkCmd::Unsubscribe(self.id));
        }
    }
}

// ---

impl std::fmt::Debug for MessageSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
