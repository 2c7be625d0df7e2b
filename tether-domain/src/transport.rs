use std::future::Future;
use std::pin::Pin;

// ---

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

// ---

use super::error::{LinkError, Result};
use super::message::{Delivery, Disposition, LinkOptions, Message};

// ---------------------------------------------------------------------------
// LinkState
// ---------------------------------------------------------------------------

/// Lifecycle state of a single logical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    // ---
    /// No underlying handle. Initial state.
    Detached,

    /// The adapter is creating the underlying handle.
    Attaching,

    /// A live handle exists; operations dispatch immediately.
    Attached,

    /// The handle is being released. Requests are deferred until `Detached`.
    Detaching,
}

// ---------------------------------------------------------------------------
// HandleEvent
// ---------------------------------------------------------------------------

/// Events raised by a live handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleEvent {
    // ---
    /// The peer detached the link. `error` is `None` for a clean detach.
    Detached { error: Option<LinkError> },

    /// The link reported an error.
    Error(LinkError),

    /// A message arrived. Receiving handles only.
    Message(Message),
}

// ---

/// Future returned by handle operation primitives.
///
/// The primitive starts the operation when it is *called*, not when the
/// future is first polled, so call order is wire order.
pub type OpFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

// ---------------------------------------------------------------------------
// LinkHandle
// ---------------------------------------------------------------------------

/// A live, adapter-owned link.
pub trait LinkHandle: Send + Sync + 'static {
    // ---
    /// Start observing this handle's events.
    ///
    /// Dropping the returned receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<HandleEvent>;

    /// Tear the link down. Synchronous, best effort, never fails.
    fn force_close(&self);
}

// ---

/// Handle of a receiving link.
pub trait ReceiverHandle: LinkHandle {
    // ---
    /// Settle one delivery.
    fn settle(&self, disposition: Disposition, delivery: Delivery) -> OpFuture;
}

// ---

/// Handle of a sending link.
pub trait SenderHandle: LinkHandle {
    // ---
    /// Transmit one message. Resolves when the peer has taken it.
    fn send(&self, message: Message) -> OpFuture;
}

// ---------------------------------------------------------------------------
// LinkClient
// ---------------------------------------------------------------------------

/// Top-level adapter client: the connection links are created on.
///
/// Shared read-only across any number of links.
#[async_trait]
pub trait LinkClient: Send + Sync + 'static {
    // ---
    type Receiver: ReceiverHandle;
    type Sender: SenderHandle;

    /// Create a receiving link on `address`.
    async fn create_receiver(&self, address: &str, options: &LinkOptions)
        -> Result<Self::Receiver>;

    /// Create a sending link on `address`.
    async fn create_sender(&self, address: &str, options: &LinkOptions) -> Result<Self::Sender>;

    /// Subscribe to connection-level errors, independent of any handle.
    fn connection_errors(&self) -> broadcast::Receiver<LinkError>;
}
