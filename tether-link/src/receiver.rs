use std::marker::PhantomData;
use std::sync::Arc;

// ---

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

// ---

use tether_domain::{
    // ---
    Disposition,
    LinkClient,
    LinkError,
    LinkOptions,
    LinkState,
    Message,
    MessageAbandoned,
    MessageCompleted,
    MessageRejected,
    OpFuture,
    ReceiverHandle,
    Result,
};

// ---

use super::link::{Link, LinkConfig, LinkRef, MessageSubscription};
use super::machine::{LinkActor, Role};
use super::queue::Payload;
use super::Completion;

// ---------------------------------------------------------------------------
// Receiving
// ---------------------------------------------------------------------------

/// Role marker: links created with `create_receiver`, settled through
/// [`ReceiverHandle::settle`].
pub(crate) struct Receiving<C>(PhantomData<fn() -> C>);

// ---

#[async_trait]
impl<C: LinkClient> Role for Receiving<C> {
    // ---
    type Client = C;
    type Handle = C::Receiver;

    const FLAVOR: &'static str = "receiver";

    async fn create(client: &C, address: &str, options: &LinkOptions) -> Result<C::Receiver> {
        client.create_receiver(address, options).await
    }

    fn dispatch(handle: &C::Receiver, payload: Payload) -> OpFuture {
        // ---
        match payload {
            Payload::Settle(disposition, delivery) => handle.settle(disposition, delivery),
            Payload::Send(_) => Box::pin(std::future::ready(Err(LinkError::InvalidArgument(
                "receiving link cannot send",
            )))),
        }
    }
}

// ---------------------------------------------------------------------------
// ReceiverLink
// ---------------------------------------------------------------------------

/// A receiving link: delivers messages and settles them.
///
/// Construction performs no I/O. The underlying link is attached on demand:
/// by [`attach`](Link::attach), by the first settlement, or by the first
/// [`subscribe`](Self::subscribe). Settlements issued before the link is
/// attached are buffered and reach the wire in call order once it is.
///
/// Must be created inside a tokio runtime. Dropping it releases the
/// underlying link and fails outstanding work with [`LinkError::Closed`].
pub struct ReceiverLink<C: LinkClient> {
    // ---
    link: LinkRef,
    _client: PhantomData<fn() -> C>,
}

// ---

impl<C: LinkClient> ReceiverLink<C> {
    // ---
    pub fn new(address: impl Into<String>, options: LinkOptions, client: Arc<C>) -> Self {
        Self::with_config(address, options, client, &LinkConfig::default())
    }

    // ---

    pub fn with_config(
        address: impl Into<String>,
        options: LinkOptions,
        client: Arc<C>,
        config: &LinkConfig,
    ) -> Self {
        // ---
        let link = LinkActor::<Receiving<C>>::spawn(address.into(), options, client, config);
        Self {
            link,
            _client: PhantomData,
        }
    }

    // ---

    /// Settle `message` as successfully processed.
    ///
    /// Fails synchronously with [`LinkError::InvalidArgument`] if `message`
    /// was not received over a link.
    pub fn accept(&self, message: &Message) -> Result<Completion<MessageCompleted>> {
        self.settle(Disposition::Accept, message)
    }

    // ---

    /// Same as [`accept`](Self::accept).
    pub fn complete(&self, message: &Message) -> Result<Completion<MessageCompleted>> {
        self.accept(message)
    }

    // ---

    /// Settle `message` as permanently failed.
    pub fn reject(&self, message: &Message) -> Result<Completion<MessageRejected>> {
        self.settle(Disposition::Reject, message)
    }

    // ---

    /// Release `message` for redelivery.
    pub fn abandon(&self, message: &Message) -> Result<Completion<MessageAbandoned>> {
        self.settle(Disposition::Abandon, message)
    }

    // ---

    /// Start receiving messages. The first live subscription attaches the
    /// link; dropping the last one detaches it.
    pub fn subscribe(&self) -> MessageSubscription {
        self.link.subscribe()
    }

    // ---

    fn settle<T>(&self, disposition: Disposition, message: &Message) -> Result<Completion<T>> {
        // ---
        let delivery = message
            .delivery()
            .ok_or(LinkError::InvalidArgument("message has no delivery to settle"))?;
        Ok(self.link.request(Payload::Settle(disposition, delivery)))
    }
}

// ---

impl<C: LinkClient> Link for ReceiverLink<C> {
    // ---
    fn address(&self) -> &str {
        self.link.address()
    }

    fn attach(&self) -> Completion<()> {
        self.link.attach()
    }

    fn detach(&self) {
        self.link.detach()
    }

    fn state(&self) -> LinkState {
        self.link.state()
    }

    fn state_rx(&self) -> watch::Receiver<LinkState> {
        self.link.state_rx()
    }

    fn errors(&self) -> broadcast::Receiver<LinkError> {
        self.link.errors()
    }
}

// ---

impl<C: LinkClient> std::fmt::Debug for ReceiverLink<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverLink")
            .field("address", &self.link.address())
            .field("state", &self.link.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
