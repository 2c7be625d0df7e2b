use std::marker::PhantomData;
use std::sync::Arc;

// ---

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

// ---

use tether_domain::{
    // ---
    LinkClient,
    LinkError,
    LinkOptions,
    LinkState,
    Message,
    MessageEnqueued,
    OpFuture,
    Result,
    SenderHandle,
};

// ---

use super::link::{Link, LinkConfig, LinkRef};
use super::machine::{LinkActor, Role};
use super::queue::Payload;
use super::Completion;

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Role marker: links created with `create_sender`.
pub(crate) struct Sending<C>(PhantomData<fn() -> C>);

// ---

#[async_trait]
impl<C: LinkClient> Role for Sending<C> {
    // ---
    type Client = C;
    type Handle = C::Sender;

    const FLAVOR: &'static str = "sender";

    async fn create(client: &C, address: &str, options: &LinkOptions) -> Result<C::Sender> {
        client.create_sender(address, options).await
    }

    fn dispatch(handle: &C::Sender, payload: Payload) -> OpFuture {
        // ---
        match payload {
            Payload::Send(message) => handle.send(message),
            Payload::Settle(..) => Box::pin(std::future::ready(Err(LinkError::InvalidArgument(
                "sending link cannot settle",
            )))),
        }
    }
}

// ---------------------------------------------------------------------------
// SenderLink
// ---------------------------------------------------------------------------

/// A sending link.
///
/// Same lifecycle as [`ReceiverLink`](crate::ReceiverLink): attached on
/// demand, sends buffered in order while attaching. Must be created inside
/// a tokio runtime.
pub struct SenderLink<C: LinkClient> {
    // ---
    link: LinkRef,
    _client: PhantomData<fn() -> C>,
}

// ---

impl<C: LinkClient> SenderLink<C> {
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
        let link = LinkActor::<Sending<C>>::spawn(address.into(), options, client, config);
        Self {
            link,
            _client: PhantomData,
        }
    }

    // ---

    /// Send `message`, attaching first if needed. Resolves once the peer
    /// has taken it.
    pub fn send(&self, message: Message) -> Completion<MessageEnqueued> {
        self.link.request(Payload::Send(message))
    }
}

// ---

impl<C: LinkClient> Link for SenderLink<C> {
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

impl<C: LinkClient> std::fmt::Debug for SenderLink<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderLink")
            .field("address", &self.link.address())
            .field("state", &self.link.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::Arc;
    use std::time::Duration;

    use tether_domain::{LinkError, LinkOptions, LinkState, Message, MessageEnqueued};
    use tether_link_sim::{LinkSimClient, LinkSimConfig, SimOp};

    use super::SenderLink;
    use crate::Link;

    fn link() -> (LinkSimClient, SenderLink<LinkSimClient>) {
        // ---
        let client = LinkSimClient::new(LinkSimConfig::perfect());
        let link = SenderLink::new("queue/out", LinkOptions::new(), Arc::new(client.clone()));
        (client, link)
    }

    /// Poll `cond` until it holds, yielding to the link tasks in between.
    async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
        // ---
        let wait = async {
            while !cond() {
                tokio::task::yield_now().await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!("timed out waiting for {what}");
        }
    }

    #[tokio::test]
    async fn send_attaches_with_sender_flavor_and_options() {
        // ---
        let client = LinkSimClient::new(LinkSimConfig::perfect());
        let options = LinkOptions::new().with("target-capability", "queue");
        let link = SenderLink::new("queue/out", options.clone(), Arc::new(client.clone()));

        let message = Message::new("hello").with_property("kind", "greeting");
        assert_eq!(link.send(message.clone()).await, Ok(MessageEnqueued));
        assert_eq!(link.state(), LinkState::Attached);

        let calls = client.create_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].address, "queue/out");
        assert_eq!(calls[0].options, options);

        let handle = client.last_handle().expect("attached");
        assert_eq!(handle.operations(), vec![SimOp::Send(message)]);
    }

    // ---

    #[tokio::test]
    async fn operation_failure_reaches_only_that_send() {
        // ---
        let client = LinkSimClient::new(LinkSimConfig::perfect());
        let link = SenderLink::new("queue/out", LinkOptions::new(), Arc::new(client.clone()));
        let mut errors = link.errors();

        link.attach().await.expect("attach");
        let handle = client.last_handle().expect("attached");
        let err = LinkError::Operation("message too large".into());
        handle.fail_next_op(err.clone());

        assert_eq!(link.send(Message::new("big")).await, Err(err));
        assert_eq!(link.send(Message::new("small")).await, Ok(MessageEnqueued));
        assert_eq!(link.state(), LinkState::Attached, "operation failure keeps the link");
        assert!(errors.try_recv().is_err());
    }

    // ---

    #[tokio::test]
    async fn attach_failure_fails_every_queued_send_and_escalates() {
        // ---
        let (client, link) = link();
        let mut errors = link.errors();
        let gate = client.gate_next_attach();

        let c1 = link.send(Message::new("a"));
        let c2 = link.send(Message::new("b"));
        eventually("attach started", || client.create_calls().len() == 1).await;

        let err = LinkError::Attach("amqp:not-found".into());
        gate.fail(err.clone());

        assert_eq!(c1.await, Err(err.clone()));
        assert_eq!(c2.await, Err(err.clone()));
        assert_eq!(link.state(), LinkState::Detached);
        // No attach caller to carry it, so the link raises it too.
        assert_eq!(errors.try_recv().ok(), Some(err));
    }

    // ---

    #[tokio::test]
    async fn dropped_attach_completion_escalates_failure() {
        // ---
        let (client, link) = link();
        let mut errors = link.errors();
        let err = LinkError::Attach("unauthorized".into());
        client.fail_next_attach(err.clone());

        drop(link.attach());

        let seen = tokio::time::timeout(Duration::from_secs(5), errors.recv())
            .await
            .expect("error raised in time");
        assert_eq!(seen, Ok(err));
    }

    // ---

    #[tokio::test]
    async fn detach_while_attaching_fails_queued_sends_with_detached() {
        // ---
        let (client, link) = link();
        let gate = client.gate_next_attach();

        let pending = link.send(Message::new("never sent"));
        link.detach();
        assert_eq!(pending.await, Err(LinkError::Detached));
        assert_eq!(link.state(), LinkState::Detached);

        // The superseded attach completes later and its handle is released.
        gate.release();
        eventually("stale handle created", || client.handles().len() == 1).await;
        let stale = client.handles()[0].clone();
        eventually("stale handle released", || stale.force_close_count() == 1).await;
        assert!(stale.operations().is_empty());
        assert_eq!(link.state(), LinkState::Detached);
    }

    // ---

    #[tokio::test]
    async fn superseded_attach_never_becomes_a_second_live_handle() {
        // ---
        let (client, link) = link();
        let gate = client.gate_next_attach();

        let first = link.attach();
        link.detach();
        assert_eq!(first.await, Err(LinkError::Detached));

        // Second attempt completes while the first is still held.
        link.attach().await.expect("second attach");
        let live = client.last_handle().expect("attached");

        gate.release();
        eventually("first attempt finished", || client.handles().len() == 2).await;
        let stale = client.handles()[1].clone();
        eventually("stale handle released", || stale.force_close_count() == 1).await;

        assert_eq!(live.force_close_count(), 0);
        assert_eq!(link.state(), LinkState::Attached);
        assert_eq!(link.send(Message::new("x")).await, Ok(MessageEnqueued));
        assert_eq!(live.operations(), vec![SimOp::Send(Message::new("x"))]);
        assert!(stale.operations().is_empty());
    }

    // ---

    #[tokio::test]
    async fn connection_error_during_attach_fails_it() {
        // ---
        let (client, link) = link();
        let gate = client.gate_next_attach();
        let attach = link.attach();
        eventually("attach started", || client.create_calls().len() == 1).await;

        let err = LinkError::Connection("socket closed".into());
        gate.release_after_connection_error(err.clone());

        assert_eq!(attach.await, Err(err));
        assert_eq!(link.state(), LinkState::Detached);
        let orphan = client.last_handle().expect("adapter created one");
        assert_eq!(orphan.force_close_count(), 1);
    }

    // ---

    #[tokio::test]
    async fn dropping_the_link_fails_pending_work_with_closed() {
        // ---
        let (client, link) = link();
        let gate = client.gate_next_attach();

        let pending = link.send(Message::new("orphaned"));
        drop(link);
        assert_eq!(pending.await, Err(LinkError::Closed));

        gate.release();
        eventually("late handle created", || client.handles().len() == 1).await;
        let late = client.handles()[0].clone();
        eventually("late handle released", || late.force_close_count() == 1).await;
    }

    // ---

    #[tokio::test]
    async fn dropping_an_attached_link_releases_its_handle() {
        // ---
        let (client, link) = link();
        link.attach().await.expect("attach");
        let handle = client.last_handle().expect("attached");

        drop(link);
        eventually("handle released", || handle.force_close_count() == 1).await;
        assert_eq!(handle.subscriber_count(), 0);
    }

    // ---

    /// Attach, hold the next send open in the adapter, and issue it.
    async fn in_flight_send(
        client: &LinkSimClient,
        link: &SenderLink<LinkSimClient>,
    ) -> (
        tether_link_sim::LinkSimHandle,
        tether_link_sim::OpGate,
        crate::Completion<MessageEnqueued>,
    ) {
        // ---
        link.attach().await.expect("attach");
        let handle = client.last_handle().expect("attached");
        let gate = handle.gate_next_op();

        let pending = link.send(Message::new("stuck"));
        eventually("send reached the adapter", || handle.operations().len() == 1).await;
        (handle, gate, pending)
    }

    // ---

    #[tokio::test]
    async fn held_send_completes_when_the_adapter_answers() {
        // ---
        let (client, link) = link();
        let (_handle, gate, pending) = in_flight_send(&client, &link).await;

        gate.release();
        assert_eq!(pending.await, Ok(MessageEnqueued));
        assert_eq!(link.state(), LinkState::Attached);
    }

    // ---

    #[tokio::test]
    async fn transport_error_fails_in_flight_send() {
        // ---
        let (client, link) = link();
        // Gate stays alive: the adapter never answers on its own.
        let (handle, _gate, pending) = in_flight_send(&client, &link).await;

        let err = LinkError::Transport("peer reset".into());
        handle.emit_error(err.clone());

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("in-flight send resolved");
        assert_eq!(result, Err(err));
        assert_eq!(link.state(), LinkState::Detached);
        assert_eq!(handle.force_close_count(), 1);
    }

    // ---

    #[tokio::test]
    async fn detach_fails_in_flight_send_with_detached() {
        // ---
        let (client, link) = link();
        let (_handle, _gate, pending) = in_flight_send(&client, &link).await;

        link.detach();

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("in-flight send resolved");
        assert_eq!(result, Err(LinkError::Detached));
    }

    // ---

    #[tokio::test]
    async fn dropping_the_link_fails_in_flight_send_with_closed() {
        // ---
        let (client, link) = link();
        let (handle, _gate, pending) = in_flight_send(&client, &link).await;

        drop(link);

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("in-flight send resolved");
        assert_eq!(result, Err(LinkError::Closed));
        eventually("handle released", || handle.force_close_count() == 1).await;
    }

    // ---

    #[tokio::test]
    async fn late_adapter_answer_after_detach_is_ignored() {
        // ---
        let (client, link) = link();
        let (_handle, gate, pending) = in_flight_send(&client, &link).await;

        link.detach();
        assert_eq!(pending.await, Err(LinkError::Detached));

        // The adapter answers after the caller was already failed.
        gate.release();
        assert_eq!(link.send(Message::new("next")).await, Ok(MessageEnqueued));
        assert_eq!(link.state(), LinkState::Attached);
    }

    // ---

    #[tokio::test]
    async fn with_config_sets_error_capacity() {
        // ---
        let client = LinkSimClient::new(LinkSimConfig::perfect());
        let config = crate::LinkConfig { error_capacity: 1 };
        let link = SenderLink::with_config(
            "queue/out",
            LinkOptions::new(),
            Arc::new(client.clone()),
            &config,
        );
        let mut errors = link.errors();
        link.attach().await.expect("attach");

        let handle = client.last_handle().expect("attached");
        handle.emit_error(LinkError::Transport("first".into()));
        eventually("detached", || link.state() == LinkState::Detached).await;
        link.attach().await.expect("re-attach");
        client
            .last_handle()
            .expect("attached")
            .emit_error(LinkError::Transport("second".into()));
        eventually("detached again", || link.state() == LinkState::Detached).await;

        // Capacity one: the older error was overwritten.
        assert!(matches!(
            errors.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(1))
        ));
        assert_eq!(errors.try_recv().ok(), Some(LinkError::Transport("second".into())));
    }
}
