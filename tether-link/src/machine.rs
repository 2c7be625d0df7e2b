//! [`LinkActor`]: the link lifecycle state machine.
//!
//! # Design
//!
//! One tokio task per link owns every piece of mutable link state: the
//! lifecycle state, the adapter handle, the operation queue, the replies of
//! operations the adapter is still working on, the attach waiters and the
//! subscription registry. Four sources feed it, all drained serially by one
//! `select!` loop, so no state is ever locked:
//!
//! - facade commands ([`LinkCmd`]),
//! - attach completions from the task running the adapter's create call,
//!   tagged with the attach generation that started them,
//! - outcomes of dispatched operations,
//! - events from the live handle (only polled while a handle exists).
//!
//! # State machine
//!
//! ```text
//!             attach / operation            create ok
//! ┌──────────┐ ─────────────────> ┌───────────┐ ─────────> ┌──────────┐
//! │ Detached │                    │ Attaching │            │ Attached │
//! └──────────┘ <───────────────── └───────────┘            └──────────┘
//!      ^         create failed          │ detach                │ detach /
//!      │                                v                       │ handle lost
//!      │                          ┌───────────┐                 │
//!      └───────────────────────── │ Detaching │ <───────────────┘
//!          handle released        └───────────┘
//! ```
//!
//! Entry actions:
//!
//! - **Detached**: fail every in-flight operation, then every queued one,
//!   then every attach waiter with the cause (or [`LinkError::Detached`]).
//!   Adapter work still running for the failed operations is abandoned and
//!   its late results are dropped. Escalate the cause to the `error`
//!   event when nobody else can carry it, then replay deferred triggers.
//! - **Attaching**: bump the generation and start the adapter's create call.
//! - **Attached**: flush the queue to the handle in FIFO order.
//! - **Detaching**: drop the event subscription, force-close the handle,
//!   continue to `Detached`. Triggers seen here are deferred.
//!
//! # Stale attach completions
//!
//! `detach` while `Attaching` does not cancel the adapter's create call.
//! When it finishes, its generation no longer matches (or the link is no
//! longer `Attaching`) and the completion is ignored; a handle it carries
//! is force-closed so the link never owns two.

use std::collections::VecDeque;
use std::sync::Arc;

// ---

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};

// ---

use tether_domain::{
    // ---
    HandleEvent,
    LinkClient,
    LinkError,
    LinkHandle,
    LinkOptions,
    LinkState,
    Message,
    OpFuture,
    Result,
};

// ---

use super::link::LinkRef;
use super::queue::{InFlight, Operation, OperationQueue, Payload, Reply};
use super::subscription::{Edge, SubscriptionTracker};
use super::LinkConfig;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// What differs between a receiving and a sending link: how the handle is
/// created and how an operation reaches it.
#[async_trait]
pub(crate) trait Role: Send + 'static {
    // ---
    type Client: LinkClient;
    type Handle: LinkHandle;

    /// For logs.
    const FLAVOR: &'static str;

    async fn create(
        client: &Self::Client,
        address: &str,
        options: &LinkOptions,
    ) -> Result<Self::Handle>;

    /// Start `payload` on `handle`. Must start it before returning.
    fn dispatch(handle: &Self::Handle, payload: Payload) -> OpFuture;
}

// ---------------------------------------------------------------------------
// Commands and triggers
// ---------------------------------------------------------------------------

/// Requests from the facade.
#[derive(Debug)]
pub(crate) enum LinkCmd {
    // ---
    /// `None` when nobody awaits the outcome (implicit attach).
    Attach(Option<Reply>),
    Detach,
    Operation(Operation),
    Subscribe {
        id: u64,
        tx: mpsc::UnboundedSender<Message>,
    },
    Unsubscribe(u64),
}

// ---

/// Failure carried into `Detached`.
#[derive(Debug, Clone)]
struct Failure {
    // ---
    error: LinkError,
    /// Raise on the `error` event as well as failing pending work.
    escalate: bool,
}

// ---

impl Failure {
    // ---
    fn escalated(error: LinkError) -> Self {
        Self {
            error,
            escalate: true,
        }
    }
}

// ---

/// Inputs to the transition table.
#[derive(Debug)]
enum Trigger {
    // ---
    Attach(Option<Reply>),
    Detach,
    Operation(Operation),
    /// The live handle detached or errored. `None` = clean detach.
    HandleLost(Option<Failure>),
}

// ---

impl Trigger {
    // ---
    /// Resolve whatever this trigger was waiting on with `err`.
    fn fail(self, err: &LinkError) {
        // ---
        match self {
            Trigger::Attach(Some(reply)) => {
                let _ = reply.send(Err(err.clone()));
            }
            Trigger::Operation(op) => op.resolve(Err(err.clone())),
            Trigger::Attach(None) | Trigger::Detach | Trigger::HandleLost(_) => {}
        }
    }
}

// ---

/// Outcome of one adapter create call.
struct AttachDone<H> {
    // ---
    generation: u64,
    result: Result<H>,
}

// ---------------------------------------------------------------------------
// LinkActor
// ---------------------------------------------------------------------------

pub(crate) struct LinkActor<R: Role> {
    // ---
    address: String,
    options: LinkOptions,
    client: Arc<R::Client>,

    state: LinkState,

    /// Present only while `Attached` (and transiently while `Detaching`).
    handle: Option<R::Handle>,

    /// The handle's event stream. Dropping it unsubscribes.
    events: Option<mpsc::UnboundedReceiver<HandleEvent>>,

    queue: OperationQueue,

    /// Dispatched operations awaiting the adapter's outcome.
    in_flight: InFlight,

    /// Explicit `attach` callers waiting on the in-flight attach.
    attach_waiters: Vec<Reply>,

    /// Triggers that arrived while `Detaching`, replayed on `Detached`.
    deferred: VecDeque<Trigger>,

    /// Triggers awaiting processing; the replay target for `deferred`.
    inbox: VecDeque<Trigger>,

    /// Incremented on every entry into `Attaching`.
    generation: u64,

    subscriptions: SubscriptionTracker,

    cmd_rx: mpsc::UnboundedReceiver<LinkCmd>,
    done_tx: mpsc::UnboundedSender<AttachDone<R::Handle>>,
    done_rx: mpsc::UnboundedReceiver<AttachDone<R::Handle>>,
    state_tx: watch::Sender<LinkState>,
    error_tx: broadcast::Sender<LinkError>,
}

// ---

impl<R: Role> LinkActor<R> {
    // ---
    /// Build an actor and the facade handle that talks to it, without
    /// starting the actor.
    fn new(
        address: String,
        options: LinkOptions,
        client: Arc<R::Client>,
        config: &LinkConfig,
    ) -> (Self, LinkRef) {
        // ---
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Detached);
        let (error_tx, _) = broadcast::channel(config.error_capacity.max(1));

        let link = LinkRef::new(address.clone(), cmd_tx, state_rx, error_tx.clone());
        let actor = Self {
            address,
            options,
            client,
            state: LinkState::Detached,
            handle: None,
            events: None,
            queue: OperationQueue::new(),
            in_flight: InFlight::new(),
            attach_waiters: Vec::new(),
            deferred: VecDeque::new(),
            inbox: VecDeque::new(),
            generation: 0,
            subscriptions: SubscriptionTracker::new(),
            cmd_rx,
            done_tx,
            done_rx,
            state_tx,
            error_tx,
        };

        (actor, link)
    }

    // ---

    /// Start the actor on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub(crate) fn spawn(
        address: String,
        options: LinkOptions,
        client: Arc<R::Client>,
        config: &LinkConfig,
    ) -> LinkRef {
        // ---
        let (actor, link) = Self::new(address, options, client, config);
        tokio::spawn(actor.run());
        link
    }

    // ---

    async fn run(mut self) {
        // ---
        tracing::debug!(address = %self.address, flavor = R::FLAVOR, "link actor started");

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
                Some(done) = self.done_rx.recv() => self.on_attach_done(done),
                (id, result) = self.in_flight.next_done() => self.in_flight.finish(id, result),
                event = next_event(&mut self.events) => self.on_handle_event(event),
            }
        }

        self.shutdown();
    }

    // ---

    fn on_command(&mut self, cmd: LinkCmd) {
        // ---
        match cmd {
            LinkCmd::Attach(reply) => self.submit(Trigger::Attach(reply)),
            LinkCmd::Detach => self.submit(Trigger::Detach),
            LinkCmd::Operation(op) => self.submit(Trigger::Operation(op)),
            LinkCmd::Subscribe { id, tx } => {
                if self.subscriptions.add(id, tx) == Some(Edge::First) {
                    tracing::debug!(address = %self.address, "first subscriber, attaching");
                    self.submit(Trigger::Attach(None));
                }
            }
            LinkCmd::Unsubscribe(id) => {
                if self.subscriptions.remove(id) == Some(Edge::Last) {
                    tracing::debug!(address = %self.address, "last subscriber gone, detaching");
                    self.submit(Trigger::Detach);
                }
            }
        }
    }

    // ---

    fn on_handle_event(&mut self, event: Option<HandleEvent>) {
        // ---
        match event {
            Some(HandleEvent::Message(message)) => self.subscriptions.fan_out(&message),
            Some(HandleEvent::Detached { error }) => {
                tracing::info!(address = %self.address, ?error, "link detached by peer");
                self.submit(Trigger::HandleLost(error.map(Failure::escalated)));
            }
            Some(HandleEvent::Error(error)) => {
                self.submit(Trigger::HandleLost(Some(Failure::escalated(error))));
            }
            None => {
                tracing::warn!(address = %self.address, "handle event stream ended");
                self.events = None;
                self.submit(Trigger::HandleLost(None));
            }
        }
    }

    // ---

    fn on_attach_done(&mut self, done: AttachDone<R::Handle>) {
        // ---
        if done.generation != self.generation || self.state != LinkState::Attaching {
            tracing::warn!(
                address = %self.address,
                generation = done.generation,
                current = self.generation,
                state = ?self.state,
                "ignoring stale attach completion",
            );
            if let Ok(handle) = done.result {
                handle.force_close();
            }
            return;
        }

        match done.result {
            Ok(handle) => {
                tracing::info!(address = %self.address, flavor = R::FLAVOR, "link attached");
                self.events = Some(handle.subscribe());
                self.handle = Some(handle);
                self.transition(LinkState::Attached, None);
                for waiter in self.attach_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(error) => {
                tracing::info!(address = %self.address, %error, "attach failed");
                let waited_on = self.attach_waiters.iter().any(|w| !w.is_closed());
                let failure = Failure {
                    error,
                    escalate: !waited_on,
                };
                self.transition(LinkState::Detached, Some(failure));
            }
        }

        self.drain_inbox();
    }

    // ---

    fn submit(&mut self, trigger: Trigger) {
        // ---
        self.inbox.push_back(trigger);
        self.drain_inbox();
    }

    // ---

    fn drain_inbox(&mut self) {
        // ---
        while let Some(trigger) = self.inbox.pop_front() {
            self.step(trigger);
        }
    }

    // ---

    /// The transition table. Every (state, trigger) pair is spelled out.
    fn step(&mut self, trigger: Trigger) {
        // ---
        use LinkState::{Attached, Attaching, Detached, Detaching};

        match (self.state, trigger) {
            (Detaching, trigger) => {
                tracing::debug!(address = %self.address, ?trigger, "deferring until detached");
                self.deferred.push_back(trigger);
            }

            (Detached, Trigger::Attach(reply)) => {
                self.attach_waiters.extend(reply);
                self.transition(Attaching, None);
            }
            (Detached, Trigger::Detach) => {}
            (Detached, Trigger::Operation(op)) => {
                self.queue.enqueue(op);
                self.transition(Attaching, None);
            }

            (Attaching, Trigger::Attach(reply)) => self.attach_waiters.extend(reply),
            (Attaching, Trigger::Detach) => self.transition(Detaching, None),
            (Attaching, Trigger::Operation(op)) => self.queue.enqueue(op),

            (Attached, Trigger::Attach(reply)) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            (Attached, Trigger::Detach) => self.transition(Detaching, None),
            (Attached, Trigger::Operation(op)) => self.dispatch(op),
            (Attached, Trigger::HandleLost(failure)) => self.transition(Detaching, failure),

            // Handle events are only polled while a handle is held.
            (Detached | Attaching, Trigger::HandleLost(_)) => {
                tracing::error!(
                    address = %self.address,
                    state = ?self.state,
                    "handle event without a live handle",
                );
            }
        }
    }

    // ---

    fn transition(&mut self, to: LinkState, failure: Option<Failure>) {
        // ---
        tracing::debug!(address = %self.address, from = ?self.state, ?to, "link state transition");
        self.state = to;
        self.state_tx.send_replace(to);

        match to {
            LinkState::Detached => self.enter_detached(failure),
            LinkState::Attaching => self.enter_attaching(),
            LinkState::Attached => self.enter_attached(),
            LinkState::Detaching => {
                self.release_handle();
                self.transition(LinkState::Detached, failure);
            }
        }
    }

    // ---

    fn enter_detached(&mut self, failure: Option<Failure>) {
        // ---
        let error = failure
            .as_ref()
            .map_or(LinkError::Detached, |f| f.error.clone());

        if !self.in_flight.is_empty() || !self.queue.is_empty() {
            tracing::debug!(
                address = %self.address,
                in_flight = self.in_flight.len(),
                queued = self.queue.len(),
                %error,
                "failing pending operations",
            );
        }
        // In-flight first: they were issued before anything still queued.
        self.in_flight.fail_all(&error);
        self.queue.drain_with_error(&error);
        for waiter in self.attach_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }

        if let Some(Failure {
            error,
            escalate: true,
        }) = failure
        {
            self.escalate(error);
        }

        // Replay ahead of anything queued since, preserving arrival order.
        while let Some(trigger) = self.deferred.pop_back() {
            self.inbox.push_front(trigger);
        }
    }

    // ---

    fn enter_attaching(&mut self) {
        // ---
        self.generation += 1;
        let generation = self.generation;

        tracing::info!(address = %self.address, flavor = R::FLAVOR, generation, "attaching");

        let client = Arc::clone(&self.client);
        let address = self.address.clone();
        let options = self.options.clone();
        let done_tx = self.done_tx.clone();

        // Subscribe before creating so an error raised mid-negotiation is seen.
        let mut conn_errors = client.connection_errors();

        tokio::spawn(async move {
            // ---
            let created = R::create(&client, &address, &options).await;
            let result = match (created, take_connection_error(&mut conn_errors)) {
                (Ok(handle), Some(error)) => {
                    tracing::warn!(%address, %error, "connection failed while attaching");
                    handle.force_close();
                    Err(error)
                }
                (created, _) => created,
            };

            // Actor gone: nobody will ever own this handle.
            if let Err(mpsc::error::SendError(done)) = done_tx.send(AttachDone { generation, result })
            {
                if let Ok(handle) = done.result {
                    handle.force_close();
                }
            }
        });
    }

    // ---

    fn enter_attached(&mut self) {
        // ---
        let Some(handle) = self.handle.as_ref() else {
            debug_assert!(self.handle.is_some(), "attached without a handle");
            return;
        };
        let in_flight = &mut self.in_flight;
        self.queue.flush(|op| Self::dispatch_on(handle, op, in_flight));
    }

    // ---

    fn dispatch(&mut self, op: Operation) {
        // ---
        match self.handle.as_ref() {
            Some(handle) => Self::dispatch_on(handle, op, &mut self.in_flight),
            None => {
                debug_assert!(self.handle.is_some(), "dispatch without a handle");
                op.resolve(Err(LinkError::Detached));
            }
        }
    }

    // ---

    /// Start `op` on `handle` and track it until the adapter finishes or
    /// the link goes down.
    ///
    /// An associated function so `enter_attached` can call it while the
    /// queue is mutably borrowed.
    fn dispatch_on(handle: &R::Handle, op: Operation, in_flight: &mut InFlight) {
        // ---
        let kind = op.kind();
        let (payload, reply) = op.into_parts();
        in_flight.start(kind, reply, R::dispatch(handle, payload));
    }

    // ---

    fn release_handle(&mut self) {
        // ---
        self.events = None;
        if let Some(handle) = self.handle.take() {
            tracing::info!(address = %self.address, "releasing link");
            handle.force_close();
        }
    }

    // ---

    fn escalate(&self, error: LinkError) {
        // ---
        tracing::warn!(address = %self.address, %error, "link error");
        // No observers is fine; the error is already logged.
        let _ = self.error_tx.send(error);
    }

    // ---

    /// Facade dropped: release everything and fail what is left.
    fn shutdown(&mut self) {
        // ---
        tracing::debug!(address = %self.address, "link facade dropped, shutting down");

        if self.state != LinkState::Detached {
            let failure = Failure {
                error: LinkError::Closed,
                escalate: false,
            };
            self.transition(LinkState::Detaching, Some(failure));
        }

        for trigger in self.inbox.drain(..) {
            trigger.fail(&LinkError::Closed);
        }

        // An attach still in flight finds the channel closed and releases
        // its own handle; one that already reported is released here.
        self.done_rx.close();
        while let Ok(done) = self.done_rx.try_recv() {
            if let Ok(handle) = done.result {
                handle.force_close();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Next event from the live handle; pends forever while there is none.
async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<HandleEvent>>,
) -> Option<HandleEvent> {
    // ---
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ---

/// First connection error raised since `rx` subscribed, if any.
fn take_connection_error(rx: &mut broadcast::Receiver<LinkError>) -> Option<LinkError> {
    // ---
    loop {
        match rx.try_recv() {
            Ok(error) => return Some(error),
            // Overflowed: errors did happen, read the oldest one still held.
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
