use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// ---

use rand::rngs::SmallRng;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};

// ---

use tether_domain::{
    // ---
    Delivery,
    Disposition,
    HandleEvent,
    LinkError,
    LinkHandle,
    Message,
    OpFuture,
    ReceiverHandle,
    SenderHandle,
};

// ---------------------------------------------------------------------------
// SimOp
// ---------------------------------------------------------------------------

/// One operation as it reached the simulated wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOp {
    // ---
    Settle(Disposition, Delivery),
    Send(Message),
}

// ---------------------------------------------------------------------------
// OpGate
// ---------------------------------------------------------------------------

/// Holds one operation on the simulated wire until the test decides its
/// outcome.
///
/// Obtained from [`LinkSimHandle::gate_next_op`]. The operation is recorded
/// as soon as it is issued; only its completion waits. Dropping the gate
/// without deciding leaves the operation pending forever, modelling an
/// adapter that never answers.
pub struct OpGate {
    // ---
    tx: oneshot::Sender<Result<(), LinkError>>,
}

// ---

impl OpGate {
    // ---
    /// Let the held operation succeed.
    pub fn release(self) {
        let _ = self.tx.send(Ok(()));
    }

    // ---

    /// Make the held operation fail with `err`.
    pub fn fail(self, err: LinkError) {
        let _ = self.tx.send(Err(err));
    }
}

// ---------------------------------------------------------------------------
// LinkSimHandle
// ---------------------------------------------------------------------------

/// Simulated live link. Cheap to clone; clones share state.
///
/// The link under test holds one clone, the test holds another and uses it
/// to inject events (`emit_*`, `deliver`) and inspect what reached the
/// wire (`operations`, `force_close_count`, `subscriber_count`).
#[derive(Clone)]
pub struct LinkSimHandle {
    // ---
    inner: Arc<HandleInner>,
}

// ---

struct HandleInner {
    // ---
    address: String,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<HandleEvent>>>,
    ops: Mutex<Vec<SimOp>>,
    /// Held operations, consumed one per operation ahead of everything else.
    gates: Mutex<VecDeque<oneshot::Receiver<Result<(), LinkError>>>>,
    /// Scripted failures, consumed one per operation before the RNG is rolled.
    scripted: Mutex<VecDeque<LinkError>>,
    rng: Arc<Mutex<SmallRng>>,
    op_failure_rate: f64,
    force_closes: AtomicUsize,
    closed: AtomicBool,
}

// ---

impl LinkSimHandle {
    // ---
    pub(crate) fn new(address: &str, rng: Arc<Mutex<SmallRng>>, op_failure_rate: f64) -> Self {
        // ---
        Self {
            inner: Arc::new(HandleInner {
                address: address.to_string(),
                subscribers: Mutex::new(Vec::new()),
                ops: Mutex::new(Vec::new()),
                gates: Mutex::new(VecDeque::new()),
                scripted: Mutex::new(VecDeque::new()),
                rng,
                op_failure_rate: op_failure_rate.clamp(0.0, 1.0),
                force_closes: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    // ---

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    // ---

    /// Every operation that reached this handle, in arrival order.
    pub fn operations(&self) -> Vec<SimOp> {
        lock(&self.inner.ops).clone()
    }

    // ---

    /// How many times `force_close` was called.
    pub fn force_close_count(&self) -> usize {
        self.inner.force_closes.load(Ordering::SeqCst)
    }

    // ---

    /// Number of event subscribers whose receiver is still alive.
    pub fn subscriber_count(&self) -> usize {
        // ---
        let mut subs = lock(&self.inner.subscribers);
        subs.retain(|tx| !tx.is_closed());
        subs.len()
    }

    // ---

    /// Make the next operation fail with `err`, regardless of the RNG.
    pub fn fail_next_op(&self, err: LinkError) {
        lock(&self.inner.scripted).push_back(err);
    }

    // ---

    /// Hold the next operation until the returned gate is decided.
    pub fn gate_next_op(&self) -> OpGate {
        // ---
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.gates).push_back(rx);
        OpGate { tx }
    }

    // ---

    /// Simulate the peer detaching the link.
    pub fn emit_detached(&self, error: Option<LinkError>) {
        self.emit(HandleEvent::Detached { error });
    }

    // ---

    /// Simulate the link reporting an error.
    pub fn emit_error(&self, err: LinkError) {
        self.emit(HandleEvent::Error(err));
    }

    // ---

    /// Deliver `message` to subscribers, stamped with a fresh [`Delivery`].
    ///
    /// Returns the stamped message so tests can compare what arrives.
    pub fn deliver(&self, message: Message) -> Message {
        // ---
        let received = message.received(Delivery::new());
        self.emit(HandleEvent::Message(received.clone()));
        received
    }

    // ---

    fn emit(&self, event: HandleEvent) {
        // ---
        let mut subs = lock(&self.inner.subscribers);
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ---

    /// Record `op` and decide its outcome.
    fn perform(&self, op: SimOp) -> OpFuture {
        // ---
        if self.inner.closed.load(Ordering::SeqCst) {
            return Box::pin(std::future::ready(Err(LinkError::Transport(
                "link force-closed".into(),
            ))));
        }

        lock(&self.inner.ops).push(op);

        let gate = lock(&self.inner.gates).pop_front();
        if let Some(gate) = gate {
            return Box::pin(async move {
                match gate.await {
                    Ok(result) => result,
                    Err(_) => std::future::pending().await,
                }
            });
        }

        let scripted = lock(&self.inner.scripted).pop_front();
        let result = match scripted {
            Some(err) => Err(err),
            None => {
                let p = self.inner.op_failure_rate;
                let roll_fails = p > 0.0 && lock(&self.inner.rng).gen_bool(p);
                if roll_fails {
                    Err(LinkError::Operation("simulated rejection".into()))
                } else {
                    Ok(())
                }
            }
        };

        Box::pin(std::future::ready(result))
    }
}

// ---

impl LinkHandle for LinkSimHandle {
    // ---
    fn subscribe(&self) -> mpsc::UnboundedReceiver<HandleEvent> {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    // ---

    fn force_close(&self) {
        // ---
        self.inner.force_closes.fetch_add(1, Ordering::SeqCst);
        self.inner.closed.store(true, Ordering::SeqCst);
        tracing::debug!(address = %self.inner.address, "sim handle force-closed");
    }
}

// ---

impl ReceiverHandle for LinkSimHandle {
    // ---
    fn settle(&self, disposition: Disposition, delivery: Delivery) -> OpFuture {
        self.perform(SimOp::Settle(disposition, delivery))
    }
}

// ---

impl SenderHandle for LinkSimHandle {
    // ---
    fn send(&self, message: Message) -> OpFuture {
        self.perform(SimOp::Send(message))
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Lock ignoring poison; a panicking test thread must not cascade.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::{Arc, Mutex};

    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use tether_domain::{
        Disposition, HandleEvent, LinkError, LinkHandle, Message, ReceiverHandle, SenderHandle,
    };

    use super::{LinkSimHandle, SimOp};

    fn handle(op_failure_rate: f64) -> LinkSimHandle {
        let rng = Arc::new(Mutex::new(SmallRng::seed_from_u64(7)));
        LinkSimHandle::new("queue/a", rng, op_failure_rate)
    }

    // ---

    #[tokio::test]
    async fn records_operations_in_call_order() {
        // ---
        let h = handle(0.0);
        let first = h.send(Message::new("one"));
        let second = h.send(Message::new("two"));

        // Order is fixed at call time, before either future is polled.
        second.await.expect("second send");
        first.await.expect("first send");

        assert_eq!(
            h.operations(),
            vec![
                SimOp::Send(Message::new("one")),
                SimOp::Send(Message::new("two")),
            ]
        );
    }

    // ---

    #[tokio::test]
    async fn scripted_failure_hits_exactly_one_op() {
        // ---
        let h = handle(0.0);
        let err = LinkError::Operation("nope".into());
        h.fail_next_op(err.clone());

        let delivery = Message::new("x").received(Default::default());
        let d = delivery.delivery().expect("stamped");
        assert_eq!(h.settle(Disposition::Reject, d).await, Err(err));
        assert_eq!(h.settle(Disposition::Accept, d).await, Ok(()));
    }

    // ---

    #[tokio::test]
    async fn certain_failure_rate_rejects_everything() {
        // ---
        let h = handle(1.0);
        let result = h.send(Message::new("x")).await;
        assert!(matches!(result, Err(LinkError::Operation(_))));
    }

    // ---

    #[tokio::test]
    async fn force_close_fails_later_ops_without_recording_them() {
        // ---
        let h = handle(0.0);
        h.force_close();
        let result = h.send(Message::new("late")).await;
        assert!(matches!(result, Err(LinkError::Transport(_))));
        assert!(h.operations().is_empty());
        assert_eq!(h.force_close_count(), 1);
    }

    // ---

    #[tokio::test]
    async fn dropped_subscribers_are_not_counted() {
        // ---
        let h = handle(0.0);
        let mut kept = h.subscribe();
        let dropped = h.subscribe();
        drop(dropped);
        assert_eq!(h.subscriber_count(), 1);

        let sent = h.deliver(Message::new("m"));
        assert_eq!(kept.recv().await, Some(HandleEvent::Message(sent)));
    }

    // ---

    #[tokio::test]
    async fn gated_op_is_recorded_at_once_and_waits_for_the_gate() {
        // ---
        let h = handle(0.0);
        let gate = h.gate_next_op();
        let held = h.send(Message::new("held"));
        assert_eq!(h.operations(), vec![SimOp::Send(Message::new("held"))]);

        // The gate only applies to one operation.
        h.send(Message::new("free")).await.expect("ungated send");

        let err = LinkError::Operation("peer said no".into());
        gate.fail(err.clone());
        assert_eq!(held.await, Err(err));
    }

    // ---

    #[tokio::test]
    async fn dropped_gate_never_completes() {
        // ---
        let h = handle(0.0);
        let gate = h.gate_next_op();
        let held = h.send(Message::new("stuck"));
        drop(gate);

        let waited = tokio::time::timeout(std::time::Duration::from_millis(50), held).await;
        assert!(waited.is_err(), "operation must stay pending");
    }
}
