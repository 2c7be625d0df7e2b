use std::collections::{BTreeMap, VecDeque};

// ---

use tokio::sync::oneshot;
use tokio::task::JoinSet;

// ---

use tether_domain::{Delivery, Disposition, LinkError, Message, OpFuture, Result};

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Resolver for one caller-visible completion. Consumed on use, so it can
/// fire at most once; dropping it unresolved surfaces as `LinkError::Closed`.
pub(crate) type Reply = oneshot::Sender<Result<()>>;

// ---

/// Which facade call produced an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationKind {
    // ---
    Accept,
    Reject,
    Abandon,
    Send,
}

// ---

/// What the operation acts on.
#[derive(Debug)]
pub(crate) enum Payload {
    // ---
    Settle(Disposition, Delivery),
    Send(Message),
}

// ---

/// A deferred unit of work awaiting an attached link.
#[derive(Debug)]
pub(crate) struct Operation {
    // ---
    pub(crate) payload: Payload,
    reply: Reply,
}

// ---

impl Operation {
    // ---
    pub(crate) fn new(payload: Payload, reply: Reply) -> Self {
        Self { payload, reply }
    }

    // ---

    pub(crate) fn kind(&self) -> OperationKind {
        // ---
        match self.payload {
            Payload::Settle(Disposition::Accept, _) => OperationKind::Accept,
            Payload::Settle(Disposition::Reject, _) => OperationKind::Reject,
            Payload::Settle(Disposition::Abandon, _) => OperationKind::Abandon,
            Payload::Send(_) => OperationKind::Send,
        }
    }

    // ---

    /// Split into the payload for the adapter and the reply for the caller.
    pub(crate) fn into_parts(self) -> (Payload, Reply) {
        (self.payload, self.reply)
    }

    // ---

    /// Resolve the caller's completion. The caller may have stopped
    /// listening; that is not an error.
    pub(crate) fn resolve(self, result: Result<()>) {
        let _ = self.reply.send(result);
    }
}

// ---------------------------------------------------------------------------
// OperationQueue
// ---------------------------------------------------------------------------

/// FIFO of operations accepted while the link is not attached.
///
/// Entries leave only through [`flush`](Self::flush) (front first, each
/// handed to the dispatcher exactly once) or
/// [`drain_with_error`](Self::drain_with_error) (each resolved with the
/// error). Nothing is reordered or dropped.
#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    // ---
    ops: VecDeque<Operation>,
}

// ---

impl OperationQueue {
    // ---
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // ---

    pub(crate) fn enqueue(&mut self, op: Operation) {
        self.ops.push_back(op);
    }

    // ---

    pub(crate) fn len(&self) -> usize {
        self.ops.len()
    }

    // ---

    pub(crate) fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    // ---

    /// Remove every entry front to back and hand each to `dispatch`.
    pub(crate) fn flush<F>(&mut self, mut dispatch: F)
    where
        F: FnMut(Operation),
    {
        // ---
        while let Some(op) = self.ops.pop_front() {
            dispatch(op);
        }
    }

    // ---

    /// Remove every entry, resolving each with a clone of `err`.
    pub(crate) fn drain_with_error(&mut self, err: &LinkError) {
        // ---
        while let Some(op) = self.ops.pop_front() {
            op.resolve(Err(err.clone()));
        }
    }
}

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// Operations handed to the adapter whose outcome is not known yet.
///
/// Each adapter future runs on a task owned by this set, and the caller's
/// reply stays here until [`finish`](Self::finish) or
/// [`fail_all`](Self::fail_all) takes it. An adapter future that never
/// resolves therefore cannot strand a caller: tearing the link down fails
/// the reply and aborts the task. Results for ids no longer held are
/// dropped.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    // ---
    tasks: JoinSet<(u64, Result<()>)>,
    /// Keyed by issue order, so `fail_all` resolves oldest first.
    replies: BTreeMap<u64, (OperationKind, Reply)>,
    next_id: u64,
}

// ---

impl InFlight {
    // ---
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // ---

    pub(crate) fn len(&self) -> usize {
        self.replies.len()
    }

    // ---

    pub(crate) fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    // ---

    /// Track an operation the adapter has already started.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub(crate) fn start(&mut self, kind: OperationKind, reply: Reply, pending: OpFuture) {
        // ---
        let id = self.next_id;
        self.next_id += 1;
        self.replies.insert(id, (kind, reply));
        self.tasks.spawn(async move { (id, pending.await) });
    }

    // ---

    /// Next adapter outcome. Pends forever while nothing is in flight.
    pub(crate) async fn next_done(&mut self) -> (u64, Result<()>) {
        // ---
        loop {
            match self.tasks.join_next().await {
                Some(Ok(done)) => return done,
                // Aborted by `fail_all`; its reply is already resolved.
                Some(Err(_)) => continue,
                None => std::future::pending().await,
            }
        }
    }

    // ---

    /// Resolve operation `id` with the adapter's `result`.
    pub(crate) fn finish(&mut self, id: u64, result: Result<()>) {
        // ---
        let Some((kind, reply)) = self.replies.remove(&id) else {
            return;
        };
        if let Err(error) = &result {
            tracing::debug!(?kind, %error, "operation failed");
        }
        let _ = reply.send(result);
    }

    // ---

    /// Fail every tracked operation with `err` and stop waiting on the
    /// adapter for them.
    pub(crate) fn fail_all(&mut self, err: &LinkError) {
        // ---
        self.tasks.abort_all();
        for (_, (_, reply)) in std::mem::take(&mut self.replies) {
            let _ = reply.send(Err(err.clone()));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
