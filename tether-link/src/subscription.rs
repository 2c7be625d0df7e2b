use tokio::sync::mpsc;

// ---

use tether_domain::Message;

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A change in subscriber count that drives the link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Edge {
    // ---
    /// 0 → 1: someone wants messages; attach.
    First,

    /// 1 → 0: nobody wants messages; detach.
    Last,
}

// ---------------------------------------------------------------------------
// SubscriptionTracker
// ---------------------------------------------------------------------------

/// Registry of active `message` subscribers on a receiving link.
///
/// Owned by the link actor. Subscribers are added and removed only through
/// explicit commands from the facade, never by probing channel liveness,
/// so the count is exact.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTracker {
    // ---
    subscribers: Vec<(u64, mpsc::UnboundedSender<Message>)>,
}

// ---

impl SubscriptionTracker {
    // ---
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // ---

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    // ---

    /// Register a subscriber. Returns [`Edge::First`] on 0 → 1.
    pub(crate) fn add(&mut self, id: u64, tx: mpsc::UnboundedSender<Message>) -> Option<Edge> {
        // ---
        let was_empty = self.subscribers.is_empty();
        self.subscribers.push((id, tx));
        was_empty.then_some(Edge::First)
    }

    // ---

    /// Remove a subscriber. Returns [`Edge::Last`] on 1 → 0.
    ///
    /// Unknown ids are ignored and never produce an edge.
    pub(crate) fn remove(&mut self, id: u64) -> Option<Edge> {
        // ---
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        let removed = self.subscribers.len() < before;
        (removed && self.subscribers.is_empty()).then_some(Edge::Last)
    }

    // ---

    /// Deliver a copy of `message` to every subscriber.
    pub(crate) fn fan_out(&self, message: &Message) {
        // ---
        for (_, tx) in &self.subscribers {
            // A receiver dropped ahead of its Unsubscribe command is harmless.
            let _ = tx.send(message.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use tokio::sync::mpsc;

    use tether_domain::Message;

    use super::{Edge, SubscriptionTracker};

    #[test]
    fn edges_fire_only_on_zero_crossings() {
        // ---
        let mut tracker = SubscriptionTracker::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        assert_eq!(tracker.add(1, tx1), Some(Edge::First));
        assert_eq!(tracker.add(2, tx2), None);
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.remove(1), None);
        assert_eq!(tracker.remove(1), None, "double remove is ignored");
        assert_eq!(tracker.remove(2), Some(Edge::Last));
        assert_eq!(tracker.remove(2), None);
    }

    // ---

    #[test]
    fn fan_out_reaches_every_subscriber() {
        // ---
        let mut tracker = SubscriptionTracker::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        tracker.add(1, tx1);
        tracker.add(2, tx2);

        let msg = Message::new("payload");
        tracker.fan_out(&msg);

        assert_eq!(rx1.try_recv().ok(), Some(msg.clone()));
        assert_eq!(rx2.try_recv().ok(), Some(msg));
    }

    // ---

    #[test]
    fn removed_subscriber_gets_nothing_more() {
        // ---
        let mut tracker = SubscriptionTracker::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        tracker.add(1, tx1);
        tracker.remove(1);

        tracker.fan_out(&Message::new("late"));
        assert!(rx1.try_recv().is_err());
    }
}
