use std::collections::HashMap;

// ---

use uuid::Uuid;

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Transport-level token identifying one received message.
///
/// Minted by the adapter when a message arrives on a receiving link and
/// handed back to the adapter on settlement. The link never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delivery {
    // ---
    tag: Uuid,
}

// ---

impl Delivery {
    // ---
    pub fn new() -> Self {
        Self { tag: Uuid::new_v4() }
    }

    // ---

    pub fn tag(&self) -> Uuid {
        self.tag
    }
}

// ---

impl Default for Delivery {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An application message travelling over a link.
///
/// Messages built locally for sending carry no [`Delivery`]. Messages
/// received over a link carry the adapter's delivery token, which is what
/// `accept` / `reject` / `abandon` settle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    // ---
    /// Opaque payload. Encoding is the application's concern.
    pub body: Vec<u8>,

    /// Application properties, forwarded verbatim.
    pub properties: HashMap<String, String>,

    delivery: Option<Delivery>,
}

// ---

impl Message {
    // ---
    /// Outbound message with the given body and no properties.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        // ---
        Self {
            body: body.into(),
            properties: HashMap::new(),
            delivery: None,
        }
    }

    // ---

    /// Attach a property. Builder style.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        // ---
        self.properties.insert(key.into(), value.into());
        self
    }

    // ---

    /// Stamp a received message with its delivery token. Adapter use only.
    pub fn received(mut self, delivery: Delivery) -> Self {
        // ---
        self.delivery = Some(delivery);
        self
    }

    // ---

    /// The delivery token, present only on messages received over a link.
    pub fn delivery(&self) -> Option<Delivery> {
        self.delivery
    }
}

// ---------------------------------------------------------------------------
// LinkOptions
// ---------------------------------------------------------------------------

/// Protocol-specific attach parameters.
///
/// Opaque to the link: forwarded verbatim to the adapter on every attach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOptions {
    // ---
    pub attrs: HashMap<String, String>,
}

// ---

impl LinkOptions {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    // ---

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        // ---
        self.attrs.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Disposition
// ---------------------------------------------------------------------------

/// How a receiver settles a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    // ---
    /// Processed successfully.
    Accept,

    /// Permanent failure; do not redeliver.
    Reject,

    /// Give the message back for redelivery elsewhere.
    Abandon,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Success result of `accept` / `complete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCompleted;

/// Success result of `reject`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageRejected;

/// Success result of `abandon`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageAbandoned;

/// Success result of `send`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageEnqueued;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::{Delivery, Message};

    #[test]
    fn local_message_has_no_delivery() {
        // ---
        let msg = Message::new("hello").with_property("k", "v");
        assert!(msg.delivery().is_none());
        assert_eq!(msg.properties.get("k").map(String::as_str), Some("v"));
    }

    // ---

    #[test]
    fn received_message_carries_its_delivery() {
        // ---
        let delivery = Delivery::new();
        let msg = Message::new(vec![1, 2, 3]).received(delivery);
        assert_eq!(msg.delivery(), Some(delivery));
        assert_ne!(Delivery::new(), delivery, "tags must be unique");
    }
}
