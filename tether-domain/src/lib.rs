//! Core types and adapter traits for tether links.
//!
//! This crate defines the vocabulary of the system. All other crates depend
//! on `tether-domain` and speak its types. No implementations live here.
//!
//! # Structure
//!
//! - [`error`]     — [`LinkError`] and [`Result<T>`] alias
//! - [`message`]   — [`Message`], [`Delivery`], [`LinkOptions`], settlement results
//! - [`transport`] — [`LinkState`] and the adapter traits ([`LinkClient`],
//!   [`LinkHandle`], [`ReceiverHandle`], [`SenderHandle`])

mod error;
mod message;
mod transport;

// --- error
pub use error::{LinkError, Result};

// --- message
pub use message::{
    // ---
    Delivery,
    Disposition,
    LinkOptions,
    Message,
    MessageAbandoned,
    MessageCompleted,
    MessageEnqueued,
    MessageRejected,
};

// --- transport
pub use transport::{
    // ---
    HandleEvent,
    LinkClient,
    LinkHandle,
    LinkState,
    OpFuture,
    ReceiverHandle,
    SenderHandle,
};
