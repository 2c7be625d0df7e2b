//! Link lifecycle for tether: attach on demand, buffer while attaching,
//! release cleanly.
//!
//! A [`ReceiverLink`] or [`SenderLink`] wraps one logical link over an
//! adapter ([`tether_domain::LinkClient`]). Callers settle or send without
//! caring whether the underlying link exists yet: the link attaches itself,
//! holds requests in call order until it is attached, and fails them with
//! the cause if the attach does not succeed.
//!
//! # Structure
//!
//! - [`completion`]   — [`Completion`], the future every facade call returns
//! - [`link`]         — the [`Link`] trait, [`LinkConfig`], [`MessageSubscription`]
//! - [`machine`]      — the per-link actor and its transition table
//! - [`queue`]        — operations awaiting attach, and those in flight
//! - [`receiver`]     — [`ReceiverLink`]
//! - [`sender`]       — [`SenderLink`]
//! - [`subscription`] — message subscriber registry
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tether_domain::{LinkOptions, Message};
//! use tether_link::{Link, SenderLink};
//! use tether_link_sim::{LinkSimClient, LinkSimConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let client = Arc::new(LinkSimClient::new(LinkSimConfig::perfect()));
//! let link = SenderLink::new("queue/orders", LinkOptions::new(), client);
//!
//! link.send(Message::new("order #1")).await.expect("sent");
//! link.detach();
//! # }
//! ```

mod completion;
mod link;
mod machine;
mod queue;
mod receiver;
mod sender;
mod subscription;

// --- public API
pub use completion::Completion;
pub use link::{
    // ---
    Link,
    LinkConfig,
    MessageSubscription,
};
pub use receiver::ReceiverLink;
pub use sender::SenderLink;

// --- crate-internal
pub(crate) use machine::LinkCmd;
