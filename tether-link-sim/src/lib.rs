//! In-process adapter for tether unit and integration testing.
//!
//! [`LinkSimClient`] implements [`tether_domain::LinkClient`] using tokio
//! channels instead of a real protocol engine. [`LinkSimConfig`] controls
//! injected impairments:
//!
//! - Attach delay and attach failure
//! - Operation rejection probability
//! - Deterministic RNG seed for reproducible runs
//!
//! Tests additionally script individual outcomes: hold an attach open with
//! [`LinkSimClient::gate_next_attach`], hold an operation open with
//! [`LinkSimHandle::gate_next_op`], raise connection errors, and drive
//! handle events through [`LinkSimHandle`].
//!
//! # Quick start
//!
//! ```rust
//! use tether_link_sim::{LinkSimClient, LinkSimConfig};
//!
//! let client = LinkSimClient::new(LinkSimConfig::flaky());
//! assert!(client.create_calls().is_empty());
//! ```

mod client;
mod config;
mod handle;

// --- public API
pub use client::{AttachGate, CreateCall, LinkSimClient};
pub use config::LinkSimConfig;
pub use handle::{LinkSimHandle, OpGate, SimOp};
