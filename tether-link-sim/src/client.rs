use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// ---

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, oneshot};

// ---

use tether_domain::{LinkClient, LinkError, LinkOptions, Result};

// ---

use super::handle::lock;
use super::{LinkSimConfig, LinkSimHandle};

// ---------------------------------------------------------------------------
// AttachGate
// ---------------------------------------------------------------------------

/// What a gated `create_*` call does once the test lets it proceed.
#[derive(Debug)]
enum GateDecision {
    // ---
    Release,
    Fail(LinkError),
    ReleaseAfterConnectionError(LinkError),
}

// ---

/// Holds one `create_*` call in flight until the test decides its outcome.
///
/// Obtained from [`LinkSimClient::gate_next_attach`]. Dropping the gate
/// without deciding releases the attach.
pub struct AttachGate {
    // ---
    tx: oneshot::Sender<GateDecision>,
}

// ---

impl AttachGate {
    // ---
    /// Let the held attach succeed.
    pub fn release(self) {
        let _ = self.tx.send(GateDecision::Release);
    }

    // ---

    /// Make the held attach fail with `err`.
    pub fn fail(self, err: LinkError) {
        let _ = self.tx.send(GateDecision::Fail(err));
    }

    // ---

    /// Raise `err` on the connection, then let the held attach "succeed".
    ///
    /// Models a connection failing while the link is being negotiated.
    pub fn release_after_connection_error(self, err: LinkError) {
        let _ = self.tx.send(GateDecision::ReleaseAfterConnectionError(err));
    }
}

// ---------------------------------------------------------------------------
// LinkSimClient
// ---------------------------------------------------------------------------

/// A created-link request as the adapter saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCall {
    // ---
    pub address: String,
    pub options: LinkOptions,
}

// ---

/// In-process adapter client. Does not touch the network.
///
/// Cheap to clone; clones share all recorded state, so a test keeps one
/// clone for inspection and hands another (in an `Arc`) to the link.
#[derive(Clone)]
pub struct LinkSimClient {
    // ---
    inner: Arc<ClientInner>,
}

// ---

struct ClientInner {
    // ---
    config: LinkSimConfig,
    rng: Arc<Mutex<SmallRng>>,
    calls: Mutex<Vec<CreateCall>>,
    handles: Mutex<Vec<LinkSimHandle>>,
    gates: Mutex<VecDeque<oneshot::Receiver<GateDecision>>>,
    scripted_failures: Mutex<VecDeque<LinkError>>,
    conn_err_tx: broadcast::Sender<LinkError>,
}

// ---

impl LinkSimClient {
    // ---
    pub fn new(config: LinkSimConfig) -> Self {
        // ---
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let (conn_err_tx, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(ClientInner {
                config,
                rng: Arc::new(Mutex::new(rng)),
                calls: Mutex::new(Vec::new()),
                handles: Mutex::new(Vec::new()),
                gates: Mutex::new(VecDeque::new()),
                scripted_failures: Mutex::new(VecDeque::new()),
                conn_err_tx,
            }),
        }
    }

    // ---

    /// Every `create_*` call received so far, in order.
    pub fn create_calls(&self) -> Vec<CreateCall> {
        lock(&self.inner.calls).clone()
    }

    // ---

    /// Every handle created so far, in order.
    pub fn handles(&self) -> Vec<LinkSimHandle> {
        lock(&self.inner.handles).clone()
    }

    // ---

    /// The most recently created handle.
    pub fn last_handle(&self) -> Option<LinkSimHandle> {
        lock(&self.inner.handles).last().cloned()
    }

    // ---

    /// Hold the next `create_*` call until the returned gate is decided.
    pub fn gate_next_attach(&self) -> AttachGate {
        // ---
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.gates).push_back(rx);
        AttachGate { tx }
    }

    // ---

    /// Make the next `create_*` call fail with `err`.
    pub fn fail_next_attach(&self, err: LinkError) {
        lock(&self.inner.scripted_failures).push_back(err);
    }

    // ---

    /// Raise a connection-level error to every current subscriber.
    pub fn emit_connection_error(&self, err: LinkError) {
        let _ = self.inner.conn_err_tx.send(err);
    }

    // ---

    async fn create(&self, address: &str, options: &LinkOptions) -> Result<LinkSimHandle> {
        // ---
        lock(&self.inner.calls).push(CreateCall {
            address: address.to_string(),
            options: options.clone(),
        });

        let gate = lock(&self.inner.gates).pop_front();
        if let Some(gate) = gate {
            match gate.await.unwrap_or(GateDecision::Release) {
                GateDecision::Release => {}
                GateDecision::Fail(err) => return Err(err),
                GateDecision::ReleaseAfterConnectionError(err) => {
                    self.emit_connection_error(err);
                }
            }
        }

        if !self.inner.config.attach_delay.is_zero() {
            tokio::time::sleep(self.inner.config.attach_delay).await;
        }

        let scripted = lock(&self.inner.scripted_failures).pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        if let Some(reason) = &self.inner.config.attach_failure {
            return Err(LinkError::Attach(reason.clone()));
        }

        let handle = LinkSimHandle::new(
            address,
            Arc::clone(&self.inner.rng),
            self.inner.config.op_failure_rate,
        );
        lock(&self.inner.handles).push(handle.clone());
        tracing::debug!(%address, "sim link created");

        Ok(handle)
    }
}

// ---

#[async_trait]
impl LinkClient for LinkSimClient {
    // ---
    type Receiver = LinkSimHandle;
    type Sender = LinkSimHandle;

    async fn create_receiver(
        &self,
        address: &str,
        options: &LinkOptions,
    ) -> Result<Self::Receiver> {
        self.create(address, options).await
    }

    async fn create_sender(&self, address: &str, options: &LinkOptions) -> Result<Self::Sender> {
        self.create(address, options).await
    }

    fn connection_errors(&self) -> broadcast::Receiver<LinkError> {
        self.inner.conn_err_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use tether_domain::{LinkClient, LinkError, LinkOptions};

    use super::LinkSimClient;
    use crate::LinkSimConfig;

    #[tokio::test]
    async fn records_calls_and_handles() {
        // ---
        let client = LinkSimClient::new(LinkSimConfig::perfect());
        let opts = LinkOptions::new().with("credit", "10");

        client.create_receiver("queue/a", &opts).await.expect("create");
        let calls = client.create_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].address, "queue/a");
        assert_eq!(calls[0].options, opts);
        assert_eq!(client.last_handle().map(|h| h.address().to_string()), Some("queue/a".into()));
    }

    // ---

    #[tokio::test]
    async fn unreachable_preset_fails_every_attach() {
        // ---
        let client = LinkSimClient::new(LinkSimConfig::unreachable());
        let result = client.create_sender("queue/a", &LinkOptions::new()).await;
        assert!(matches!(result, Err(LinkError::Attach(_))));
        assert!(client.handles().is_empty());
    }

    // ---

    #[tokio::test]
    async fn gate_holds_attach_until_decided() {
        // ---
        let client = LinkSimClient::new(LinkSimConfig::perfect());
        let gate = client.gate_next_attach();

        let task_client = client.clone();
        let pending = tokio::spawn(async move {
            task_client.create_receiver("queue/a", &LinkOptions::new()).await
        });

        tokio::task::yield_now().await;
        assert!(client.handles().is_empty(), "attach must still be held");

        let err = LinkError::Attach("held then failed".into());
        gate.fail(err.clone());
        let result = pending.await.expect("task");
        assert_eq!(result.err(), Some(err));
    }

    // ---

    #[tokio::test]
    async fn connection_error_is_raised_before_release() {
        // ---
        let client = LinkSimClient::new(LinkSimConfig::perfect());
        let mut conn_errs = client.connection_errors();
        let gate = client.gate_next_attach();
        let err = LinkError::Connection("socket reset".into());
        gate.release_after_connection_error(err.clone());

        client.create_receiver("queue/a", &LinkOptions::new()).await.expect("create");
        assert_eq!(conn_errs.try_recv().ok(), Some(err));
    }
}
