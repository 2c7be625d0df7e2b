//! Lifecycle scenarios, each run against a fresh in-process adapter.
//!
//! Every scenario returns an error describing the first expectation that
//! did not hold, so `main` can report pass/fail per scenario.

use std::sync::Arc;
use std::time::Duration;

// ---

use anyhow::{bail, ensure, Context};

// ---

use tether_domain::{Delivery, Disposition, LinkError, LinkOptions, LinkState, Message};
use tether_link::{Link, ReceiverLink, SenderLink};
use tether_link_sim::{LinkSimClient, LinkSimConfig, SimOp};

// ---

use super::config::{Config, Scenario};

/// Upper bound on any single wait inside a scenario.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Scenarios run by `--scenario all`, in order.
pub const ALL: [Scenario; 7] = [
    Scenario::Ordering,
    Scenario::AttachFailure,
    Scenario::UnsolicitedDetach,
    Scenario::IdleDetach,
    Scenario::Subscription,
    Scenario::InvalidArgument,
    Scenario::Send,
];

// ---

pub async fn run(scenario: Scenario, cfg: &Config) -> anyhow::Result<()> {
    // ---
    match scenario {
        Scenario::All => bail!("`all` is expanded by the caller"),
        Scenario::Ordering => ordering(cfg).await,
        Scenario::AttachFailure => attach_failure(cfg).await,
        Scenario::UnsolicitedDetach => unsolicited_detach(cfg).await,
        Scenario::IdleDetach => idle_detach(cfg).await,
        Scenario::Subscription => subscription(cfg).await,
        Scenario::InvalidArgument => invalid_argument(cfg).await,
        Scenario::Send => send(cfg).await,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn receiver(cfg: &Config, sim: LinkSimConfig) -> (LinkSimClient, ReceiverLink<LinkSimClient>) {
    // ---
    let client = LinkSimClient::new(sim);
    let link = ReceiverLink::new(&cfg.address, LinkOptions::new(), Arc::new(client.clone()));
    (client, link)
}

// ---

async fn wait_for_state<L: Link>(link: &L, want: LinkState) -> anyhow::Result<()> {
    // ---
    let mut rx = link.state_rx();
    tokio::time::timeout(STEP_TIMEOUT, rx.wait_for(|s| *s == want))
        .await
        .with_context(|| format!("link never reached {want:?}"))?
        .context("link shut down")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Two settlements issued before the slow attach finishes.
async fn ordering(cfg: &Config) -> anyhow::Result<()> {
    // ---
    let (client, link) = receiver(cfg, cfg.reliable_sim_config());

    let d1 = Delivery::new();
    let d2 = Delivery::new();
    let c1 = link.accept(&Message::new("m1").received(d1))?;
    let c2 = link.accept(&Message::new("m2").received(d2))?;
    tracing::info!(state = ?link.state(), "two accepts issued");

    c1.await.context("first accept")?;
    c2.await.context("second accept")?;

    let handle = client.last_handle().context("no handle after attach")?;
    let ops = handle.operations();
    tracing::info!(?ops, "adapter saw");
    ensure!(
        ops == vec![
            SimOp::Settle(Disposition::Accept, d1),
            SimOp::Settle(Disposition::Accept, d2),
        ],
        "settlements reached the adapter out of order: {ops:?}"
    );
    ensure!(client.create_calls().len() == 1, "expected exactly one attach");
    Ok(())
}

// ---

/// The adapter refuses the link.
async fn attach_failure(cfg: &Config) -> anyhow::Result<()> {
    // ---
    let sim = LinkSimConfig {
        attach_failure: Some("remote refused link".into()),
        ..cfg.reliable_sim_config()
    };
    let (client, link) = receiver(cfg, sim);

    match link.attach().await {
        Err(LinkError::Attach(reason)) => tracing::info!(%reason, "attach refused as expected"),
        other => bail!("expected an attach error, got {other:?}"),
    }
    ensure!(link.state() == LinkState::Detached, "link should be detached");
    ensure!(client.handles().is_empty(), "no handle may be retained");
    Ok(())
}

// ---

/// The peer detaches cleanly; a later attach starts over.
async fn unsolicited_detach(cfg: &Config) -> anyhow::Result<()> {
    // ---
    let (client, link) = receiver(cfg, cfg.reliable_sim_config());
    link.attach().await.context("first attach")?;

    let first = client.last_handle().context("no handle after attach")?;
    first.emit_detached(None);
    wait_for_state(&link, LinkState::Detached).await?;
    tracing::info!("peer detached, link back to Detached");

    link.attach().await.context("second attach")?;
    let calls = client.create_calls().len();
    ensure!(calls == 2, "expected a fresh create call, saw {calls} in total");
    ensure!(first.force_close_count() == 1, "old handle should be released once");
    Ok(())
}

// ---

/// `detach` on a link that never attached.
async fn idle_detach(cfg: &Config) -> anyhow::Result<()> {
    // ---
    let (client, link) = receiver(cfg, cfg.reliable_sim_config());
    link.detach();
    link.detach();

    // Let the link process both requests before inspecting the adapter.
    tokio::time::sleep(Duration::from_millis(10)).await;

    ensure!(client.create_calls().is_empty(), "detach must not create a link");
    ensure!(link.state() == LinkState::Detached, "link should stay detached");
    Ok(())
}

// ---

/// Two subscribers share one attach; dropping both releases it.
async fn subscription(cfg: &Config) -> anyhow::Result<()> {
    // ---
    let (client, link) = receiver(cfg, cfg.reliable_sim_config());
    let mut first = link.subscribe();
    let mut second = link.subscribe();

    wait_for_state(&link, LinkState::Attached).await?;
    ensure!(client.create_calls().len() == 1, "two subscribers, one attach");

    let handle = client.last_handle().context("no handle after attach")?;
    let sent = handle.deliver(Message::new("telemetry frame").with_property("seq", "1"));
    for sub in [&mut first, &mut second] {
        let got = tokio::time::timeout(STEP_TIMEOUT, sub.recv())
            .await
            .context("subscriber got nothing")?;
        ensure!(got.as_ref() == Some(&sent), "subscriber got {got:?}");
    }
    link.accept(&sent)?.await.context("settling delivered message")?;
    tracing::info!("both subscribers received and the message was settled");

    drop(first);
    drop(second);
    wait_for_state(&link, LinkState::Detached).await?;

    ensure!(handle.force_close_count() == 1, "handle should be released once");
    ensure!(handle.subscriber_count() == 0, "released handle still has listeners");
    Ok(())
}

// ---

/// Settling a message that did not come from a link.
async fn invalid_argument(cfg: &Config) -> anyhow::Result<()> {
    // ---
    let (client, link) = receiver(cfg, cfg.reliable_sim_config());

    match link.reject(&Message::new("made up locally")) {
        Err(LinkError::InvalidArgument(reason)) => {
            tracing::info!(reason, "reject refused synchronously");
        }
        Err(other) => bail!("unexpected error {other}"),
        Ok(_) => bail!("reject of an unreceived message was accepted"),
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    ensure!(client.create_calls().is_empty(), "invalid input must not attach");
    Ok(())
}

// ---

/// A batch of sends. Failures injected by `--op-failure-percent` reach only
/// the send they hit.
async fn send(cfg: &Config) -> anyhow::Result<()> {
    // ---
    const BATCH: usize = 20;

    let client = LinkSimClient::new(cfg.sim_config());
    let link = SenderLink::new(&cfg.address, LinkOptions::new(), Arc::new(client.clone()));

    let pending: Vec<_> = (0..BATCH)
        .map(|i| link.send(Message::new(format!("payload {i}")).with_property("seq", i.to_string())))
        .collect();

    let mut sent = 0;
    let mut failed = 0;
    for (i, completion) in pending.into_iter().enumerate() {
        match completion.await {
            Ok(_) => sent += 1,
            Err(LinkError::Operation(reason)) => {
                tracing::warn!(seq = i, %reason, "send rejected");
                failed += 1;
            }
            Err(e) => bail!("send {i} failed at link level: {e}"),
        }
    }
    tracing::info!(sent, failed, "batch complete");

    let handle = client.last_handle().context("no handle after attach")?;
    let bodies: Vec<_> = handle
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            SimOp::Send(m) => Some(m.body),
            SimOp::Settle(..) => None,
        })
        .collect();
    let expected: Vec<_> = (0..BATCH)
        .map(|i| format!("payload {i}").into_bytes())
        .collect();
    ensure!(bodies == expected, "sends reached the adapter out of order");
    ensure!(link.state() == LinkState::Attached, "send failures must not detach");

    link.detach();
    wait_for_state(&link, LinkState::Detached).await?;
    Ok(())
}
