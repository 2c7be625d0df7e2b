//! CLI configuration for `tether-demo`.
//!
//! Run modes:
//!   tether-demo                                   # every scenario, perfect adapter
//!   tether-demo --scenario ordering --attach-delay-ms 200
//!   tether-demo --scenario send --op-failure-percent 30 --seed 7

use std::time::Duration;

use clap::{Parser, ValueEnum};

// ---

use tether_link_sim::LinkSimConfig;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "tether-demo", about = "Tether link lifecycle scenario runner")]
pub struct Config {
    // ---
    /// Address every link in the run is created on.
    #[arg(long, default_value = "queue/demo")]
    pub address: String,

    /// Which scenario to run.
    #[arg(long, value_enum, default_value_t = Scenario::All)]
    pub scenario: Scenario,

    /// Chance, in percent, that the adapter rejects any single settle or
    /// send. Only the `send` scenario tolerates failures; the others
    /// expect a perfect adapter and override this to 0.
    #[arg(long, default_value_t = 0.0)]
    pub op_failure_percent: f64,

    /// RNG seed for reproducible operation failures.
    #[arg(long)]
    pub seed: Option<u64>,

    /// How long the adapter takes to create a link.
    #[arg(long, default_value_t = 50)]
    pub attach_delay_ms: u64,
}

// ---

impl Config {
    // ---
    /// Adapter settings for this run.
    pub fn sim_config(&self) -> LinkSimConfig {
        // ---
        LinkSimConfig {
            attach_delay: Duration::from_millis(self.attach_delay_ms),
            op_failure_rate: (self.op_failure_percent / 100.0).clamp(0.0, 1.0),
            seed: self.seed,
            ..LinkSimConfig::default()
        }
    }

    // ---

    /// Adapter settings with operation failures switched off.
    pub fn reliable_sim_config(&self) -> LinkSimConfig {
        LinkSimConfig {
            op_failure_rate: 0.0,
            ..self.sim_config()
        }
    }
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    // ---
    /// Run every scenario in order.
    All,

    /// Settlements issued while attaching reach the adapter in call order.
    Ordering,

    /// A refused attach is reported to the caller; no handle is kept.
    AttachFailure,

    /// The peer detaches; the next attach creates a fresh link.
    UnsolicitedDetach,

    /// Detaching a never-attached link touches nothing.
    IdleDetach,

    /// Message subscribers attach the link and detach it when gone.
    Subscription,

    /// Settling a message that was never received fails immediately.
    InvalidArgument,

    /// A batch of sends over a sending link, with optional failures.
    Send,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
