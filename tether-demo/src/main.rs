//! Tether demo: runs the link lifecycle scenarios against the in-process
//! adapter and reports each outcome.
//!
//! Run with:
//!   cargo run -p tether-demo
//!   cargo run -p tether-demo -- --scenario ordering --attach-delay-ms 200
//!   cargo run -p tether-demo -- --scenario send --op-failure-percent 30 --seed 7
//!   RUST_LOG=tether_link=debug cargo run -p tether-demo

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod config;
mod scenarios;

use config::{Config, Scenario};

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    let cfg = Config::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .with_ansi(!no_color)
        .init();

    tracing::info!(address = %cfg.address, scenario = ?cfg.scenario, "tether-demo starting");

    let selected: Vec<Scenario> = match cfg.scenario {
        Scenario::All => scenarios::ALL.to_vec(),
        one => vec![one],
    };

    let mut failures = 0;
    for scenario in selected {
        println!("=== {scenario:?} ===");
        match scenarios::run(scenario, &cfg).await {
            Ok(()) => println!("  ok"),
            Err(e) => {
                failures += 1;
                println!("  FAILED: {e:#}");
            }
        }
        println!();
    }

    if failures > 0 {
        anyhow::bail!("{failures} scenario(s) failed");
    }
    Ok(())
}
