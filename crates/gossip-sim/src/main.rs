//! gossip-sim: run a simulated gossip membership cluster.
//!
//! Builds N nodes over an in-memory network, drives them for a number of
//! protocol periods, optionally crashes some of them, and reports whether
//! every surviving node ended up with the same view.

use anyhow::{Context, Result};
use clap::Parser;
use gossip_core::MembershipConfig;
use gossip_sim::{ClockMode, Simulation, SimulationOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gossip-sim")]
#[command(about = "Simulate a gossip membership cluster")]
struct Args {
    /// Number of nodes
    #[arg(short, long, default_value_t = 10)]
    nodes: usize,

    /// Number of protocol periods to run
    #[arg(short, long, default_value_t = 100)]
    ticks: u64,

    /// JSON file with membership settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Silence before a peer is suspected, in periods (overrides config file)
    #[arg(long)]
    t_fail: Option<u64>,

    /// Silence before a peer is evicted, in periods (overrides config file)
    #[arg(long)]
    t_remove: Option<u64>,

    /// Peers gossiped to per period (overrides config file)
    #[arg(long)]
    fanout: Option<usize>,

    /// Probability of losing each datagram
    #[arg(long, default_value_t = 0.0)]
    drop_rate: f64,

    /// Seed for losses and gossip target selection (random if not provided)
    #[arg(long)]
    seed: Option<u64>,

    /// Period at which to crash nodes
    #[arg(long)]
    fail_at: Option<u64>,

    /// How many of the highest-numbered nodes crash at --fail-at
    #[arg(long, default_value_t = 1)]
    fail_count: usize,

    /// Periods to wait for a join reply before retrying
    #[arg(long, default_value_t = 10)]
    join_timeout: u64,

    /// Milliseconds between periods (0 runs them back to back)
    #[arg(long, default_value_t = 0)]
    tick_ms: u64,

    /// Time source
    #[arg(long, value_enum, default_value_t = ClockMode::Manual)]
    clock: ClockMode,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,

    /// Print membership events as JSON lines
    #[arg(long)]
    events: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn membership_config(&self) -> Result<MembershipConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => MembershipConfig::default(),
        };
        if let Some(t_fail) = self.t_fail {
            config = config.with_t_fail(t_fail);
        }
        if let Some(t_remove) = self.t_remove {
            config = config.with_t_remove(t_remove);
        }
        if let Some(fanout) = self.fanout {
            config = config.with_gossip_fanout(fanout);
        }
        config.validate()?;
        Ok(config)
    }

    fn simulation_options(&self, seed: u64) -> Result<SimulationOptions> {
        let options = SimulationOptions {
            nodes: self.nodes,
            membership: self.membership_config()?,
            clock: ClockMode::Manual,
            drop_rate: self.drop_rate,
            seed,
            fail_at: self.fail_at,
            fail_count: self.fail_count,
            join_timeout: self.join_timeout,
        };
        match self.clock {
            ClockMode::Manual => Ok(options),
            ClockMode::Wall => {
                anyhow::ensure!(self.tick_ms > 0, "--clock wall requires --tick-ms");
                Ok(options.with_wall_clock(self.tick_ms))
            }
        }
    }
}

fn load_config(path: &Path) -> Result<MembershipConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,gossip_core=debug"
    } else {
        "info,gossip_core=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let seed = args.seed.unwrap_or_else(rand::random);
    let options = args.simulation_options(seed)?;
    info!(
        "Simulating {} nodes for {} periods (seed {}, drop rate {})",
        args.nodes, args.ticks, seed, args.drop_rate
    );

    let mut sim = Simulation::new(options)?;

    let _subscription = args.events.then(|| {
        sim.events().subscribe(|event| match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to serialize event: {}", e),
        })
    });

    sim.start()?;

    let mut interval = (args.tick_ms > 0)
        .then(|| tokio::time::interval(Duration::from_millis(args.tick_ms)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    while sim.current_step() < args.ticks {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            _ = next_period(interval.as_mut()) => {
                sim.step();
            }
        }
    }

    let report = sim.report();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.log();
    }
    Ok(())
}

/// Wait for the next period, or just yield when running back to back.
async fn next_period(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => tokio::task::yield_now().await,
    }
}
