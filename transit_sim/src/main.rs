//! Transit Simulator CLI
//!
//! Seeds a roster, streams synthetic telemetry through the entity tree on a
//! virtual clock and prints the aggregates every level converged to.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use transit_sim::{default_roster, load_roster, FeedConfig, TransitWorld, WorldConfig, WorldSummary};

#[derive(Parser, Debug)]
#[command(name = "transit-sim")]
#[command(about = "Deterministic simulation of the transit aggregation tree")]
struct Args {
    /// Master seed for determinism
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of feed polls to run
    #[arg(short, long, default_value = "30")]
    ticks: u64,

    /// Fleet size per agency
    #[arg(short = 'n', long, default_value = "8")]
    vehicles: usize,

    /// Virtual milliseconds between feed polls
    #[arg(long, default_value = "10000")]
    interval_ms: u64,

    /// Roster file (JSON array of {agencyId, state, country}); built-in roster if omitted
    #[arg(short, long)]
    roster: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

fn print_summary(summary: &WorldSummary) {
    println!();
    println!("Seed {} | {} ticks | {:.0}s simulated | {} entities", summary.seed, summary.ticks, summary.sim_time_secs, summary.entities);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for country in &summary.countries {
        println!(
            "{:<16} count {:>4} (max {:>4})  speed {}",
            country.address,
            country.count.current,
            country.count.max,
            format_speed(country.speed)
        );
        for state in &country.states {
            println!(
                "  {:<14} count {:>4} (max {:>4})  speed {}",
                state.address,
                state.count.current,
                state.count.max,
                format_speed(state.speed)
            );
        }
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

fn format_speed(speed: Option<f64>) -> String {
    speed.map_or_else(|| "-".to_string(), |s| format!("{:.1}", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let roster = match &args.roster {
        Some(path) => load_roster(path)?,
        None => default_roster(),
    };
    if roster.is_empty() {
        bail!("roster has no agencies");
    }

    let config = WorldConfig {
        seed: args.seed,
        tick_interval_ms: args.interval_ms,
        feed: FeedConfig {
            vehicles_per_agency: args.vehicles,
            ..FeedConfig::default()
        },
        ..WorldConfig::default()
    };

    if !args.json {
        info!("Transit Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!(seed = args.seed, ticks = args.ticks, agencies = roster.len(), "starting run");
    }

    let mut world = TransitWorld::new(config, roster)?;
    world.runtime.settle().await;
    world.run(args.ticks).await;
    let summary = world.summary().await;
    world.shutdown().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if let Err(reason) = summary.check() {
        error!(seed = args.seed, %reason, "aggregates disagree");
        bail!("seed {}: {}", args.seed, reason);
    }
    if !args.json {
        info!("aggregates consistent at every level");
    }
    Ok(())
}
