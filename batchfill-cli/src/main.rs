//! batchfill scenario runner
//!
//! Loads a JSON scenario (targets, in-memory sources, joins), runs one fill
//! cycle and prints the populated targets with the fill summary.
//!
//! Usage:
//!   batchfill demos/children.json --verbose

use std::{fs, path::PathBuf};
use anyhow::{Context, Result};
use batchfill_cli::{Scenario, run_scenario};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "batchfill")]
#[command(about = "Run a batch-join scenario against in-memory sources")]
struct Args {
    /// Path to the scenario JSON file
    scenario: PathBuf,

    /// Print only the populated targets
    #[arg(long)]
    targets_only: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    info!("Loading scenario {}", args.scenario.display());
    let json = fs::read_to_string(&args.scenario)
        .with_context(|| format!("failed to read {}", args.scenario.display()))?;
    let scenario = Scenario::from_json_str(&json)?;
    let report = run_scenario(scenario).await?;

    let output = if args.targets_only {
        serde_json::to_string_pretty(&report.targets)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{output}");
    Ok(())
}
