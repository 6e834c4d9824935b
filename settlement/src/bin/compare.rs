//! Algorithm comparison tool
//!
//! Reads a balance snapshot as JSON (file argument or stdin) and prints the
//! comparison report as JSON.
//!
//! ```text
//! settle-compare snapshot.json [--config settlement.toml]
//! ```
//!
//! Snapshot format:
//!
//! ```json
//! { "currency": "USD", "entries": { "alice": -3000, "bob": 3000 },
//!   "friend_weights": [] }
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use ledger_core::{Balances, Currency, FriendWeight, MinorUnits, UserId};
use serde::Deserialize;
use settlement::{AlgorithmComparator, Config, StrategyOptions};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;

/// Compare settlement algorithms over a balance snapshot
#[derive(Parser, Debug)]
#[command(name = "settle-compare")]
#[command(version)]
struct Args {
    /// Snapshot file (reads stdin when omitted)
    input: Option<PathBuf>,

    /// Configuration file (falls back to SETTLEMENT_* variables)
    #[arg(long, env = "SETTLEMENT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    currency: Currency,
    entries: BTreeMap<UserId, MinorUnits>,
    #[serde(default)]
    friend_weights: Vec<FriendWeight>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match &args.config {
        Some(path) => {
            Config::from_file(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::from_env()?,
    };

    let raw = match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let snapshot: Snapshot = serde_json::from_str(&raw).context("parsing balance snapshot")?;
    let balances = Balances::from_entries(snapshot.currency, snapshot.entries)?;
    tracing::info!(
        "Comparing algorithms over {} balances in {}",
        balances.non_zero_count(),
        balances.currency()
    );

    let comparator = AlgorithmComparator::new(StrategyOptions {
        friend_weights: snapshot.friend_weights,
        friend_threshold: config.suggestions.friend_weight_threshold,
    });
    let report = comparator.compare(&balances);

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.consistent {
        bail!("algorithms disagree on the amount moved");
    }
    Ok(())
}
