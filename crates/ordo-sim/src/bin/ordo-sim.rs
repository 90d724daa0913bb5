//! Ordo simulator
//!
//! The `ordo-sim` binary launches a set of transactions that compete for a
//! few shared resources under the wait-die protocol, with the deadlock
//! detector running alongside, and prints the final state.
//!
//! # Usage
//!
//! ```bash
//! # Two resources, four transactions
//! ordo-sim
//!
//! # More contention
//! ordo-sim --transactions 16 --max-attempts 5
//!
//! # Use configuration file
//! ordo-sim --config sim.toml
//!
//! # Show the effective configuration
//! ordo-sim --config sim.toml --print-config
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ordo_sim::{SimConfig, Simulation};

/// Ordo simulator
#[derive(Parser, Debug)]
#[command(
    name = "ordo-sim",
    author = "Ordo Team",
    version,
    about = "Wait-die concurrency control simulator",
    long_about = "Launches competing transactions against shared resources.\n\n\
                  Contention is resolved with the wait-die protocol; a periodic \
                  deadlock detector aborts the youngest member of any cycle."
)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", env = "ORDO_CONFIG")]
    config: Option<PathBuf>,

    /// Number of transactions to launch
    #[arg(short = 'n', long, env = "ORDO_TRANSACTIONS")]
    transactions: Option<usize>,

    /// Attempts per transaction
    #[arg(long, env = "ORDO_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Deadlock detector period in milliseconds
    #[arg(long, value_name = "MS", env = "ORDO_DETECTOR_INTERVAL_MS")]
    detector_interval_ms: Option<u64>,

    /// Maximum time a waiting transaction polls, in milliseconds
    #[arg(long, value_name = "MS", env = "ORDO_MAX_WAIT_MS")]
    max_wait_ms: Option<u64>,

    /// Disable think time and launch stagger
    #[arg(long)]
    fast: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "ORDO_LOG_LEVEL")]
    log_level: String,

    /// Print configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    info!(
        transactions = config.transactions,
        resources = config.resources.len(),
        max_attempts = config.engine.max_attempts,
        "starting simulation"
    );

    let report = Simulation::new(config)?.run()?;
    println!("{report}");

    if !report.is_clean() {
        anyhow::bail!("resources still held after every transaction finished");
    }
    Ok(())
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_new(format!("ordo_sim={level},ordo_txn={level}"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn load_config(args: &Args) -> Result<SimConfig> {
    let mut config = if let Some(path) = &args.config {
        SimConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
    } else {
        SimConfig::default()
    };

    // Command line overrides
    if let Some(transactions) = args.transactions {
        config.transactions = transactions;
    }
    if let Some(attempts) = args.max_attempts {
        config.engine.max_attempts = attempts;
    }
    if let Some(interval) = args.detector_interval_ms {
        config.engine.detector_interval_ms = interval;
    }
    if let Some(wait) = args.max_wait_ms {
        config.engine.max_wait_ms = wait;
    }
    if args.fast {
        config.think = ordo_sim::ThinkConfig::none();
        config.stagger = ordo_sim::RangeMs::zero();
    }

    config.validate()?;
    Ok(config)
}
