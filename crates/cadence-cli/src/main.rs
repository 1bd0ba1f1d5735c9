//! Cadence: retrying scheduled task engine
//!
//! Binary with subcommands:
//! - `soak`: Run a set of flaky repeating jobs and report pool usage
//! - `backoff`: Print the delays a backoff configuration produces

use std::path::PathBuf;
use std::time::Duration;

use cadence::{Backoff, SchedulerConfig};
use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod soak;

/// Parse a probability in `[0, 1]`.
fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid rate '{}', expected a number", s))?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("rate {} is outside 0..=1", rate));
    }
    Ok(rate)
}

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Retrying scheduled task engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run flaky repeating jobs under the scheduler and print usage stats
    Soak {
        /// JSON scheduler configuration file
        #[arg(long, env = "CADENCE_CONFIG")]
        config: Option<PathBuf>,

        /// Worker threads (overrides the configuration file)
        #[arg(long, env = "CADENCE_POOL_SIZE")]
        pool_size: Option<usize>,

        /// Number of repeating jobs
        #[arg(long, default_value = "8")]
        jobs: usize,

        /// Nominal period of each job in milliseconds
        #[arg(long, default_value = "50")]
        period_ms: u64,

        /// Run jobs with a fixed delay instead of a fixed rate
        #[arg(long)]
        fixed_delay: bool,

        /// Probability that an execution fails
        #[arg(long, default_value = "0.3", value_parser = parse_rate)]
        failure_rate: f64,

        /// Simulated work per execution in milliseconds
        #[arg(long, default_value = "5")]
        work_ms: u64,

        /// Enable backoff, capping the delay at this many milliseconds
        #[arg(long, env = "CADENCE_MAX_BACKOFF_MS")]
        max_backoff_ms: Option<u64>,

        /// Backoff floor in milliseconds
        #[arg(long, default_value = "0")]
        min_backoff_ms: u64,

        /// Backoff multiplier
        #[arg(long, default_value = "2.0")]
        scale: f64,

        /// How long to run, in seconds
        #[arg(long, default_value = "5")]
        duration_secs: u64,
    },

    /// Print the delay sequence for a run of consecutive failures
    Backoff {
        /// Nominal period in milliseconds
        #[arg(long, default_value = "10")]
        period_ms: u64,

        /// Backoff floor in milliseconds
        #[arg(long, default_value = "0")]
        min_ms: u64,

        /// Backoff cap in milliseconds
        #[arg(long, default_value = "60")]
        max_ms: u64,

        /// Backoff multiplier
        #[arg(long, default_value = "2.0")]
        scale: f64,

        /// Consecutive failures to simulate before a success
        #[arg(long, default_value = "6")]
        failures: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cadence=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Soak {
            config,
            pool_size,
            jobs,
            period_ms,
            fixed_delay,
            failure_rate,
            work_ms,
            max_backoff_ms,
            min_backoff_ms,
            scale,
            duration_secs,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(size) = pool_size {
                config.pool_size = size;
            }
            let backoff = max_backoff_ms.map(|max| {
                Backoff::new(
                    Duration::from_millis(min_backoff_ms),
                    Duration::from_millis(max),
                    scale,
                )
            });
            let options = soak::SoakOptions {
                jobs,
                period: Duration::from_millis(period_ms),
                fixed_delay,
                failure_rate,
                work: Duration::from_millis(work_ms),
                backoff,
                duration: Duration::from_secs(duration_secs),
            };
            let report = soak::run(config, options).await?;
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| miette::miette!("failed to serialize report: {}", e))?;
            println!("{}", json);
        }
        Commands::Backoff {
            period_ms,
            min_ms,
            max_ms,
            scale,
            failures,
        } => {
            let period = Duration::from_millis(period_ms);
            let backoff = Backoff::new(
                Duration::from_millis(min_ms),
                Duration::from_millis(max_ms),
                scale,
            );
            backoff
                .validate(period)
                .map_err(|e| miette::miette!("{}", e))?;
            for (i, delay) in backoff_sequence(period, &backoff, failures)
                .into_iter()
                .enumerate()
            {
                let label = if i < failures {
                    format!("failure {}", i + 1)
                } else {
                    "success".to_string()
                };
                println!("{:>12}: next run in {:?}", label, delay);
            }
        }
    }

    Ok(())
}

/// Load the scheduler configuration, falling back to the defaults.
fn load_config(path: Option<&std::path::Path>) -> Result<SchedulerConfig> {
    let Some(path) = path else {
        return Ok(SchedulerConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| miette::miette!("invalid configuration in {}: {}", path.display(), e))
}

/// Delays after `failures` consecutive failures followed by one success.
fn backoff_sequence(period: Duration, backoff: &Backoff, failures: usize) -> Vec<Duration> {
    let mut current = period;
    let mut delays = Vec::with_capacity(failures + 1);
    for _ in 0..failures {
        current = cadence::next_delay(current, period, false, Some(backoff));
        delays.push(current);
    }
    delays.push(cadence::next_delay(current, period, true, Some(backoff)));
    delays
}
