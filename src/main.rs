//! `bts-zones` command line.
//!
//! Commands:
//! - `run`: load a dataset (and optionally a config) from JSON, run one backtest, print the result as JSON

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bts_zones::prelude::*;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bts-zones", about = "Backtest supply and demand zone retests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest and print the result as JSON.
    Run {
        /// Dataset JSON with `candidates`, `trades` and `volume_nodes`.
        #[arg(long)]
        data: PathBuf,

        /// Config JSON; flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Exit policy: holding_period, stop_target, hvn_target or historical.
        #[arg(long)]
        strategy: Option<String>,

        /// Holding period in days (1, 2, 3, 5, 10, 20, 22 or 65).
        #[arg(long)]
        holding_period: Option<u32>,

        /// Target distance as a multiple of the risk.
        #[arg(long)]
        min_rr: Option<f64>,

        /// Maximum number of positions open at once.
        #[arg(long)]
        max_positions: Option<usize>,

        /// Starting cash.
        #[arg(long)]
        capital: Option<f64>,

        /// Zones traded: all, demand or supply.
        #[arg(long)]
        zone_type: Option<String>,

        /// Pretty-print the JSON result.
        #[arg(long, default_value_t = false)]
        pretty: bool,

        /// Also print the summary block to stderr.
        #[arg(long, default_value_t = false)]
        summary: bool,

        /// Write the equity curve chart (.svg or .png).
        #[arg(long)]
        chart: Option<PathBuf>,
    },
}

/// Config overrides given on the command line.
struct Overrides {
    strategy: Option<String>,
    holding_period: Option<u32>,
    min_rr: Option<f64>,
    max_positions: Option<usize>,
    capital: Option<f64>,
    zone_type: Option<String>,
}

fn apply(mut config: BacktestConfig, overrides: Overrides) -> Result<BacktestConfig> {
    if let Some(name) = overrides.strategy {
        config.exit_strategy = name.parse()?;
    }
    match (&mut config.exit_strategy, overrides.holding_period, overrides.min_rr) {
        (ExitStrategy::HoldingPeriod { days }, Some(period), _) => *days = period,
        (ExitStrategy::StopTarget { min_risk_reward }, _, Some(rr)) => *min_risk_reward = rr,
        (strategy, Some(_), _) => bail!("--holding-period does not apply to {strategy}"),
        (strategy, _, Some(_)) => bail!("--min-rr does not apply to {strategy}"),
        _ => {}
    }
    if let Some(max_positions) = overrides.max_positions {
        config.max_positions = max_positions;
    }
    if let Some(capital) = overrides.capital {
        config.initial_capital = capital;
    }
    if let Some(zone_type) = overrides.zone_type {
        config.zone_type = zone_type.parse()?;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            data,
            config,
            strategy,
            holding_period,
            min_rr,
            max_positions,
            capital,
            zone_type,
            pretty,
            summary,
            chart,
        } => {
            let dataset = load_dataset(&data).with_context(|| format!("loading dataset {}", data.display()))?;
            let base: BacktestConfig = match config {
                Some(path) => read_json(&path).with_context(|| format!("loading config {}", path.display()))?,
                None => BacktestConfig::default(),
            };
            let overrides = Overrides {
                strategy,
                holding_period,
                min_rr,
                max_positions,
                capital,
                zone_type,
            };
            let config = apply(base, overrides)?;
            tracing::info!(strategy = %config.exit_strategy, candidates = dataset.candidates.len(), trades = dataset.trades.len(), "running backtest");

            let result = run_backtest(&dataset, &config)?;

            if summary {
                eprintln!("{result}");
            }
            if let Some(path) = chart {
                draw_chart(&result, path)?;
            }

            let json = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{json}");
        }
    }

    Ok(())
}

#[cfg(feature = "draws")]
fn draw_chart(result: &BacktestResult, path: PathBuf) -> Result<()> {
    let options = DrawOptions::default().draw_output(DrawOutput::from_path(path));
    Draw::with_result(result).with_options(options).plot()?;
    Ok(())
}

#[cfg(not(feature = "draws"))]
fn draw_chart(_result: &BacktestResult, _path: PathBuf) -> Result<()> {
    bail!("charts need the `draws` feature")
}
