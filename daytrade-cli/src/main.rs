//! Daytrade CLI: ticker lookup, download, preprocess and backtest commands.
//!
//! Commands:
//! - `tickers`: list the tickers of a registry group
//! - `download`: fetch or extend the raw price history and store it as Parquet
//! - `preprocess`: compute features and labels from the stored history
//! - `backtest`: compare policies against the random baseline and save artifacts

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use daytrade_core::data::{PanelStore, ParquetStore, YahooProvider};
use daytrade_core::TickerRegistry;
use daytrade_runner::export::save_artifacts;
use daytrade_runner::{
    compare_policies, refresh_raw, resolve_tickers, run_preprocess, ComparisonReport, RunConfig,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "daytrade",
    about = "Daytrade CLI: index-relative labeling and stock-selection backtests"
)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    /// Ticker registry TOML. Defaults to the built-in groups.
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tickers of a registry group, or every group when none is given.
    Tickers {
        group: Option<String>,

        /// Print the whole registry as TOML.
        #[arg(long, default_value_t = false)]
        toml: bool,
    },
    /// Download new price history for the configured group.
    Download {
        /// Path to a TOML run config. Defaults to the built-in settings.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Shrink the data section: one month of history, two tickers.
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
    /// Compute features and labels from the stored history.
    Preprocess {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        debug: bool,
    },
    /// Simulate the configured policies and rank them against random picks.
    Backtest {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        debug: bool,

        /// Output directory for report and trajectories.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let registry = match &cli.registry {
        Some(path) => TickerRegistry::from_file(path)
            .with_context(|| format!("failed to load registry {}", path.display()))?,
        None => TickerRegistry::builtin(),
    };

    match cli.command {
        Commands::Tickers { group, toml } => run_tickers(&registry, group.as_deref(), toml),
        Commands::Download { config, debug } => {
            run_download(&registry, &load_config(config.as_deref(), debug)?)
        }
        Commands::Preprocess { config, debug } => {
            run_preprocess_cmd(&registry, &load_config(config.as_deref(), debug)?)
        }
        Commands::Backtest {
            config,
            debug,
            output_dir,
        } => run_backtest(
            &registry,
            &load_config(config.as_deref(), debug)?,
            &output_dir,
        ),
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::try_new(default_level)?,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>, debug: bool) -> Result<RunConfig> {
    let cfg = match (path, debug) {
        (Some(path), true) => RunConfig::from_file(path)?.with_debug_data(),
        (Some(path), false) => RunConfig::from_file(path)?,
        (None, true) => RunConfig::debug(),
        (None, false) => RunConfig::default(),
    };
    cfg.validate()?;
    Ok(cfg)
}

fn store_for(cfg: &RunConfig) -> ParquetStore {
    ParquetStore::new(&cfg.data.data_dir, &cfg.data.group).with_overlap(cfg.data.overlap)
}

fn run_tickers(registry: &TickerRegistry, group: Option<&str>, as_toml: bool) -> Result<()> {
    if as_toml {
        print!("{}", registry.to_toml()?);
        return Ok(());
    }
    match group {
        Some(group) => {
            for ticker in registry.resolve(group)? {
                println!("{ticker}");
            }
        }
        None => {
            for name in registry.group_names() {
                let count = registry.resolve(name).map_or(0, |t| t.len());
                println!("{name:<16} {count:>3} tickers");
            }
        }
    }
    Ok(())
}

fn run_download(registry: &TickerRegistry, cfg: &RunConfig) -> Result<()> {
    let tickers = resolve_tickers(&cfg.data, registry)?;
    let provider = YahooProvider::new()?;
    let store = store_for(cfg);
    let today = chrono::Local::now().date_naive();

    let raw = refresh_raw(&provider, &store, &tickers, &cfg.data, today)?;
    match (raw.min_date(), raw.max_date()) {
        (Some(first), Some(last)) => println!(
            "Stored {} rows for {} tickers: {first} to {last}",
            raw.height(),
            tickers.len()
        ),
        _ => bail!(
            "no price history for group '{}' over {}",
            cfg.data.group,
            cfg.data.period
        ),
    }
    Ok(())
}

fn run_preprocess_cmd(registry: &TickerRegistry, cfg: &RunConfig) -> Result<()> {
    let tickers = resolve_tickers(&cfg.data, registry)?;
    let store = store_for(cfg);
    let processed = run_preprocess(&store, &tickers, &cfg.preprocess.to_config()?)?;
    println!(
        "Preprocessed {} rows x {} columns for {} tickers",
        processed.height(),
        processed.width(),
        tickers.len()
    );
    Ok(())
}

fn run_backtest(registry: &TickerRegistry, cfg: &RunConfig, output_dir: &Path) -> Result<()> {
    let tickers = resolve_tickers(&cfg.data, registry)?;
    let store = store_for(cfg);
    let panel = store
        .load_preprocessed()
        .context("no preprocessed panel; run `preprocess` first")?;
    info!(rows = panel.height(), tickers = tickers.len(), "loaded preprocessed panel");

    let report = compare_policies(&panel, &tickers, cfg)?;
    print_summary(&report);

    let run_dir = save_artifacts(&report, &panel, output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn print_summary(report: &ComparisonReport) {
    println!();
    println!("=== Policy Comparison ===");
    println!("Run:            {}", report.run_id);
    println!(
        "Period:         {} to {} ({} days)",
        report.start_date,
        report.end_date,
        report.end - report.start + 1
    );
    println!("Tickers:        {}", report.tickers.len());
    println!();
    println!(
        "{:<24} {:>10} {:>10} {:>9} {:>8} {:>9}",
        "Policy", "Final", "Pctile", "CAGR", "Sharpe", "Max DD"
    );
    println!("{}", "-".repeat(75));
    for p in &report.policies {
        let pctile = p
            .percentile
            .map_or_else(|| "-".to_string(), |v| format!("{v:.1}"));
        println!(
            "{:<24} {:>10.4} {:>10} {:>8.2}% {:>8.3} {:>8.2}%",
            p.name,
            p.final_value,
            pctile,
            p.metrics.annualized_return * 100.0,
            p.metrics.sharpe,
            p.metrics.max_drawdown * 100.0
        );
    }
    let r = &report.random;
    println!();
    println!("--- Random baseline ({} trials, seed {}) ---", r.trials, r.seed);
    println!(
        "Mean {:.4}  Median {:.4}  P10 {:.4}  P90 {:.4}",
        r.mean, r.median, r.p10, r.p90
    );
    println!();
}
