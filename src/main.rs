//! Short-straddle backtester CLI.
//!
//! # Usage
//!
//! ```bash
//! # Simulate one DTE target and write its trades to the ledger
//! straddle-backtest run --db-path data/spx_eod.db --dte 30 --profit-take 30 --stop-loss 100
//!
//! # Hold every trade to expiration, one open trade at a time, 5 days apart
//! straddle-backtest run --db-path data/spx_eod.db --dte 45 --hold-to-expiry --trade-delay 5
//!
//! # Sweep DTE 7..60 in parallel with the volatility filter on
//! straddle-backtest sweep --db-path data/spx_eod.db --vol-filter
//!
//! # Summarize stored variants
//! straddle-backtest summary --db-path data/spx_eod.db --json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use straddle_backtest::analytics::VolatilityMeasure;
use straddle_backtest::backtest::{persist, simulate, RunConfig, RunResult};
use straddle_backtest::data::{DataLoader, QuoteStore};
use straddle_backtest::ledger::SqliteLedger;
use straddle_backtest::metrics::MetricsCalculator;
use straddle_backtest::sweep::{run_sweep, SweepConfig};

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "straddle-backtest")]
#[command(about = "Short-straddle options backtesting engine")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate one configuration and persist its trades
    Run(RunArgs),

    /// Simulate a range of DTE targets in parallel
    Sweep {
        #[command(flatten)]
        run: RunArgs,

        /// First DTE target
        #[arg(long, default_value_t = 7)]
        dte_min: i64,

        /// Last DTE target (inclusive)
        #[arg(long, default_value_t = 60)]
        dte_max: i64,

        /// Step between targets
        #[arg(long, default_value_t = 1)]
        dte_step: i64,
    },

    /// Print performance summaries from the ledger
    Summary {
        /// Ledger database
        #[arg(long)]
        db_path: PathBuf,

        /// Only this variant
        #[arg(long)]
        variant: Option<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,

        /// Include realized P&L by exit month
        #[arg(long)]
        monthly: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Ledger database (trades are written here)
    #[arg(long)]
    db_path: PathBuf,

    /// Quote database (defaults to --db-path)
    #[arg(long)]
    quotes_db: Option<PathBuf>,

    /// TOML run configuration; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Underlying symbol
    #[arg(long)]
    symbol: Option<String>,

    /// Target days to expiration
    #[arg(long)]
    dte: Option<i64>,

    /// Days the chosen expiration may differ from the target
    #[arg(long)]
    dte_tolerance: Option<i64>,

    /// Profit-take as percent of credit (0-100)
    #[arg(long)]
    profit_take: Option<f64>,

    /// Stop-loss as percent of credit (> 0)
    #[arg(long)]
    stop_loss: Option<f64>,

    /// Disable profit-take and stop-loss
    #[arg(long, conflicts_with_all = ["profit_take", "stop_loss"])]
    hold_to_expiry: bool,

    /// Maximum concurrently open trades
    #[arg(long)]
    max_open_trades: Option<usize>,

    /// Minimum days between entries
    #[arg(long)]
    trade_delay: Option<i64>,

    /// Enable the volatility percentile filter
    #[arg(long)]
    vol_filter: bool,

    /// Volatility measure: implied or realized
    #[arg(long, value_parser = parse_measure)]
    vol_measure: Option<VolatilityMeasure>,

    /// Admit entries only below this percentile
    #[arg(long)]
    vol_max_percentile: Option<f64>,

    /// Trailing sessions for the percentile
    #[arg(long)]
    vol_window: Option<usize>,

    /// First trading day (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last trading day (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,
}

fn parse_measure(s: &str) -> Result<VolatilityMeasure, String> {
    match s.to_lowercase().as_str() {
        "implied" | "iv" => Ok(VolatilityMeasure::Implied),
        "realized" | "rv" => Ok(VolatilityMeasure::Realized),
        other => Err(format!("unknown volatility measure {other:?}")),
    }
}

impl RunArgs {
    /// Config file (if any) with flags applied on top.
    fn to_config(&self, require_dte: bool) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => {
                if require_dte && self.dte.is_none() {
                    bail!("--dte is required unless --config sets dte_target");
                }
                RunConfig::default()
            }
        };

        if let Some(symbol) = &self.symbol {
            config.symbol = symbol.clone();
        }
        if let Some(dte) = self.dte {
            config.dte_target = dte;
        }
        if let Some(tolerance) = self.dte_tolerance {
            config.dte_tolerance = tolerance;
        }
        if let Some(pt) = self.profit_take {
            config.profit_take_pct = Some(pt);
        }
        if let Some(sl) = self.stop_loss {
            config.stop_loss_pct = Some(sl);
        }
        if self.hold_to_expiry {
            config = config.hold_to_expiry();
        }
        if let Some(max) = self.max_open_trades {
            config.max_open_trades = max;
        }
        if let Some(delay) = self.trade_delay {
            config.trade_delay = delay;
        }

        let vf = &mut config.volatility_filter;
        if self.vol_filter {
            vf.enabled = true;
        }
        if let Some(measure) = self.vol_measure {
            vf.measure = measure;
        }
        if let Some(pct) = self.vol_max_percentile {
            vf.max_percentile = pct;
        }
        if let Some(window) = self.vol_window {
            vf.window = window;
        }

        if self.start.is_some() {
            config.start_date = self.start;
        }
        if self.end.is_some() {
            config.end_date = self.end;
        }

        config.validate().context("Invalid run configuration")?;
        Ok(config)
    }

    fn load_store(&self, symbol: &str) -> Result<QuoteStore> {
        let path = self.quotes_db.as_ref().unwrap_or(&self.db_path);
        // Full history: the volatility filter ranks against sessions before start
        DataLoader::new(path)
            .load_store(symbol, None, None)
            .with_context(|| format!("Failed to load quotes from {}", path.display()))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run(args) => cmd_run(&args),
        Commands::Sweep {
            run,
            dte_min,
            dte_max,
            dte_step,
        } => cmd_sweep(
            &run,
            SweepConfig {
                dte_min,
                dte_max,
                dte_step,
            },
        ),
        Commands::Summary {
            db_path,
            variant,
            json,
            monthly,
        } => cmd_summary(&db_path, variant.as_deref(), json, monthly),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_run(args: &RunArgs) -> Result<()> {
    let config = args.to_config(true)?;
    let store = args.load_store(&config.symbol)?;

    let result = simulate(&store, &config)?;

    let mut ledger = SqliteLedger::open(&args.db_path)
        .with_context(|| format!("Failed to open ledger {}", args.db_path.display()))?;
    let written = persist(&result, &mut ledger).context("Failed to persist trades")?;

    println!("{}", SEPARATOR);
    println!("{}", result.summary());
    println!("{}", SEPARATOR);
    println!("{}", MetricsCalculator::summarize(&result.variant, &result.trades).summary());
    println!(
        "\nLedger: {} inserted, {} updated, {} unchanged, {} conflicts, {} marks",
        written.inserted, written.updated, written.unchanged, written.conflicts, written.marks
    );
    Ok(())
}

fn cmd_sweep(args: &RunArgs, sweep: SweepConfig) -> Result<()> {
    sweep.validate().context("Invalid DTE range")?;
    let base = args.to_config(false)?;
    let store = args.load_store(&base.symbol)?;

    let pb = ProgressBar::new(sweep.targets().len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    let results = run_sweep(&store, &base, &sweep, |result| {
        pb.set_message(format!("D{}", result.config.dte_target));
        pb.inc(1);
    })?;
    pb.finish_with_message("done");

    // Sequential writes keep ledger content independent of scheduling
    let mut ledger = SqliteLedger::open(&args.db_path)
        .with_context(|| format!("Failed to open ledger {}", args.db_path.display()))?;
    for result in &results {
        persist(result, &mut ledger)
            .with_context(|| format!("Failed to persist {}", result.variant))?;
    }

    print_sweep_table(&results);
    Ok(())
}

fn print_sweep_table(results: &[RunResult]) {
    println!("{}", SEPARATOR);
    println!(
        "{:>4} {:>7} {:>6} {:>8} {:>12} {:>10}",
        "DTE", "Trades", "Open", "Win %", "Total P&L", "Expectancy"
    );
    println!("{}", SEPARATOR);
    for result in results {
        let s = MetricsCalculator::summarize(&result.variant, &result.trades);
        println!(
            "{:>4} {:>7} {:>6} {:>7.1}% {:>12.2} {:>10}",
            result.config.dte_target,
            s.total_trades,
            s.open_trades,
            s.win_rate * 100.0,
            s.total_pnl,
            s.expectancy.map_or("n/a".to_string(), |e| format!("{e:.3}")),
        );
    }
}

fn cmd_summary(db_path: &Path, variant: Option<&str>, json: bool, monthly: bool) -> Result<()> {
    if !db_path.exists() {
        bail!("Ledger not found: {}", db_path.display());
    }
    let ledger = SqliteLedger::open(db_path)
        .with_context(|| format!("Failed to open ledger {}", db_path.display()))?;
    let reports = MetricsCalculator::report_ledger(&ledger, variant, monthly)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No trades in {}", db_path.display());
        return Ok(());
    }
    for report in &reports {
        println!("{}", SEPARATOR);
        println!("{}", report.summary.summary());
        if let Some(months) = &report.monthly {
            println!("\nMonth      Trades    Win %      P&L");
            for m in months {
                println!(
                    "{}-{:02}  {:>7} {:>7.1}% {:>9.2}",
                    m.year,
                    m.month,
                    m.trades,
                    m.win_rate * 100.0,
                    m.pnl
                );
            }
        }
    }
    Ok(())
}
