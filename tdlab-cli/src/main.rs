//! TDLab CLI: detection, backtest, and validation commands.
//!
//! Commands:
//! - `detect`: download one symbol and print its Setup/Countdown series
//! - `backtest`: run a portfolio backtest from a TOML config file
//! - `validate`: score detected signals against reference dates
//!
//! Data comes from Yahoo Finance unless `--data-dir` points at a directory of
//! `<SYMBOL>.csv` files.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tdlab_core::data::{
    download, CsvProvider, DataProvider, RetryPolicy, StdoutProgress, YahooProvider,
};
use tdlab_core::td::Abandoned;
use tdlab_core::{AnnotatedSeries, DetectorConfig, Direction, SignalFamily, Stage, TdEngine};
use tdlab_runner::export::save_artifacts;
use tdlab_runner::{
    run_backtest, run_validation, BacktestConfig, BacktestResult, LoadOptions, ValidationConfig,
    ValidationSummary,
};

#[derive(Parser)]
#[command(name = "tdlab", about = "TDLab CLI: TD Setup / Countdown detection and backtesting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one symbol and print its TD Setup and Countdown series.
    Detect {
        symbol: String,

        /// Start date (YYYY-MM-DD, inclusive).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD, exclusive). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Family for the aggregate signal.
        #[arg(long, value_enum, default_value_t = StageArg::Setup)]
        stage: StageArg,

        #[arg(long, value_enum, default_value_t = DirectionArg::Sell)]
        direction: DirectionArg,

        /// Countdown completion window in bars.
        #[arg(long)]
        max_countdown_span: Option<usize>,

        /// Also list abandoned candidates and why they stopped.
        #[arg(long, default_value_t = false)]
        abandoned: bool,

        /// Print the analysis as JSON instead of tables.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Read `<SYMBOL>.csv` files from this directory instead of Yahoo Finance.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Run a portfolio backtest from a TOML config file.
    Backtest {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Use synthetic data for tickers that cannot be downloaded.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output directory for summary.json, equity.csv and trades.csv.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Score detected signals against reference dates from a TOML file.
    Validate {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    Setup,
    Countdown,
}

impl From<StageArg> for Stage {
    fn from(s: StageArg) -> Self {
        match s {
            StageArg::Setup => Stage::Setup,
            StageArg::Countdown => Stage::Countdown,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Buy,
    Sell,
}

impl From<DirectionArg> for Direction {
    fn from(d: DirectionArg) -> Self {
        match d {
            DirectionArg::Buy => Direction::Buy,
            DirectionArg::Sell => Direction::Sell,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Detect {
            symbol,
            start,
            end,
            stage,
            direction,
            max_countdown_span,
            abandoned,
            json,
            data_dir,
        } => {
            let family = SignalFamily {
                stage: stage.into(),
                direction: direction.into(),
            };
            let mut detector = DetectorConfig::default();
            if let Some(span) = max_countdown_span {
                detector.max_countdown_span = span;
            }
            run_detect(
                &symbol,
                &start,
                end.as_deref(),
                family,
                detector,
                abandoned,
                json,
                data_dir,
            )
        }
        Commands::Backtest {
            config,
            synthetic,
            data_dir,
            output_dir,
        } => run_backtest_cmd(config, synthetic, data_dir, output_dir),
        Commands::Validate { config, data_dir } => run_validate_cmd(config, data_dir),
    }
}

fn make_provider(data_dir: Option<PathBuf>) -> Result<Box<dyn DataProvider>> {
    Ok(match data_dir {
        Some(dir) => {
            if !dir.is_dir() {
                bail!("data directory does not exist: {}", dir.display());
            }
            Box::new(CsvProvider::new(dir))
        }
        None => Box::new(YahooProvider::new()?),
    })
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

#[allow(clippy::too_many_arguments)]
fn run_detect(
    symbol: &str,
    start: &str,
    end: Option<&str>,
    family: SignalFamily,
    detector: DetectorConfig,
    show_abandoned: bool,
    json: bool,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let start = parse_date(start)?;
    let end = match end {
        Some(s) => parse_date(s)?,
        None => chrono::Local::now().date_naive(),
    };
    let engine = TdEngine::new(detector)?;
    let provider = make_provider(data_dir)?;

    let series = download(provider.as_ref(), symbol, start, end, &RetryPolicy::default())
        .into_series()
        .with_context(|| format!("no data for {symbol}"))?;

    let report = engine.report(&series);
    let abandoned: Vec<Abandoned> = report.abandoned().cloned().collect();
    let annotated = AnnotatedSeries::new(series, report.into_analysis(), family);

    if json {
        println!("{}", serde_json::to_string_pretty(&annotated.analysis)?);
        return Ok(());
    }

    print_detection(&annotated);
    if show_abandoned {
        print_abandoned(&annotated, &abandoned);
    }
    Ok(())
}

fn print_detection(a: &AnnotatedSeries) {
    let s = &a.series;
    println!(
        "{}: {} bars ({} to {})",
        a.symbol(),
        s.len(),
        s.first_date().map(|d| d.to_string()).unwrap_or_default(),
        s.last_date().map(|d| d.to_string()).unwrap_or_default(),
    );

    println!("\nSetups");
    println!(
        "  {:<5} {:>4} {:>12} {:>12}",
        "dir", "seq", "start", "complete"
    );
    for setup in &a.analysis.setups {
        println!(
            "  {:<5} {:>4} {:>12} {:>12}",
            setup.direction.to_string(),
            setup.sequence,
            s.date(setup.start_index),
            s.date(setup.completion_index),
        );
    }

    println!("\nCountdowns");
    println!(
        "  {:<5} {:>4} {:>6} {:>12} {:>12} {:>5}",
        "dir", "seq", "setup", "start", "complete", "span"
    );
    for cd in &a.analysis.countdowns {
        println!(
            "  {:<5} {:>4} {:>6} {:>12} {:>12} {:>5}",
            cd.direction.to_string(),
            cd.sequence,
            cd.setup_sequence,
            s.date(cd.start_index),
            s.date(cd.completion_index),
            cd.span(),
        );
    }

    let dates = a.signal_dates();
    println!("\n{} signal: {} bars", a.family, dates.len());
    for date in dates {
        println!("  {date}");
    }
}

fn print_abandoned(a: &AnnotatedSeries, abandoned: &[Abandoned]) {
    println!("\nAbandoned candidates: {}", abandoned.len());
    for ab in abandoned {
        println!(
            "  {:<5} trigger {} reached {:>2} seq {:<4} {:?}",
            ab.direction.to_string(),
            a.series.date(ab.trigger_index),
            ab.reached,
            ab.sequence.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            ab.reason,
        );
    }
}

fn run_backtest_cmd(
    config_path: PathBuf,
    synthetic: bool,
    data_dir: Option<PathBuf>,
    output_dir: PathBuf,
) -> Result<()> {
    let config = BacktestConfig::from_file(&config_path)?;
    let provider = make_provider(data_dir)?;
    let opts = LoadOptions { synthetic };

    let result = run_backtest(&config, provider.as_ref(), &opts, &StdoutProgress)?;
    print_summary(&result);

    save_artifacts(&result, &output_dir)?;
    println!("\nArtifacts saved to: {}", output_dir.display());
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let d = &result.diagnostics;
    let m = &result.metrics;

    println!("\nSignal Flow Analysis:");
    println!("Total TD Signals: {}", d.total_signals);
    println!("Signals with Rising Closes: {}", d.signals_with_rising_closes);
    println!("Trades Executed: {}", d.trades_executed);
    println!("Times Insufficient Cash: {}", d.insufficient_cash);

    if m.trade_count > 0 {
        println!("\nStrategy Results:");
        println!("Initial Capital: ${:.2}", m.initial_capital);
        println!("Final Portfolio Value: ${:.2}", m.final_value);
        println!("Total Return: {:.2}%", m.total_return * 100.0);
        println!("PnL: {:.2}", m.pnl);
        println!("Total Trades: {}", m.trade_count);
        println!("Win Rate: {:.2}%", m.win_rate * 100.0);
        println!("Average Trade Return: {:.2}%", m.avg_trade_return * 100.0);
        println!("Sharpe Ratio: {:.2}", m.sharpe);
        println!("Max Drawdown: {:.2}%", m.max_drawdown * 100.0);
    }
    println!("Max Concurrent Positions: {}", m.max_concurrent_positions);

    if result.has_synthetic {
        println!("\nWARNING: results include synthetic data");
    }
}

fn run_validate_cmd(config_path: PathBuf, data_dir: Option<PathBuf>) -> Result<()> {
    let config = ValidationConfig::from_file(&config_path)?;
    let provider = make_provider(data_dir)?;
    let summary = run_validation(&config, provider.as_ref())?;
    print_validation(&summary);
    Ok(())
}

fn print_validation(summary: &ValidationSummary) {
    println!(
        "Testing {} signals (window ±{} days)",
        summary.family, summary.window_days
    );
    println!("{}", "-".repeat(50));
    for case in &summary.cases {
        let m = &case.matched;
        println!("\n{}", case.symbol);
        if !case.data_available {
            println!("Insufficient data");
        }
        println!("Hits: {}", m.hits);
        println!("Misses: {}", m.misses);
        println!("False Positives: {}", m.false_positives);
        println!("Accuracy: {:.2}%", m.accuracy() * 100.0);
        for date in &m.missed {
            println!("  missed {date}");
        }
        for date in &m.extra {
            println!("  extra  {date}");
        }
    }

    println!("\n{}", "-".repeat(50));
    println!("Total Hits: {}", summary.total_hits());
    println!("Total Misses: {}", summary.total_misses());
    println!("Total False Positives: {}", summary.total_false_positives());
    println!("Overall Accuracy: {:.2}%", summary.overall_accuracy() * 100.0);
}
