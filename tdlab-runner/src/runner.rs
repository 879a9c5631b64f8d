//! Backtest runner: wires together universe preparation, the portfolio loop, and metrics.
//!
//! Two entry points:
//! - `run_backtest()`: downloads and analyzes the universe, then runs. Used by CLI.
//! - `run_backtest_on_universe()`: takes an already prepared universe. No I/O.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tdlab_core::data::{DataProvider, DownloadProgress};
use tdlab_core::{ClosedTrade, SignalFamily};

use crate::backtest::{run_portfolio, Diagnostics, EquityPoint, OpenPosition, PortfolioParams};
use crate::config::{BacktestConfig, ConfigError, RunId};
use crate::data_loader::{prepare_universe, LoadError, LoadOptions, PreparedUniverse, SkippedSymbol};
use crate::metrics::PerformanceMetrics;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single portfolio backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub signal: SignalFamily,
    pub sizer: String,
    pub start_date: String,
    pub end_date: String,
    pub initial_capital: f64,
    pub symbols: Vec<String>,
    pub skipped: Vec<SkippedSymbol>,
    pub dataset_hash: String,
    pub has_synthetic: bool,
    pub metrics: PerformanceMetrics,
    pub diagnostics: Diagnostics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<ClosedTrade>,
    pub open_positions: Vec<OpenPosition>,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Download, analyze and backtest everything in `config`.
pub fn run_backtest(
    config: &BacktestConfig,
    provider: &dyn DataProvider,
    opts: &LoadOptions,
    progress: &dyn DownloadProgress,
) -> Result<BacktestResult, RunError> {
    config.validate()?;
    let universe = prepare_universe(config, provider, opts, progress)?;
    Ok(run_backtest_on_universe(config, &universe))
}

/// Backtest a prepared universe with a fresh sizer from `config`.
pub fn run_backtest_on_universe(
    config: &BacktestConfig,
    universe: &PreparedUniverse,
) -> BacktestResult {
    let mut sizer = config.build_sizer();
    let params = PortfolioParams::from(&config.backtest);
    let run = run_portfolio(
        &universe.annotated,
        universe.benchmark_bars(),
        &params,
        sizer.as_mut(),
    );

    let metrics = PerformanceMetrics::compute(
        &run.values(),
        &run.trades,
        params.initial_capital,
        run.diagnostics.max_concurrent_positions,
    );

    BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id: config.run_id(),
        signal: config.signal,
        sizer: sizer.name().to_string(),
        start_date: config.backtest.start_date.to_string(),
        end_date: config.backtest.end_date.to_string(),
        initial_capital: params.initial_capital,
        symbols: universe
            .annotated
            .iter()
            .map(|a| a.symbol().to_string())
            .collect(),
        skipped: universe.skipped.clone(),
        dataset_hash: universe.dataset_hash.clone(),
        has_synthetic: universe.has_synthetic,
        metrics,
        diagnostics: run.diagnostics,
        equity_curve: run.equity_curve,
        trades: run.trades,
        open_positions: run.open_positions,
    }
}
