//! TDLab Runner: universe preparation, portfolio backtest, metrics, validation.
//!
//! This crate builds on `tdlab-core` to provide:
//! - TOML backtest configuration
//! - Universe preparation with retry download, minimum-bar filter and
//!   synthetic fallback, with TD detection run per ticker in parallel
//! - The portfolio backtest loop driven by the aggregate signal
//! - Performance metrics and CSV/JSON/Markdown artifacts
//! - Signal validation against reference dates

pub mod backtest;
pub mod config;
pub mod data_loader;
pub mod export;
pub mod metrics;
pub mod runner;
pub mod validation;

pub use backtest::{run_portfolio, Diagnostics, EquityPoint, PortfolioParams, PortfolioRun};
pub use config::{BacktestConfig, ConfigError, SizerConfig};
pub use data_loader::{prepare_universe, LoadError, LoadOptions, PreparedUniverse, SkipReason};
pub use metrics::PerformanceMetrics;
pub use runner::{run_backtest, run_backtest_on_universe, BacktestResult, RunError};
pub use validation::{match_signals, run_validation, SignalMatch, ValidationConfig, ValidationSummary};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn performance_metrics_is_send_sync() {
        assert_send::<PerformanceMetrics>();
        assert_sync::<PerformanceMetrics>();
    }

    #[test]
    fn backtest_result_is_send_sync() {
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<BacktestConfig>();
        assert_sync::<BacktestConfig>();
        assert_send::<LoadOptions>();
        assert_sync::<LoadOptions>();
        assert_send::<ValidationConfig>();
        assert_sync::<ValidationConfig>();
    }

    #[test]
    fn prepared_universe_is_send_sync() {
        assert_send::<PreparedUniverse>();
        assert_sync::<PreparedUniverse>();
    }
}
