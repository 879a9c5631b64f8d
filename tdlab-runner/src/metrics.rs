//! Performance metrics: pure functions that compute strategy statistics.
//!
//! Every metric is a pure function: portfolio values and/or closed trades in,
//! scalar out. Fractions throughout (0.05 = 5%); the CLI formats percentages.

use serde::{Deserialize, Serialize};
use tdlab_core::ClosedTrade;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Aggregate performance metrics for one portfolio run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub initial_capital: f64,
    pub final_value: f64,
    pub pnl: f64,
    /// Relative to the initial capital.
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Negative fraction (-0.15 = 15% drawdown).
    pub max_drawdown: f64,
    pub trade_count: usize,
    pub win_rate: f64,
    /// Mean per-trade price return.
    pub avg_trade_return: f64,
    pub profit_factor: f64,
    pub max_consecutive_losses: usize,
    pub max_concurrent_positions: usize,
}

impl PerformanceMetrics {
    /// Compute all metrics from daily portfolio values and the closed trades.
    pub fn compute(
        portfolio_values: &[f64],
        trades: &[ClosedTrade],
        initial_capital: f64,
        max_concurrent_positions: usize,
    ) -> Self {
        let final_value = portfolio_values.last().copied().unwrap_or(initial_capital);
        Self {
            initial_capital,
            final_value,
            pnl: final_value - initial_capital,
            total_return: total_return(initial_capital, final_value),
            cagr: cagr(initial_capital, final_value, portfolio_values.len()),
            sharpe: sharpe_ratio(portfolio_values),
            sortino: sortino_ratio(portfolio_values),
            max_drawdown: max_drawdown(portfolio_values),
            trade_count: trades.len(),
            win_rate: win_rate(trades),
            avg_trade_return: avg_trade_return(trades),
            profit_factor: profit_factor(trades),
            max_consecutive_losses: max_consecutive_losses(trades),
            max_concurrent_positions,
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// (final - initial) / initial.
pub fn total_return(initial_capital: f64, final_value: f64) -> f64 {
    if initial_capital <= 0.0 {
        return 0.0;
    }
    (final_value - initial_capital) / initial_capital
}

/// Compound Annual Growth Rate, assuming 252 trading days per year.
pub fn cagr(initial_capital: f64, final_value: f64, trading_days: usize) -> f64 {
    if trading_days < 2 || initial_capital <= 0.0 || final_value <= 0.0 {
        return 0.0;
    }
    let years = trading_days as f64 / TRADING_DAYS_PER_YEAR;
    (final_value / initial_capital).powf(1.0 / years) - 1.0
}

/// Annualized Sharpe ratio: mean / sample std of daily returns × √252.
///
/// Returns 0.0 with fewer than two returns or zero variance.
pub fn sharpe_ratio(portfolio_values: &[f64]) -> f64 {
    let returns = daily_returns(portfolio_values);
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(&returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean_f64(&returns) / std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized Sortino ratio (downside deviation only).
pub fn sortino_ratio(portfolio_values: &[f64]) -> f64 {
    let returns = daily_returns(portfolio_values);
    if returns.len() < 2 {
        return 0.0;
    }
    let downside_sq: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    let downside_std = (downside_sq / returns.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    mean_f64(&returns) / downside_std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Largest fall from the running peak, as a negative fraction.
pub fn max_drawdown(portfolio_values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for &v in portfolio_values {
        peak = peak.max(v);
        if peak > 0.0 {
            max_dd = max_dd.min((v - peak) / peak);
        }
    }
    max_dd
}

/// Fraction of trades with a positive return.
pub fn win_rate(trades: &[ClosedTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

pub fn avg_trade_return(trades: &[ClosedTrade]) -> f64 {
    let returns: Vec<f64> = trades.iter().map(ClosedTrade::return_pct).collect();
    mean_f64(&returns)
}

/// Gross profits / gross losses, capped at 100.0 (all winners).
pub fn profit_factor(trades: &[ClosedTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let gross_profit: f64 = trades.iter().map(ClosedTrade::pnl).filter(|p| *p > 0.0).sum();
    let gross_loss: f64 = trades
        .iter()
        .map(ClosedTrade::pnl)
        .filter(|p| *p < 0.0)
        .map(f64::abs)
        .sum();

    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { 100.0 } else { 0.0 };
    }
    (gross_profit / gross_loss).min(100.0)
}

/// Longest run of trades that did not win, in exit order.
pub fn max_consecutive_losses(trades: &[ClosedTrade]) -> usize {
    let mut max_streak = 0;
    let mut current = 0;
    for trade in trades {
        if trade.is_winner() {
            current = 0;
        } else {
            current += 1;
            max_streak = max_streak.max(current);
        }
    }
    max_streak
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Day-over-day percentage change.
pub fn daily_returns(portfolio_values: &[f64]) -> Vec<f64> {
    portfolio_values
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_trade(entry: f64, exit: f64) -> ClosedTrade {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        ClosedTrade {
            symbol: "SPY".into(),
            entry_date: date,
            entry_price: entry,
            exit_date: date + chrono::Duration::days(10),
            exit_price: exit,
            shares: 10.0,
        }
    }

    #[test]
    fn total_return_is_relative_to_initial_capital() {
        assert!((total_return(100_000.0, 110_000.0) - 0.10).abs() < 1e-12);
        assert_eq!(total_return(0.0, 10.0), 0.0);
    }

    #[test]
    fn max_drawdown_from_running_peak() {
        let values = [100.0, 120.0, 90.0, 130.0, 117.0];
        assert!((max_drawdown(&values) - (-0.25)).abs() < 1e-12);
    }

    #[test]
    fn max_drawdown_zero_when_rising() {
        assert_eq!(max_drawdown(&[100.0, 101.0, 102.0]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn sharpe_zero_for_constant_equity() {
        assert_eq!(sharpe_ratio(&[100.0; 10]), 0.0);
        assert_eq!(sharpe_ratio(&[100.0]), 0.0);
    }

    #[test]
    fn sharpe_matches_hand_computation() {
        // Returns 0.1, -0.1: mean 0 → Sharpe 0.
        assert!(sharpe_ratio(&[100.0, 110.0, 99.0]).abs() < 1e-12);

        // Returns 0.01, 0.03: mean 0.02, sample std √0.0002.
        let values = [100.0, 101.0, 104.03];
        let expected = 0.02 / 0.0002_f64.sqrt() * 252.0_f64.sqrt();
        assert!((sharpe_ratio(&values) - expected).abs() < 1e-9);
    }

    #[test]
    fn sortino_ignores_upside() {
        assert_eq!(sortino_ratio(&[100.0, 101.0, 102.0, 103.0]), 0.0);
        assert!(sortino_ratio(&[100.0, 105.0, 104.0, 110.0]) > 0.0);
    }

    #[test]
    fn win_rate_and_average_return() {
        let trades = [
            make_trade(100.0, 110.0),
            make_trade(100.0, 95.0),
            make_trade(100.0, 100.0),
            make_trade(50.0, 60.0),
        ];
        assert!((win_rate(&trades) - 0.5).abs() < 1e-12);
        // (0.10 - 0.05 + 0.0 + 0.20) / 4
        assert!((avg_trade_return(&trades) - 0.0625).abs() < 1e-12);
        assert_eq!(max_consecutive_losses(&trades), 2);
    }

    #[test]
    fn profit_factor_caps_all_winners() {
        assert_eq!(profit_factor(&[make_trade(10.0, 12.0)]), 100.0);
        assert_eq!(profit_factor(&[]), 0.0);
        // 10 shares: +100 vs -50.
        let trades = [make_trade(100.0, 110.0), make_trade(100.0, 95.0)];
        assert!((profit_factor(&trades) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn cagr_over_one_year_equals_total_return() {
        assert!((cagr(100.0, 120.0, 252) - 0.2).abs() < 1e-12);
        assert_eq!(cagr(100.0, 120.0, 1), 0.0);
    }

    #[test]
    fn compute_with_no_days_keeps_capital() {
        let m = PerformanceMetrics::compute(&[], &[], 1_000.0, 0);
        assert_eq!(m.final_value, 1_000.0);
        assert_eq!(m.pnl, 0.0);
        assert_eq!(m.trade_count, 0);
        assert_eq!(m.win_rate, 0.0);
    }

    #[test]
    fn compute_full_set() {
        let values = [1_000.0, 1_100.0, 1_045.0, 1_150.0];
        let trades = [make_trade(10.0, 15.0)];
        let m = PerformanceMetrics::compute(&values, &trades, 1_000.0, 3);
        assert_eq!(m.final_value, 1_150.0);
        assert!((m.pnl - 150.0).abs() < 1e-9);
        assert!((m.total_return - 0.15).abs() < 1e-12);
        assert!((m.max_drawdown - (-0.05)).abs() < 1e-12);
        assert_eq!(m.trade_count, 1);
        assert_eq!(m.win_rate, 1.0);
        assert!((m.avg_trade_return - 0.5).abs() < 1e-12);
        assert_eq!(m.max_concurrent_positions, 3);
    }
}
