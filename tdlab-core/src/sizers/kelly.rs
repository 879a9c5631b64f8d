//! Kelly Position Sizer
//!
//! Sizes each entry as a fraction of portfolio value from three factors:
//!
//! ```text
//! kelly      = half-Kelly from the last 100 closed trades, capped at 25% before halving
//! corr_adj   = 1 - corr(ticker, market)^2      over the last 60 daily returns
//! vol_scalar = clamp(0.20 / annualized vol, 0.5, 2.0)   over the last 20 daily returns
//! fraction   = min(kelly * corr_adj * vol_scalar, concentration_limit)
//! ```
//!
//! With fewer than `min_trades` closed trades the Kelly term falls back to
//! `default_fraction`.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, ClosedTrade};
use crate::sizers::{daily_returns, PositionSize, PositionSizer};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KellySizerConfig {
    /// Closed trades the Kelly estimate looks at.
    pub trade_lookback: usize,
    /// Closed trades needed before the estimate is trusted.
    pub min_trades: usize,
    /// Kelly term used with too little history or no losing trades.
    pub default_fraction: f64,
    /// Cap on the raw Kelly fraction.
    pub kelly_cap: f64,
    /// Multiplier applied after the cap (0.5 = half-Kelly).
    pub kelly_multiplier: f64,
    pub vol_lookback: usize,
    /// Annualized volatility the scalar steers toward.
    pub target_vol: f64,
    pub min_vol_scalar: f64,
    pub max_vol_scalar: f64,
    pub correlation_lookback: usize,
    /// Correlation assumed when either history is shorter than the lookback.
    pub default_correlation: f64,
    /// Largest portfolio fraction any one entry may take.
    pub concentration_limit: f64,
    /// Closed trades retained.
    pub max_history: usize,
}

impl Default for KellySizerConfig {
    fn default() -> Self {
        Self {
            trade_lookback: 100,
            min_trades: 20,
            default_fraction: 0.1,
            kelly_cap: 0.25,
            kelly_multiplier: 0.5,
            vol_lookback: 20,
            target_vol: 0.20,
            min_vol_scalar: 0.5,
            max_vol_scalar: 2.0,
            correlation_lookback: 60,
            default_correlation: 0.5,
            concentration_limit: 0.25,
            max_history: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KellySizer {
    config: KellySizerConfig,
    trades: VecDeque<ClosedTrade>,
}

impl Default for KellySizer {
    fn default() -> Self {
        Self::new(KellySizerConfig::default())
    }
}

impl KellySizer {
    pub fn new(config: KellySizerConfig) -> Self {
        Self {
            config,
            trades: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &KellySizerConfig {
        &self.config
    }

    pub fn history_len(&self) -> usize {
        self.trades.len()
    }

    /// Half-Kelly fraction from recent closed trades.
    pub fn kelly_fraction(&self) -> f64 {
        let cfg = &self.config;
        let skip = self.trades.len().saturating_sub(cfg.trade_lookback);
        let returns: Vec<f64> = self.trades.iter().skip(skip).map(ClosedTrade::return_pct).collect();
        if returns.len() < cfg.min_trades {
            return cfg.default_fraction;
        }

        let wins: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
        let losses: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        if losses.is_empty() {
            return cfg.default_fraction;
        }
        if wins.is_empty() {
            return 0.0;
        }
        let avg_loss = mean(&losses).abs();
        if avg_loss == 0.0 {
            return cfg.default_fraction;
        }

        let p = wins.len() as f64 / returns.len() as f64;
        let b = mean(&wins) / avg_loss;
        let kelly = (p * (b + 1.0) - 1.0) / b;
        kelly.clamp(0.0, cfg.kelly_cap) * cfg.kelly_multiplier
    }

    /// Scale toward the target volatility from the ticker's recent returns.
    pub fn volatility_scalar(&self, history: &[Bar]) -> f64 {
        let cfg = &self.config;
        let returns: Vec<f64> = daily_returns(history).map(|(_, r)| r).collect();
        let recent = &returns[returns.len().saturating_sub(cfg.vol_lookback)..];
        let Some(std) = sample_std(recent) else {
            return 1.0;
        };
        let vol = std * TRADING_DAYS_PER_YEAR.sqrt();
        if vol == 0.0 {
            return cfg.max_vol_scalar;
        }
        (cfg.target_vol / vol).clamp(cfg.min_vol_scalar, cfg.max_vol_scalar)
    }

    /// Pearson correlation of daily returns on dates both series trade.
    pub fn market_correlation(&self, history: &[Bar], market: &[Bar]) -> f64 {
        let cfg = &self.config;
        let lookback = cfg.correlation_lookback;
        if history.len() < lookback || market.len() < lookback {
            return cfg.default_correlation;
        }

        let tail = |bars: &[Bar]| {
            let returns: Vec<_> = daily_returns(bars).collect();
            let skip = returns.len().saturating_sub(lookback);
            returns.into_iter().skip(skip).collect::<Vec<_>>()
        };
        let market_by_date: HashMap<_, _> = tail(market).into_iter().collect();
        let (xs, ys): (Vec<f64>, Vec<f64>) = tail(history)
            .into_iter()
            .filter_map(|(date, r)| market_by_date.get(&date).map(|m| (r, *m)))
            .unzip();

        pearson(&xs, &ys).unwrap_or(cfg.default_correlation)
    }
}

impl PositionSizer for KellySizer {
    fn name(&self) -> &str {
        "kelly"
    }

    fn calculate_position_size(
        &mut self,
        _symbol: &str,
        history: &[Bar],
        market: &[Bar],
        portfolio_value: f64,
    ) -> PositionSize {
        let kelly = self.kelly_fraction();
        let vol_scalar = self.volatility_scalar(history);
        let correlation = self.market_correlation(history, market);
        let base = kelly * (1.0 - correlation * correlation) * vol_scalar;
        let fraction = base.min(self.config.concentration_limit);
        PositionSize::from_fraction(fraction, portfolio_value)
    }

    fn update_trade_history(&mut self, trade: &ClosedTrade) {
        self.trades.push_back(trade.clone());
        while self.trades.len() > self.config.max_history {
            self.trades.pop_front();
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1); `None` below two observations.
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() < 2 || xs.len() != ys.len() {
        return None;
    }
    let (mx, my) = (mean(xs), mean(ys));
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}
